use anyhow::Result;
use auctioneer::{create_control_router, Auctioneer, AuctioneerConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "auctioneer")]
#[command(about = "Leader-locked auction intake for pluggable placement brains")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[arg(short, long, default_value = "auctioneer.toml")]
        config: PathBuf,
    },
    Init {
        #[arg(short, long, default_value = "auctioneer.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auctioneer=info,openraft=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: config_path } => {
            run_daemon(config_path).await?;
        }
        Commands::Init { config: config_path } => {
            init_config(config_path)?;
        }
    }

    Ok(())
}

async fn run_daemon(config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() {
        info!("Loading config from {:?}", config_path);
        AuctioneerConfig::load(&config_path)?
    } else {
        info!("Config file not found, using defaults");
        AuctioneerConfig::default()
    };

    let auctioneer = Arc::new(Auctioneer::new(config.clone()).await?);

    let control_router = create_control_router(auctioneer.clone());
    let listener = TcpListener::bind(&config.control_addr).await?;
    info!("Control server listening on {}", config.control_addr);

    let control_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, control_router).await {
            error!("Control server error: {}", e);
        }
    });

    let signal_auctioneer = auctioneer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            signal_auctioneer.shutdown();
        }
    });

    let result = auctioneer.run().await;

    control_handle.abort();
    if let Some(raft) = auctioneer.raft() {
        if let Err(e) = raft.shutdown().await {
            error!("{}", e);
        }
    }

    result?;
    Ok(())
}

fn init_config(config_path: PathBuf) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("Config file already exists: {:?}", config_path);
    }

    let config = AuctioneerConfig::default();
    config.save(&config_path)?;
    println!("Created config file: {:?}", config_path);
    println!("\nEdit the config file to:");
    println!("  - Set cluster_state_url (required)");
    println!("  - Set a stable holder_id per instance");
    println!("  - Switch coordinator to raft for multi-instance deployments");

    Ok(())
}
