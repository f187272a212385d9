use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "auctionctl")]
#[command(about = "CLI for the auctioneer")]
struct Cli {
    /// Control address (health, status).
    #[arg(long, default_value = "http://127.0.0.1:9017")]
    control: String,

    /// Auction intake address.
    #[arg(long, default_value = "http://127.0.0.1:9016")]
    intake: String,

    /// Brain registration address.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    registration: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Status,

    #[command(subcommand)]
    Brain(BrainCommands),

    #[command(subcommand)]
    Submit(SubmitCommands),
}

#[derive(Subcommand)]
enum BrainCommands {
    List,
    Register {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        url: String,

        /// Comma-separated, e.g. "default,gpu".
        #[arg(short, long, default_value = "default")]
        tags: String,
    },
}

#[derive(Subcommand)]
enum SubmitCommands {
    Lrp {
        #[arg(long)]
        guid: String,

        #[arg(long)]
        domain: String,

        #[arg(long, value_delimiter = ',', default_value = "0")]
        indices: Vec<i32>,

        #[arg(long, default_value = "256")]
        memory_mb: i32,

        #[arg(long, default_value = "1024")]
        disk_mb: i32,

        #[arg(long, default_value = "")]
        root_fs: String,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    Task {
        #[arg(long)]
        guid: String,

        #[arg(long)]
        domain: String,

        #[arg(long, default_value = "256")]
        memory_mb: i32,

        #[arg(long, default_value = "1024")]
        disk_mb: i32,

        #[arg(long, default_value = "")]
        root_fs: String,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

async fn print_response(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    let text = resp.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => println!("{}\n{}", status, serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}\n{}", status, text),
    }
    if !status.is_success() {
        anyhow::bail!("request failed with {}", status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let resp: Value = client
                .get(format!("{}/status", cli.control))
                .send()
                .await?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Brain(cmd) => match cmd {
            BrainCommands::List => {
                let resp: Value = client
                    .get(format!("{}/v1/brains", cli.registration))
                    .send()
                    .await?
                    .json()
                    .await?;
                println!("{}", serde_json::to_string_pretty(&resp)?);
            }
            BrainCommands::Register { name, url, tags } => {
                let body = serde_json::json!({
                    "name": name,
                    "url": url,
                    "tags": tags,
                });

                let resp = client
                    .post(format!("{}/v1/brains", cli.registration))
                    .json(&body)
                    .send()
                    .await?;
                print_response(resp).await?;
            }
        },
        Commands::Submit(cmd) => match cmd {
            SubmitCommands::Lrp {
                guid,
                domain,
                indices,
                memory_mb,
                disk_mb,
                root_fs,
                tags,
            } => {
                let body = serde_json::json!([{
                    "process_guid": guid,
                    "domain": domain,
                    "indices": indices,
                    "resource": {
                        "memory_mb": memory_mb,
                        "disk_mb": disk_mb,
                        "root_fs": root_fs,
                    },
                    "tags": tags,
                }]);

                let resp = client
                    .post(format!("{}/v1/lrps", cli.intake))
                    .json(&body)
                    .send()
                    .await?;
                print_response(resp).await?;
            }
            SubmitCommands::Task {
                guid,
                domain,
                memory_mb,
                disk_mb,
                root_fs,
                tags,
            } => {
                let body = serde_json::json!({
                    "task_guid": guid,
                    "domain": domain,
                    "resource": {
                        "memory_mb": memory_mb,
                        "disk_mb": disk_mb,
                        "root_fs": root_fs,
                    },
                    "tags": tags,
                });

                let resp = client
                    .post(format!("{}/v1/tasks", cli.intake))
                    .json(&body)
                    .send()
                    .await?;
                print_response(resp).await?;
            }
        },
    }

    Ok(())
}
