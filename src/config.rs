use crate::dispatcher::DispatchSettings;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctioneerConfig {
    /// Identity used for the leader lease. Random when unset.
    pub holder_id: Option<String>,
    /// Host advertised in the lease address. Hostname when unset.
    pub advertise_host: Option<String>,

    /// Auction intake (`/v1/lrps`, `/v1/tasks`). Served only while active.
    pub listen_addr: String,
    /// Brain registration listener. Served only while active.
    pub registration_addr: String,
    /// Health, status and raft RPC. Always served.
    pub control_addr: String,
    /// Largest request body the intake and registration listeners will read.
    pub max_body_bytes: usize,

    /// Base URL of the cluster state store.
    pub cluster_state_url: String,

    pub communication_timeout_ms: u64,
    pub cell_state_timeout_ms: u64,

    pub dispatcher: DispatcherSettings,
    pub registry: RegistrySettings,
    pub lock: LockSettings,
    pub coordinator: CoordinatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_ms: u64,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CoordinatorSettings {
    /// Lease table held in this process; only meaningful for a single instance.
    #[default]
    Local,
    Raft {
        node_id: u64,
        data_dir: PathBuf,
        peers: Vec<PeerConfig>,
        #[serde(default)]
        bootstrap: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    pub node_id: u64,
    /// Control address of the peer (`host:port`).
    pub addr: String,
}

impl Default for AuctioneerConfig {
    fn default() -> Self {
        Self {
            holder_id: None,
            advertise_host: None,
            listen_addr: "0.0.0.0:9016".to_string(),
            registration_addr: "0.0.0.0:3000".to_string(),
            control_addr: "0.0.0.0:9017".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
            cluster_state_url: String::new(),
            communication_timeout_ms: 10_000,
            cell_state_timeout_ms: 1_000,
            dispatcher: DispatcherSettings::default(),
            registry: RegistrySettings::default(),
            lock: LockSettings::default(),
            coordinator: CoordinatorSettings::Local,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 1000,
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 30_000,
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 15_000,
            retry_interval_ms: 5_000,
        }
    }
}

impl DispatcherSettings {
    pub fn to_dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            workers: self.workers,
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl AuctioneerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Rejects configurations the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_state_url.trim().is_empty() {
            return Err(ConfigError::Missing("cluster_state_url"));
        }
        if !self.cluster_state_url.starts_with("http://") && !self.cluster_state_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                field: "cluster_state_url",
                reason: format!("'{}' is not an http(s) URL", self.cluster_state_url),
            });
        }

        parse_addr("listen_addr", &self.listen_addr)?;
        parse_addr("registration_addr", &self.registration_addr)?;
        parse_addr("control_addr", &self.control_addr)?;

        require_positive("max_body_bytes", self.max_body_bytes as u64)?;
        require_positive("communication_timeout_ms", self.communication_timeout_ms)?;
        require_positive("cell_state_timeout_ms", self.cell_state_timeout_ms)?;
        require_positive("dispatcher.workers", self.dispatcher.workers as u64)?;
        require_positive("dispatcher.max_attempts", self.dispatcher.max_attempts as u64)?;
        require_positive("registry.ready_timeout_ms", self.registry.ready_timeout_ms)?;
        require_positive("lock.ttl_ms", self.lock.ttl_ms)?;
        require_positive("lock.retry_interval_ms", self.lock.retry_interval_ms)?;

        if let CoordinatorSettings::Raft { node_id, peers, .. } = &self.coordinator {
            if !peers.iter().any(|p| p.node_id == *node_id) {
                return Err(ConfigError::Invalid {
                    field: "coordinator.peers",
                    reason: format!("node {} is not listed among its peers", node_id),
                });
            }
        }

        Ok(())
    }

    pub fn effective_holder_id(&self) -> String {
        self.holder_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn effective_host(&self) -> String {
        self.advertise_host.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".to_string())
        })
    }

    /// Address other components use to reach this instance's intake.
    pub fn advertised_address(&self) -> String {
        let port = self
            .listen_addr
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .unwrap_or(9016);
        format!("http://{}:{}", self.effective_host(), port)
    }

    pub fn communication_timeout(&self) -> Duration {
        Duration::from_millis(self.communication_timeout_ms)
    }

    pub fn cell_state_timeout(&self) -> Duration {
        Duration::from_millis(self.cell_state_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.registry.ready_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock.ttl_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock.retry_interval_ms)
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("'{}': {}", value, e),
    })
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
