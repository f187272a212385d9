//! Error taxonomy for intake, registry, dispatch, coordination and lifecycle.

use std::time::Duration;
use thiserror::Error;

/// Per-item validation failure. Recoverable: the item is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("process guid is empty")]
    EmptyProcessGuid,

    #[error("domain is empty")]
    EmptyDomain,

    #[error("indices must not be empty")]
    EmptyIndices,

    #[error("resources cannot be empty")]
    EmptyResource,

    #[error("task guid is empty")]
    EmptyTaskGuid,
}

/// Whole-call intake failure.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("failed to read request body: {0}")]
    BodyUnreadable(String),

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("malformed registration: {0}")]
    MalformedRegistration(String),

    #[error("no default brain registered after {0:?}")]
    NotReady(Duration),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("brain '{brain}' rejected auction: {status}")]
    Rejected { brain: String, status: u16 },

    #[error("brain '{brain}' failed: {status}")]
    BrainUnavailable { brain: String, status: u16 },

    #[error("cell state unavailable: {0}")]
    CellState(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl DispatchError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::BrainUnavailable { .. }
            | DispatchError::CellState(_)
            | DispatchError::Transport(_) => true,
            DispatchError::Registry(_)
            | DispatchError::Rejected { .. }
            | DispatchError::ShuttingDown => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("lock '{key}' is held by {holder}")]
    Held { key: String, holder: String },

    #[error("lock '{key}' is not held by {holder}")]
    NotHeld { key: String, holder: String },

    #[error("coordinator backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("lease lost for holder {holder_id}")]
    LeaseLost { holder_id: String },

    #[error("group member '{name}' exited unexpectedly")]
    MemberExited { name: String },

    #[error("group member '{name}' failed: {source}")]
    MemberFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
