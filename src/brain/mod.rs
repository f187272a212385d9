mod client;
pub mod registry;

pub use client::HttpBrainClient;
pub use registry::BrainRegistry;

use crate::error::DispatchError;
use crate::types::*;
use async_trait::async_trait;

/// Remote placement engine transport. Placement itself happens on the brain.
#[async_trait]
pub trait BrainClient: Send + Sync {
    async fn submit(&self, brain: &Brain, request: &AuctionRequest) -> Result<(), DispatchError>;
}
