use crate::brain::BrainClient;
use crate::error::DispatchError;
use crate::types::{AuctionRequest, Brain};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Submits auctions to brains over HTTP, bounded by the communication timeout.
pub struct HttpBrainClient {
    client: reqwest::Client,
}

impl HttpBrainClient {
    pub fn new(communication_timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(communication_timeout)
            .build()?;
        Ok(Self { client })
    }

    fn auctions_url(brain: &Brain) -> String {
        format!("{}/v1/auctions", brain.url)
    }
}

#[async_trait]
impl BrainClient for HttpBrainClient {
    async fn submit(&self, brain: &Brain, request: &AuctionRequest) -> Result<(), DispatchError> {
        let url = Self::auctions_url(brain);
        debug!(
            "Submitting {} lrps and {} tasks to brain {} at {}",
            request.lrps.len(),
            request.tasks.len(),
            brain.name,
            url
        );

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(DispatchError::Rejected {
                brain: brain.name.clone(),
                status: status.as_u16(),
            })
        } else {
            Err(DispatchError::BrainUnavailable {
                brain: brain.name.clone(),
                status: status.as_u16(),
            })
        }
    }
}
