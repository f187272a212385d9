use crate::error::DispatchError;
use crate::types::CellPresence;
use async_trait::async_trait;
use std::time::Duration;

/// Source of the live cell view handed to brains with every auction.
#[async_trait]
pub trait CellStateClient: Send + Sync {
    async fn fetch_cells(&self) -> Result<Vec<CellPresence>, DispatchError>;
}

/// Reads cell presences from the cluster data store. Every request is bounded
/// by the cell-state timeout, which is kept separate from (and usually
/// shorter than) the communication timeout used for brains.
pub struct HttpCellStateClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCellStateClient {
    pub fn new(base_url: impl Into<String>, cell_state_timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(cell_state_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl CellStateClient for HttpCellStateClient {
    async fn fetch_cells(&self) -> Result<Vec<CellPresence>, DispatchError> {
        let url = format!("{}/v1/cells", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::CellState(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchError::CellState(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DispatchError::CellState(e.to_string()))
    }
}
