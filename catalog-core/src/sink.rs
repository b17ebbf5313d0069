use crate::models::Sample;
use crate::store::{CatalogStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("catalog service returned status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for samples. One call per first-seen topic; callers never retry.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn send(&self, sample: &Sample) -> Result<(), SinkError>;
}

/// Writes samples straight into a local catalog store.
pub struct StoreSink {
    store: Arc<dyn CatalogStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SampleSink for StoreSink {
    async fn send(&self, sample: &Sample) -> Result<(), SinkError> {
        self.store.upsert(sample).await?;
        Ok(())
    }
}
