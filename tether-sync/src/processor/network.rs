//! Network-only policy.

use async_trait::async_trait;
use std::sync::Arc;

use super::DataProcessor;
use crate::error::SyncResult;
use crate::repository::{LazyRepository, Repository};

/// Passes every operation straight to the backend.
pub struct NetworkDataProcessor {
    network: Arc<LazyRepository>,
}

impl NetworkDataProcessor {
    pub fn new(network: Arc<LazyRepository>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl DataProcessor for NetworkDataProcessor {
    async fn repository(&self) -> SyncResult<Arc<dyn Repository>> {
        self.network.get().await
    }
}
