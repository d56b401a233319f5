//! Collection-bound facade over the data processors.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use tether_query::{Aggregation, Query};
use tether_types::{Entity, EntityId};

use crate::error::{SyncError, SyncResult};
use crate::operation::{Operation, OperationKind, RequestOptions};
use crate::processor::{
    CacheOfflineDataProcessor, DataProcessor, NetworkDataProcessor, OfflineDataProcessor,
    ProcessOutput,
};
use crate::repository::LazyRepository;
use crate::sync_manager::{PushResult, SyncEntry, SyncManager};

/// Data-access policy of a [`DataStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStoreType {
    /// Backend only.
    Network,
    /// Local store only; changes reach the backend on `push`.
    Sync,
    /// Local store first, then the backend.
    Cache,
}

/// Outcome of [`DataStore::sync`].
#[derive(Debug)]
pub struct SyncSummary {
    pub push: Vec<PushResult>,
    pub pull: Vec<Entity>,
}

/// Operations on one collection under one [`DataStoreType`].
///
/// Every CRUD call builds an [`Operation`] and runs it through the
/// processor picked for the store type.
pub struct DataStore {
    collection: String,
    store_type: DataStoreType,
    processor: Arc<dyn DataProcessor>,
    offline: Arc<LazyRepository>,
    network: Arc<LazyRepository>,
    sync: Arc<SyncManager>,
    options: RequestOptions,
}

impl DataStore {
    pub fn new(
        collection: impl Into<String>,
        store_type: DataStoreType,
        offline: impl Into<LazyRepository>,
        network: impl Into<LazyRepository>,
        sync: Arc<SyncManager>,
    ) -> Self {
        let offline = Arc::new(offline.into());
        let network = Arc::new(network.into());

        let processor: Arc<dyn DataProcessor> = match store_type {
            DataStoreType::Network => Arc::new(NetworkDataProcessor::new(Arc::clone(&network))),
            DataStoreType::Sync => Arc::new(OfflineDataProcessor::new(
                Arc::clone(&offline),
                Arc::clone(&sync),
            )),
            DataStoreType::Cache => Arc::new(CacheOfflineDataProcessor::new(
                Arc::clone(&offline),
                Arc::clone(&network),
                Arc::clone(&sync),
            )),
        };

        Self {
            collection: collection.into(),
            store_type,
            processor,
            offline,
            network,
            sync,
            options: RequestOptions::default(),
        }
    }

    /// Options attached to every operation issued by this store.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store_type(&self) -> DataStoreType {
        self.store_type
    }

    async fn run(&self, kind: OperationKind) -> SyncResult<ProcessOutput> {
        let operation =
            Operation::new(self.collection.clone(), kind).with_options(self.options.clone());
        self.processor.process(operation).await
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Entities matching `query`. Staged for [`DataStoreType::Cache`].
    pub async fn find(&self, query: Option<Query>) -> SyncResult<ProcessOutput> {
        self.run(OperationKind::Read(query)).await
    }

    pub async fn find_by_id(&self, id: impl Into<EntityId>) -> SyncResult<ProcessOutput> {
        self.run(OperationKind::ReadById(id.into())).await
    }

    pub async fn count(&self, query: Option<Query>) -> SyncResult<ProcessOutput> {
        self.run(OperationKind::Count(query)).await
    }

    pub async fn group(&self, aggregation: Aggregation) -> SyncResult<ProcessOutput> {
        self.run(OperationKind::Group(aggregation)).await
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Updates `entity` if it has an `_id`, creates it otherwise.
    pub async fn save(&self, entity: Entity) -> SyncResult<Entity> {
        let saved = if entity.id().is_some() {
            self.update(vec![entity]).await?
        } else {
            self.create(vec![entity]).await?
        };
        saved
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Network("save returned no entity".to_string()))
    }

    pub async fn create(&self, entities: Vec<Entity>) -> SyncResult<Vec<Entity>> {
        self.run(OperationKind::Create(entities))
            .await?
            .into_final()
            .await?
            .into_entities()
    }

    pub async fn update(&self, entities: Vec<Entity>) -> SyncResult<Vec<Entity>> {
        self.run(OperationKind::Update(entities))
            .await?
            .into_final()
            .await?
            .into_entities()
    }

    pub async fn remove(&self, query: Option<Query>) -> SyncResult<usize> {
        self.run(OperationKind::Delete(query))
            .await?
            .into_final()
            .await?
            .into_count()
    }

    pub async fn remove_by_id(&self, id: impl Into<EntityId>) -> SyncResult<usize> {
        self.run(OperationKind::DeleteById(id.into()))
            .await?
            .into_final()
            .await?
            .into_count()
    }

    /// Removes matching local entities and their pending sync entries.
    pub async fn clear(&self, query: Option<Query>) -> SyncResult<usize> {
        self.run(OperationKind::Clear(query))
            .await?
            .into_final()
            .await?
            .into_count()
    }

    // ── Sync ─────────────────────────────────────────────────────

    fn ensure_offline(&self, action: &str) -> SyncResult<()> {
        if self.store_type == DataStoreType::Network {
            return Err(SyncError::InvalidArgument(format!(
                "{action} is not available on a network store"
            )));
        }
        Ok(())
    }

    /// Sends pending local changes to the backend.
    pub async fn push(&self) -> SyncResult<Vec<PushResult>> {
        self.ensure_offline("push")?;
        let offline = self.offline.get().await?;
        let network = self.network.get().await?;
        self.sync
            .push(
                &self.collection,
                offline.as_ref(),
                network.as_ref(),
                &self.options,
            )
            .await
    }

    /// Replaces the matching local entities with the backend's.
    ///
    /// Refuses to run while local changes are pending.
    pub async fn pull(&self, query: Option<Query>) -> SyncResult<Vec<Entity>> {
        self.ensure_offline("pull")?;
        let pending = self.sync.sync_item_count(&self.collection).await?;
        if pending > 0 {
            return Err(SyncError::SyncConflict {
                collection: self.collection.clone(),
                pending,
                action: "pull".to_string(),
            });
        }

        let network = self.network.get().await?;
        let entities = network
            .read(&self.collection, query.as_ref(), &self.options)
            .await?;

        let offline = self.offline.get().await?;
        let scope = query.as_ref().filter(|q| q.is_supported_offline());
        if query.is_none() || scope.is_some() {
            offline.clear(&self.collection, scope, &self.options).await?;
        }
        if !entities.is_empty() {
            offline
                .create(&self.collection, entities.clone(), &self.options)
                .await?;
        }

        info!("Pulled {} entities into {}", entities.len(), self.collection);
        Ok(entities)
    }

    /// Push, then pull.
    pub async fn sync(&self, query: Option<Query>) -> SyncResult<SyncSummary> {
        let push = self.push().await?;
        let pull = self.pull(query).await?;
        Ok(SyncSummary { push, pull })
    }

    pub async fn pending_sync_count(&self) -> SyncResult<usize> {
        self.sync.sync_item_count(&self.collection).await
    }

    pub async fn pending_sync_entities(&self) -> SyncResult<Vec<SyncEntry>> {
        self.sync.pending_entries(&self.collection).await
    }

    /// Drops pending entries without pushing them.
    pub async fn clear_sync(&self, query: Option<Query>) -> SyncResult<usize> {
        self.sync.clear_sync(&self.collection, query.as_ref()).await
    }
}
