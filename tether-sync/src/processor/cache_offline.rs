//! Cache-then-network policy.
//!
//! Read path:
//!
//! ```text
//! start -> guard checked -> cache emitted -> network attempted -> reconciled
//!                                                              \-> network failed
//! ```
//!
//! The guard refuses to run while the collection has pending sync entries.
//! The cache value is produced exactly once when the guard passes, even when
//! the local store is empty. Reconciliation is a destructive overwrite: the
//! cached entities are removed by id and the network entities stored in
//! their place. Concurrent reads of one collection are not serialized and
//! may interleave their reconciliation.

use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, warn};

use tether_query::{Aggregation, Query};
use tether_types::{Entity, EntityId};

use super::offline::OfflineDataProcessor;
use super::{DataProcessor, ProcessOutput, TwoPhase, single};
use crate::error::{SyncError, SyncResult};
use crate::operation::{OperationResult, RequestOptions};
use crate::repository::{LazyRepository, Repository};
use crate::sync_manager::SyncManager;

/// Answers reads from the local store and then the backend, and mirrors
/// writes to the backend immediately.
pub struct CacheOfflineDataProcessor {
    offline: Arc<LazyRepository>,
    network: Arc<LazyRepository>,
    sync: Arc<SyncManager>,
    local: OfflineDataProcessor,
}

impl CacheOfflineDataProcessor {
    pub fn new(
        offline: Arc<LazyRepository>,
        network: Arc<LazyRepository>,
        sync: Arc<SyncManager>,
    ) -> Self {
        let local = OfflineDataProcessor::new(Arc::clone(&offline), Arc::clone(&sync));
        Self {
            offline,
            network,
            sync,
            local,
        }
    }

    /// Fails with `SyncConflict` while `collection` has pending entries.
    async fn ensure_count_before_read(&self, collection: &str, action: &str) -> SyncResult<()> {
        let pending = self.sync.sync_item_count(collection).await?;
        if pending > 0 {
            return Err(SyncError::SyncConflict {
                collection: collection.to_string(),
                pending,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// Mirrors the pending entries for `entities` and returns the backend records.
    async fn mirror(
        &self,
        collection: &str,
        entities: &[Entity],
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let ids: Vec<EntityId> = entities.iter().filter_map(Entity::id).collect();
        let offline = self.offline.get().await?;
        let network = self.network.get().await?;
        self.sync
            .push_ids(collection, &ids, offline.as_ref(), network.as_ref(), options)
            .await
    }

    /// The backend, for queries the local store cannot evaluate.
    async fn network_only(&self) -> SyncResult<Arc<dyn Repository>> {
        debug!("Query needs the backend; skipping the local store");
        self.network.get().await
    }
}

/// Replaces the cached entities by the network ones.
async fn reconcile(
    offline: &dyn Repository,
    collection: &str,
    cached: &[Entity],
    fresh: &[Entity],
    options: &RequestOptions,
) -> SyncResult<()> {
    let stale: Vec<serde_json::Value> = cached
        .iter()
        .filter_map(Entity::id)
        .map(|id| serde_json::Value::String(id.into_string()))
        .collect();
    if !stale.is_empty() {
        let query = Query::new().contains(tether_types::ID_FIELD, stale);
        offline.delete(collection, Some(&query), options).await?;
    }
    if !fresh.is_empty() {
        offline.create(collection, fresh.to_vec(), options).await?;
    }
    Ok(())
}

#[async_trait]
impl DataProcessor for CacheOfflineDataProcessor {
    async fn repository(&self) -> SyncResult<Arc<dyn Repository>> {
        self.offline.get().await
    }

    /// Local read first, then the backend read, which replaces the cached
    /// entities in the local store. Projected reads (`fields` set) are
    /// returned as-is and never written locally, so the stored records keep
    /// every field.
    async fn process_read(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        if query.as_ref().is_some_and(|q| !q.is_supported_offline()) {
            let network = self.network_only().await?;
            return single(OperationResult::Entities(
                network.read(collection, query.as_ref(), options).await?,
            ));
        }

        self.ensure_count_before_read(collection, "read").await?;
        let offline = self.offline.get().await?;
        let cached = offline.read(collection, query.as_ref(), options).await?;

        let network = Arc::clone(&self.network);
        let collection = collection.to_string();
        let options = options.clone();
        let stale = cached.clone();
        let phase = async move {
            let network = network.get().await?;
            let fresh = network.read(&collection, query.as_ref(), &options).await?;
            if query.as_ref().is_some_and(|q| q.fields.is_some()) {
                debug!("Not caching projected read of {}", collection);
            } else {
                reconcile(offline.as_ref(), &collection, &stale, &fresh, &options).await?;
            }
            Ok::<_, SyncError>(OperationResult::Entities(fresh))
        };

        Ok(ProcessOutput::Staged(TwoPhase::new(
            OperationResult::Entities(cached),
            phase.boxed(),
        )))
    }

    async fn process_read_by_id(
        &self,
        collection: &str,
        id: EntityId,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        self.ensure_count_before_read(collection, "read by id").await?;
        let offline = self.offline.get().await?;
        let cached = match offline.read_by_id(collection, &id, options).await {
            Ok(entity) => Some(entity),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let network = Arc::clone(&self.network);
        let collection = collection.to_string();
        let options = options.clone();
        let phase = async move {
            let network = network.get().await?;
            match network.read_by_id(&collection, &id, &options).await {
                Ok(fresh) => {
                    offline.delete_by_id(&collection, &id, &options).await?;
                    offline
                        .create(&collection, vec![fresh.clone()], &options)
                        .await?;
                    Ok::<_, SyncError>(OperationResult::Entity(Some(fresh)))
                }
                Err(e) if e.is_not_found() => {
                    // Gone remotely: drop the local copy too.
                    offline.delete_by_id(&collection, &id, &options).await?;
                    Err(e)
                }
                Err(e) => Err(e),
            }
        };

        Ok(ProcessOutput::Staged(TwoPhase::new(
            OperationResult::Entity(cached),
            phase.boxed(),
        )))
    }

    async fn process_count(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        if query.as_ref().is_some_and(|q| !q.is_supported_offline()) {
            let network = self.network_only().await?;
            return single(OperationResult::Count(
                network.count(collection, query.as_ref(), options).await?,
            ));
        }

        self.ensure_count_before_read(collection, "count").await?;
        let offline = self.offline.get().await?;
        let cached = offline.count(collection, query.as_ref(), options).await?;

        let network = Arc::clone(&self.network);
        let collection = collection.to_string();
        let options = options.clone();
        let phase = async move {
            let network = network.get().await?;
            let count = network.count(&collection, query.as_ref(), &options).await?;
            Ok::<_, SyncError>(OperationResult::Count(count))
        };

        Ok(ProcessOutput::Staged(TwoPhase::new(
            OperationResult::Count(cached),
            phase.boxed(),
        )))
    }

    async fn process_group(
        &self,
        collection: &str,
        aggregation: Aggregation,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        if !aggregation.is_supported_offline() {
            let network = self.network_only().await?;
            return single(OperationResult::Groups(
                network.group(collection, &aggregation, options).await?,
            ));
        }

        self.ensure_count_before_read(collection, "group").await?;
        let offline = self.offline.get().await?;
        let cached = offline.group(collection, &aggregation, options).await?;

        let network = Arc::clone(&self.network);
        let collection = collection.to_string();
        let options = options.clone();
        let phase = async move {
            let network = network.get().await?;
            let groups = network.group(&collection, &aggregation, &options).await?;
            Ok::<_, SyncError>(OperationResult::Groups(groups))
        };

        Ok(ProcessOutput::Staged(TwoPhase::new(
            OperationResult::Groups(cached),
            phase.boxed(),
        )))
    }

    async fn process_create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let created = self.local.create_entities(collection, entities, options).await?;
        single(OperationResult::Entities(
            self.mirror(collection, &created, options).await?,
        ))
    }

    async fn process_update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let updated = self.local.update_entities(collection, entities, options).await?;
        single(OperationResult::Entities(
            self.mirror(collection, &updated, options).await?,
        ))
    }

    async fn process_delete(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        if query.as_ref().is_some_and(|q| !q.is_supported_offline()) {
            let network = self.network_only().await?;
            return single(OperationResult::Count(
                network.delete(collection, query.as_ref(), options).await?,
            ));
        }

        let deleted = self
            .local
            .delete_entities(collection, query.as_ref(), options)
            .await?;
        let local_count = deleted.len();

        let network = self.network.get().await?;
        let count = match network.delete(collection, query.as_ref(), options).await {
            Ok(count) => count,
            Err(e) if e.is_not_found() => {
                warn!("Backend has no matching {} entities; local delete stands", collection);
                local_count
            }
            Err(e) => return Err(e),
        };

        let ids: Vec<EntityId> = deleted.iter().filter_map(Entity::id).collect();
        self.sync.remove_sync_entities_for_ids(&ids).await?;
        single(OperationResult::Count(count))
    }

    async fn process_delete_by_id(
        &self,
        collection: &str,
        id: EntityId,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let deleted = self.local.delete_entity(collection, &id, options).await?;
        if deleted.is_local() {
            // The backend never saw it.
            return single(OperationResult::Count(1));
        }

        let network = self.network.get().await?;
        let count = match network.delete_by_id(collection, &id, options).await {
            Ok(count) => count,
            Err(e) if e.is_not_found() => {
                warn!("{} already gone from the backend; local delete stands", id);
                1
            }
            Err(e) => return Err(e),
        };

        self.sync.remove_sync_item_for_entity_id(&id).await?;
        single(OperationResult::Count(count))
    }

    async fn process_clear(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        self.local.process_clear(collection, query, options).await
    }
}
