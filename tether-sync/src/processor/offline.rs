//! Offline-only policy.

use async_trait::async_trait;
use std::sync::Arc;

use tether_query::Query;
use tether_types::{Entity, EntityId};

use super::{DataProcessor, ProcessOutput, single};
use crate::error::SyncResult;
use crate::operation::{OperationResult, RequestOptions};
use crate::repository::{LazyRepository, Repository};
use crate::sync_manager::SyncManager;

/// Works against the local store only and logs every mutation in the sync
/// log so a later push can mirror it.
///
/// The sync event is recorded after the local write succeeds. If recording
/// fails the error propagates and the local write stands.
pub struct OfflineDataProcessor {
    offline: Arc<LazyRepository>,
    sync: Arc<SyncManager>,
}

impl OfflineDataProcessor {
    pub fn new(offline: Arc<LazyRepository>, sync: Arc<SyncManager>) -> Self {
        Self { offline, sync }
    }

    /// Creates entities locally. Entities without `_id` get a generated id
    /// and are flagged `_kmd.local`.
    pub async fn create_entities(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let mut stamped = Vec::with_capacity(entities.len());
        for mut entity in entities {
            if entity.id().is_none() {
                entity.set_id(&EntityId::generate());
                entity.mark_local()?;
            }
            stamped.push(entity);
        }

        let repository = self.offline.get().await?;
        let created = repository.create(collection, stamped, options).await?;
        self.sync.add_create_event(collection, &created).await?;
        Ok(created)
    }

    pub async fn update_entities(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let repository = self.offline.get().await?;
        let updated = repository.update(collection, entities, options).await?;
        self.sync.add_update_event(collection, &updated).await?;
        Ok(updated)
    }

    /// Deletes matching entities and returns them.
    pub async fn delete_entities(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let repository = self.offline.get().await?;
        let affected = repository.read(collection, query, options).await?;
        repository.delete(collection, query, options).await?;
        self.sync.add_delete_event(collection, &affected).await?;
        Ok(affected)
    }

    /// Deletes one entity and returns it. Fails with `NotFound` when the
    /// entity is not stored locally.
    pub async fn delete_entity(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<Entity> {
        let repository = self.offline.get().await?;
        let entity = repository.read_by_id(collection, id, options).await?;
        repository.delete_by_id(collection, id, options).await?;
        self.sync.add_delete_by_id_event(collection, &entity).await?;
        Ok(entity)
    }

    /// Clears entities and their pending sync entries.
    pub async fn clear_entities(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        let repository = self.offline.get().await?;
        match query {
            Some(query) => {
                let ids: Vec<EntityId> = repository
                    .read(collection, Some(query), options)
                    .await?
                    .iter()
                    .filter_map(Entity::id)
                    .collect();
                self.sync.remove_sync_entities_for_ids(&ids).await?;
            }
            None => {
                self.sync.clear_sync(collection, None).await?;
            }
        }
        repository.clear(collection, query, options).await
    }
}

#[async_trait]
impl DataProcessor for OfflineDataProcessor {
    async fn repository(&self) -> SyncResult<Arc<dyn Repository>> {
        self.offline.get().await
    }

    async fn process_create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        single(OperationResult::Entities(
            self.create_entities(collection, entities, options).await?,
        ))
    }

    async fn process_update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        single(OperationResult::Entities(
            self.update_entities(collection, entities, options).await?,
        ))
    }

    async fn process_delete(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let deleted = self
            .delete_entities(collection, query.as_ref(), options)
            .await?;
        single(OperationResult::Count(deleted.len()))
    }

    async fn process_delete_by_id(
        &self,
        collection: &str,
        id: EntityId,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        self.delete_entity(collection, &id, options).await?;
        single(OperationResult::Count(1))
    }

    async fn process_clear(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        single(OperationResult::Count(
            self.clear_entities(collection, query.as_ref(), options)
                .await?,
        ))
    }
}
