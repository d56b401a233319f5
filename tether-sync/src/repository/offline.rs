//! Repository over a local persister.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use tether_query::{Aggregation, Query};
use tether_storage::{KeyValuePersister, StorageError};
use tether_types::{Entity, EntityId, Timestamp};

use super::Repository;
use crate::error::{SyncError, SyncResult};
use crate::operation::RequestOptions;

/// Local CRUD over whole-collection reads and writes.
///
/// Every mutation loads the collection, edits it in memory and persists the
/// result. Nothing here talks to the network or records sync events.
///
/// Mutations of one collection are serialized by a per-collection lock held
/// from load to persist. Clones share the locks, so every writer of a
/// persister should go through the same repository (or a clone of it).
#[derive(Clone)]
pub struct OfflineRepository {
    persister: Arc<dyn KeyValuePersister>,
    write_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl OfflineRepository {
    pub fn new(persister: Arc<dyn KeyValuePersister>) -> Self {
        Self {
            persister,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn persister(&self) -> &Arc<dyn KeyValuePersister> {
        &self.persister
    }

    async fn lock_collection(&self, collection: &str) -> SyncResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.write_locks.lock().map_err(|_| {
                SyncError::Storage(StorageError::Lock("offline write locks".to_string()))
            })?;
            Arc::clone(locks.entry(collection.to_string()).or_default())
        };
        Ok(lock.lock_owned().await)
    }

    async fn load(&self, collection: &str) -> SyncResult<Vec<Entity>> {
        Ok(self.persister.read_entities(collection).await?)
    }

    async fn store(&self, collection: &str, entities: Vec<Entity>) -> SyncResult<()> {
        Ok(self.persister.persist_entities(collection, entities).await?)
    }

    /// Ids of the entities `query` selects, with pagination applied.
    fn selected_ids(entities: &[Entity], query: &Query) -> SyncResult<HashSet<EntityId>> {
        Ok(query
            .process(entities.to_vec())?
            .iter()
            .filter_map(Entity::id)
            .collect())
    }
}

/// Replaces the entity with the same id in place, or appends.
fn upsert(stored: &mut Vec<Entity>, entity: Entity) {
    let id = entity.id();
    match stored.iter_mut().find(|e| e.id().is_some() && e.id() == id) {
        Some(slot) => *slot = entity,
        None => stored.push(entity),
    }
}

#[async_trait]
impl Repository for OfflineRepository {
    /// Upserts by id, generating ids for entities that have none. Generated
    /// ids are flagged local until the backend assigns its own.
    ///
    /// `_kmd.ect`/`lmt` are stamped only on entities without a creation
    /// time, so records fetched from the backend keep their metadata.
    async fn create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let _guard = self.lock_collection(collection).await?;
        let mut stored = self.load(collection).await?;
        let now = Timestamp::now();

        let mut created = Vec::with_capacity(entities.len());
        for mut entity in entities {
            if entity.id().is_none() {
                entity.set_id(&EntityId::generate());
                entity.mark_local()?;
            }
            if entity.kmd().is_none_or(|kmd| kmd.ect.is_none()) {
                entity.touch(now)?;
            }
            upsert(&mut stored, entity.clone());
            created.push(entity);
        }

        self.store(collection, stored).await?;
        Ok(created)
    }

    async fn read(
        &self,
        collection: &str,
        query: Option<&Query>,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let entities = self.load(collection).await?;
        match query {
            Some(query) => Ok(query.process(entities)?),
            None => Ok(entities),
        }
    }

    async fn read_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        _options: &RequestOptions,
    ) -> SyncResult<Entity> {
        self.load(collection)
            .await?
            .into_iter()
            .find(|e| e.id().as_ref() == Some(id))
            .ok_or_else(|| SyncError::NotFound(format!("entity {id} in collection {collection}")))
    }

    async fn update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        if entities.iter().any(|e| e.id().is_none()) {
            return Err(SyncError::InvalidArgument(
                "every updated entity must carry an _id".to_string(),
            ));
        }

        let _guard = self.lock_collection(collection).await?;
        let mut stored = self.load(collection).await?;
        let now = Timestamp::now();

        let mut updated = Vec::with_capacity(entities.len());
        for mut entity in entities {
            entity.touch(now)?;
            upsert(&mut stored, entity.clone());
            updated.push(entity);
        }

        self.store(collection, stored).await?;
        Ok(updated)
    }

    async fn delete(
        &self,
        collection: &str,
        query: Option<&Query>,
        _options: &RequestOptions,
    ) -> SyncResult<usize> {
        let _guard = self.lock_collection(collection).await?;
        let stored = self.load(collection).await?;

        let Some(query) = query else {
            let count = stored.len();
            self.persister.delete_entities(collection).await?;
            return Ok(count);
        };

        let ids = Self::selected_ids(&stored, query)?;
        let before = stored.len();
        let kept: Vec<Entity> = stored
            .into_iter()
            .filter(|e| e.id().is_none_or(|id| !ids.contains(&id)))
            .collect();
        let removed = before - kept.len();

        if removed > 0 {
            self.store(collection, kept).await?;
        }
        Ok(removed)
    }

    async fn delete_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        _options: &RequestOptions,
    ) -> SyncResult<usize> {
        let _guard = self.lock_collection(collection).await?;
        let mut stored = self.load(collection).await?;
        let before = stored.len();
        stored.retain(|e| e.id().as_ref() != Some(id));

        if stored.len() == before {
            return Ok(0);
        }
        self.store(collection, stored).await?;
        Ok(1)
    }

    async fn count(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        Ok(self.read(collection, query, options).await?.len())
    }

    async fn group(
        &self,
        collection: &str,
        aggregation: &Aggregation,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Value>> {
        let entities = self.load(collection).await?;
        Ok(aggregation.evaluate(entities)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_replaces_in_place() {
        let mut stored = vec![
            Entity::from_value(json!({"_id": "a", "v": 1})).unwrap(),
            Entity::from_value(json!({"_id": "b", "v": 1})).unwrap(),
        ];
        upsert(
            &mut stored,
            Entity::from_value(json!({"_id": "a", "v": 2})).unwrap(),
        );
        upsert(
            &mut stored,
            Entity::from_value(json!({"_id": "c", "v": 1})).unwrap(),
        );

        let ids: Vec<_> = stored.iter().filter_map(Entity::id).collect();
        assert_eq!(
            ids,
            vec![EntityId::from("a"), EntityId::from("b"), EntityId::from("c")]
        );
        assert_eq!(stored[0].get("v"), Some(&json!(2)));
    }
}
