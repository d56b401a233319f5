//! An in-memory backend for testing.

use super::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tether_storage::StorageError;
use tether_types::Timestamp;

/// A fake backend that stores collections in memory.
///
/// Entities created without `_id` get a server id (`srv-1`, `srv-2`, ...).
/// While offline every call fails with [`SyncError::Network`] without
/// touching the stored data. Every call, online or not, is counted.
#[derive(Debug)]
pub struct MockNetwork {
    collections: Mutex<HashMap<String, Vec<Entity>>>,
    online: AtomicBool,
    calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    /// Creates an empty, online backend.
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Switches connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of repository calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stores entities directly, bypassing the call counter.
    pub fn seed(&self, collection: &str, entities: Vec<Entity>) -> SyncResult<()> {
        self.lock()?
            .entry(collection.to_string())
            .or_default()
            .extend(entities);
        Ok(())
    }

    /// Snapshot of a collection, bypassing the call counter.
    pub fn entities(&self, collection: &str) -> SyncResult<Vec<Entity>> {
        Ok(self.lock()?.get(collection).cloned().unwrap_or_default())
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, HashMap<String, Vec<Entity>>>> {
        self.collections
            .lock()
            .map_err(|_| SyncError::Storage(StorageError::Lock("mock network".to_string())))
    }

    fn enter(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_online() {
            Ok(())
        } else {
            Err(SyncError::Network("backend unreachable".to_string()))
        }
    }

    fn assign_id(&self, entity: &mut Entity) {
        if entity.id().is_none() {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            entity.set_id(&EntityId::from(format!("srv-{n}")));
        }
    }

    fn store(&self, collection: &str, mut entity: Entity) -> SyncResult<Entity> {
        self.assign_id(&mut entity);
        entity.touch(Timestamp::now())?;

        let mut collections = self.lock()?;
        let stored = collections.entry(collection.to_string()).or_default();
        let id = entity.id();
        match stored.iter_mut().find(|e| e.id() == id) {
            Some(slot) => *slot = entity.clone(),
            None => stored.push(entity.clone()),
        }
        Ok(entity)
    }

    fn not_found(collection: &str, id: &EntityId) -> SyncError {
        SyncError::NotFound(format!("entity {id} in collection {collection}"))
    }
}

#[async_trait]
impl Repository for MockNetwork {
    async fn create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        self.enter()?;
        entities
            .into_iter()
            .map(|entity| self.store(collection, entity))
            .collect()
    }

    async fn read(
        &self,
        collection: &str,
        query: Option<&Query>,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        self.enter()?;
        let entities = self.entities(collection)?;
        match query {
            Some(query) if query.is_supported_offline() => Ok(query.process(entities)?),
            // No geo index here; proximity queries see the whole collection.
            _ => Ok(entities),
        }
    }

    async fn read_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        _options: &RequestOptions,
    ) -> SyncResult<Entity> {
        self.enter()?;
        self.entities(collection)?
            .into_iter()
            .find(|e| e.id().as_ref() == Some(id))
            .ok_or_else(|| Self::not_found(collection, id))
    }

    async fn update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        _options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        self.enter()?;
        entities
            .into_iter()
            .map(|entity| match entity.id() {
                Some(_) => self.store(collection, entity),
                None => Err(SyncError::Rejected {
                    status: 400,
                    message: "update requires an _id".to_string(),
                }),
            })
            .collect()
    }

    async fn delete(
        &self,
        collection: &str,
        query: Option<&Query>,
        _options: &RequestOptions,
    ) -> SyncResult<usize> {
        self.enter()?;
        let mut collections = self.lock()?;
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = stored.len();
        match query {
            Some(query) => {
                let doomed: Vec<Option<EntityId>> = query
                    .process(stored.clone())?
                    .iter()
                    .map(Entity::id)
                    .collect();
                stored.retain(|e| !doomed.contains(&e.id()));
            }
            None => stored.clear(),
        }
        Ok(before - stored.len())
    }

    async fn delete_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        _options: &RequestOptions,
    ) -> SyncResult<usize> {
        self.enter()?;
        let mut collections = self.lock()?;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection, id))?;

        let before = stored.len();
        stored.retain(|e| e.id().as_ref() != Some(id));
        if stored.len() == before {
            return Err(Self::not_found(collection, id));
        }
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
        self.enter()?;
        Ok(aggregation.evaluate(self.entities(collection)?)?)
    }
}
