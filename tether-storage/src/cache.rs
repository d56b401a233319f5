//! Memory cache layer over any storage engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

use tether_types::Entity;

use crate::error::{StorageError, StorageResult};
use crate::persister::KeyValuePersister;

/// Configuration for the persister memory cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether reads are served from memory once loaded.
    pub enabled: bool,
    /// Entries are dropped this long after they were filled. `None` keeps
    /// them until the key is written or deleted.
    pub ttl_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: None,
        }
    }
}

type CacheMap = Arc<RwLock<HashMap<String, Vec<Entity>>>>;

/// Wraps a persister with a per-instance memory cache.
///
/// Every write to a key refills its cache entry; every delete drops it. With
/// a TTL configured, each fill schedules an invalidation task. Rewriting or
/// deleting the key cancels the pending task, and dropping the persister
/// cancels all of them.
///
/// Each key carries a write generation. A read that misses the cache only
/// fills it if no write to the key completed while the backend read was in
/// flight, so a slow read never overwrites a newer list.
pub struct CachedPersister<P> {
    inner: P,
    config: CacheConfig,
    cache: CacheMap,
    timers: Mutex<HashMap<String, AbortHandle>>,
    generations: Mutex<HashMap<String, u64>>,
}

impl<P: KeyValuePersister> CachedPersister<P> {
    /// Wraps `inner` with the given cache configuration.
    pub fn new(inner: P, config: CacheConfig) -> Self {
        Self {
            inner,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            timers: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped engine.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Whether `key` is currently served from memory.
    pub fn is_cached(&self, key: &str) -> bool {
        self.cache
            .read()
            .map(|cache| cache.contains_key(key))
            .unwrap_or(false)
    }

    /// Drops the cache entry for `key` without touching the backend.
    pub fn invalidate(&self, key: &str) -> StorageResult<()> {
        self.cancel_timer(key)?;
        self.cache.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    /// Drops every cache entry.
    pub fn clear_cache(&self) -> StorageResult<()> {
        for (_, handle) in self.timers.lock().map_err(poisoned)?.drain() {
            handle.abort();
        }
        self.cache.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn fill(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        self.cancel_timer(key)?;
        self.cache
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), entities);

        if let Some(ttl) = self.config.ttl_ms {
            let cache = Arc::clone(&self.cache);
            let owned_key = key.to_string();
            let task = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ttl)).await;
                if let Ok(mut cache) = cache.write() {
                    cache.remove(&owned_key);
                    debug!("Cache entry for {} expired", owned_key);
                }
            });
            self.timers
                .lock()
                .map_err(poisoned)?
                .insert(key.to_string(), task.abort_handle());
        }
        Ok(())
    }

    /// Current write generation of `key`.
    fn generation(&self, key: &str) -> StorageResult<u64> {
        Ok(self
            .generations
            .lock()
            .map_err(poisoned)?
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    /// Fills `key` from a read started at generation `seen`, unless a write
    /// landed since.
    fn fill_if_current(&self, key: &str, seen: u64, entities: Vec<Entity>) -> StorageResult<()> {
        let generations = self.generations.lock().map_err(poisoned)?;
        if generations.get(key).copied().unwrap_or(0) != seen {
            debug!("Skipping cache fill for {}: written during read", key);
            return Ok(());
        }
        self.fill(key, entities)
    }

    /// Records a completed write to `key`, then refills or drops its entry.
    fn written(&self, key: &str, entities: Option<Vec<Entity>>) -> StorageResult<()> {
        let mut generations = self.generations.lock().map_err(poisoned)?;
        let generation = generations.entry(key.to_string()).or_insert(0);
        *generation = generation.wrapping_add(1);
        match entities {
            Some(entities) => self.fill(key, entities),
            None => self.invalidate(key),
        }
    }

    fn cancel_timer(&self, key: &str) -> StorageResult<()> {
        if let Some(handle) = self.timers.lock().map_err(poisoned)?.remove(key) {
            handle.abort();
        }
        Ok(())
    }
}

impl<P> Drop for CachedPersister<P> {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Lock("persister cache".to_string())
}

#[async_trait]
impl<P: KeyValuePersister> KeyValuePersister for CachedPersister<P> {
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>> {
        if !self.config.enabled {
            return self.inner.read_entities(key).await;
        }

        if let Some(hit) = self.cache.read().map_err(poisoned)?.get(key).cloned() {
            return Ok(hit);
        }

        let seen = self.generation(key)?;
        let entities = self.inner.read_entities(key).await?;
        self.fill_if_current(key, seen, entities.clone())?;
        Ok(entities)
    }

    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        if !self.config.enabled {
            return self.inner.persist_entities(key, entities).await;
        }

        match self.inner.persist_entities(key, entities.clone()).await {
            Ok(()) => self.written(key, Some(entities)),
            Err(e) => {
                self.written(key, None)?;
                Err(e)
            }
        }
    }

    async fn delete_entities(&self, key: &str) -> StorageResult<bool> {
        let result = self.inner.delete_entities(key).await;
        if self.config.enabled {
            self.written(key, None)?;
        }
        result
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.get_keys().await
    }
}
