use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tether_storage::{
    CacheConfig, CachedPersister, KeyValuePersister, MemoryPersister, SqlitePersister,
    StorageError, StorageResult,
};
use tokio::sync::Notify;
use tether_types::Entity;

/// Counts backend reads and can be switched to fail writes.
#[derive(Default)]
struct CountingPersister {
    inner: MemoryPersister,
    reads: AtomicUsize,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl CountingPersister {
    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValuePersister for CountingPersister {
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_entities(key).await
    }

    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidData("disk full".to_string()));
        }
        self.inner.persist_entities(key, entities).await
    }

    async fn delete_entities(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete_entities(key).await
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.get_keys().await
    }
}

/// Parks every read after it loaded its data, until released.
#[derive(Default)]
struct SlowReadPersister {
    inner: MemoryPersister,
    loaded: Notify,
    release: Notify,
}

#[async_trait]
impl KeyValuePersister for SlowReadPersister {
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>> {
        let entities = self.inner.read_entities(key).await?;
        self.loaded.notify_one();
        self.release.notified().await;
        Ok(entities)
    }

    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        self.inner.persist_entities(key, entities).await
    }

    async fn delete_entities(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete_entities(key).await
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.get_keys().await
    }
}

fn note(id: &str) -> Entity {
    Entity::from_value(json!({"_id": id, "text": "hello"})).unwrap()
}

fn cached(config: CacheConfig) -> CachedPersister<Arc<CountingPersister>> {
    CachedPersister::new(Arc::new(CountingPersister::default()), config)
}

#[tokio::test]
async fn repeated_reads_hit_memory() {
    let persister = cached(CacheConfig::default());
    persister.inner().inner.persist_entities("notes", vec![note("n1")]).await.unwrap();

    assert_eq!(persister.read_entities("notes").await.unwrap().len(), 1);
    assert_eq!(persister.read_entities("notes").await.unwrap().len(), 1);
    assert_eq!(persister.inner().reads(), 1);
    assert!(persister.is_cached("notes"));
}

#[tokio::test]
async fn writes_refresh_the_cache() {
    let persister = cached(CacheConfig::default());
    persister.persist_entities("notes", vec![note("n1")]).await.unwrap();
    persister
        .persist_entities("notes", vec![note("n1"), note("n2")])
        .await
        .unwrap();

    assert_eq!(persister.read_entities("notes").await.unwrap().len(), 2);
    assert_eq!(persister.inner().reads(), 0);
}

#[tokio::test]
async fn delete_invalidates() {
    let persister = cached(CacheConfig::default());
    persister.persist_entities("notes", vec![note("n1")]).await.unwrap();
    assert!(persister.delete_entities("notes").await.unwrap());

    assert!(!persister.is_cached("notes"));
    assert!(persister.read_entities("notes").await.unwrap().is_empty());
    assert_eq!(persister.inner().reads(), 1);
}

#[tokio::test]
async fn failed_write_drops_stale_entry() {
    let persister = cached(CacheConfig::default());
    persister.persist_entities("notes", vec![note("n1")]).await.unwrap();

    persister.inner().fail_writes.store(true, Ordering::SeqCst);
    let err = persister.persist_entities("notes", vec![note("n2")]).await;
    assert!(matches!(err, Err(StorageError::InvalidData(_))));
    assert!(!persister.is_cached("notes"));

    let stored = persister.read_entities("notes").await.unwrap();
    assert_eq!(stored, vec![note("n1")]);
}

#[tokio::test]
async fn disabled_cache_passes_through() {
    let persister = cached(CacheConfig {
        enabled: false,
        ttl_ms: None,
    });
    persister.persist_entities("notes", vec![note("n1")]).await.unwrap();
    persister.read_entities("notes").await.unwrap();
    persister.read_entities("notes").await.unwrap();

    assert_eq!(persister.inner().reads(), 2);
    assert!(!persister.is_cached("notes"));
}

#[tokio::test]
async fn clear_cache_forces_reload() {
    let persister = cached(CacheConfig::default());
    persister.persist_entities("a", vec![note("n1")]).await.unwrap();
    persister.persist_entities("b", vec![note("n2")]).await.unwrap();

    persister.clear_cache().unwrap();
    assert!(!persister.is_cached("a"));
    persister.read_entities("a").await.unwrap();
    assert_eq!(persister.inner().reads(), 1);
}

// ── Concurrent reads and writes ──────────────────────────────────

#[tokio::test]
async fn read_overlapping_a_write_keeps_the_newer_list() {
    let persister = Arc::new(CachedPersister::new(
        Arc::new(SlowReadPersister::default()),
        CacheConfig::default(),
    ));
    persister
        .inner()
        .inner
        .persist_entities("notes", vec![note("old")])
        .await
        .unwrap();

    let reader = {
        let persister = Arc::clone(&persister);
        tokio::spawn(async move { persister.read_entities("notes").await })
    };
    persister.inner().loaded.notified().await;
    persister.persist_entities("notes", vec![note("new")]).await.unwrap();
    persister.inner().release.notify_one();

    let seen = reader.await.unwrap().unwrap();
    assert_eq!(seen[0].id().unwrap().as_str(), "old");

    let current = persister.read_entities("notes").await.unwrap();
    assert_eq!(current[0].id().unwrap().as_str(), "new");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cache_agrees_with_sqlite_after_racing_read_and_write() {
    let persister = Arc::new(CachedPersister::new(
        SqlitePersister::open_in_memory().unwrap(),
        CacheConfig::default(),
    ));
    let version = |v: u64| Entity::from_value(json!({"_id": "k1", "v": v})).unwrap();

    for round in 0..100 {
        persister.persist_entities("k", vec![version(round)]).await.unwrap();
        persister.invalidate("k").unwrap();

        let reader = {
            let persister = Arc::clone(&persister);
            tokio::spawn(async move { persister.read_entities("k").await })
        };
        let writer = {
            let persister = Arc::clone(&persister);
            tokio::spawn(async move { persister.persist_entities("k", vec![version(round + 1)]).await })
        };
        reader.await.unwrap().unwrap();
        writer.await.unwrap().unwrap();

        let cached = persister.read_entities("k").await.unwrap();
        let disk = persister.inner().read_entities("k").await.unwrap();
        assert_eq!(cached, disk, "round {round}");
    }
}

// ── TTL ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn entries_expire_after_ttl() {
    let persister = cached(CacheConfig {
        enabled: true,
        ttl_ms: Some(1_000),
    });
    persister.persist_entities("notes", vec![note("n1")]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert!(persister.is_cached("notes"));

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(!persister.is_cached("notes"));

    assert_eq!(persister.read_entities("notes").await.unwrap().len(), 1);
    assert_eq!(persister.inner().reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn rewrite_restarts_ttl() {
    let persister = cached(CacheConfig {
        enabled: true,
        ttl_ms: Some(1_000),
    });
    persister.persist_entities("notes", vec![note("n1")]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    persister.persist_entities("notes", vec![note("n2")]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(persister.is_cached("notes"));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!persister.is_cached("notes"));
}
