//! SQLite storage engine.
//!
//! Entities live in a single table keyed by `(collection, id)`, serialized as
//! JSON. A `position` column preserves the order of the persisted list.

use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tether_types::Entity;

use crate::error::{StorageError, StorageResult};
use crate::persister::{KeyValuePersister, ensure_unique_ids};

/// Persister backed by a SQLite database.
///
/// SQLite calls block, so every operation runs on tokio's blocking pool.
#[derive(Clone)]
pub struct SqlitePersister {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersister {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entities (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                position INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Lock("sqlite connection".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Row id for an entity; entities without `_id` are keyed by position.
fn row_id(entity: &Entity, position: usize) -> String {
    entity
        .id()
        .map_or_else(|| format!("#{position}"), |id| id.into_string())
}

#[async_trait]
impl KeyValuePersister for SqlitePersister {
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>> {
        let key = key.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM entities WHERE collection = ?1 ORDER BY position, id",
            )?;
            let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;

            let mut entities = Vec::new();
            for data in rows {
                entities.push(serde_json::from_str(&data?)?);
            }
            Ok(entities)
        })
        .await
    }

    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        ensure_unique_ids(key, &entities)?;
        let key = key.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entities WHERE collection = ?1", params![key])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO entities (collection, id, position, data)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (index, entity) in entities.iter().enumerate() {
                    let data = serde_json::to_string(entity)?;
                    let position = i64::try_from(index)
                        .map_err(|_| StorageError::InvalidData("too many entities".to_string()))?;
                    stmt.execute(params![key, row_id(entity, index), position, data])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_entities(&self, key: &str) -> StorageResult<bool> {
        let key = key.to_string();
        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM entities WHERE collection = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT collection FROM entities ORDER BY collection")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
