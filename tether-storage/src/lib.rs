//! Key-value persistence layer for Tether.
//!
//! Every storage engine exposes the same small contract,
//! [`KeyValuePersister`]: read, replace and delete the whole entity list
//! stored under a collection key, and enumerate the keys. Repositories build
//! CRUD on top of that contract; engines never interpret entities beyond
//! their `_id`.
//!
//! # Engines
//!
//! - [`MemoryPersister`]: process-local map, nothing survives a restart
//! - [`SqlitePersister`]: one SQLite table keyed by `(collection, id)`
//! - [`CachedPersister`]: wraps any engine with a per-instance memory cache
//!   and optional TTL invalidation
//!
//! Reading a key that was never written is not an error; it yields an empty
//! list.

mod cache;
mod error;
mod memory;
mod persister;
mod sqlite;

pub use cache::{CacheConfig, CachedPersister};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryPersister;
pub use persister::KeyValuePersister;
pub use sqlite::SqlitePersister;
