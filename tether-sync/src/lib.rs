//! Offline-first data sync core for Tether.
//!
//! Lets an application read and write collections against a local store
//! while reconciling with a remote backend.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Repository**: CRUD over one backing store, either the local persister
//!   ([`OfflineRepository`]) or the backend ([`HttpRepository`])
//! - **Sync log**: [`SyncManager`] records local mutations not yet mirrored
//!   to the backend, one coalesced entry per entity, and replays them on push
//! - **Processors**: a [`DataProcessor`] runs one [`Operation`] under a
//!   data-access policy (network only, offline only, cache then network)
//! - **DataStore**: a collection-bound facade that picks the processor
//!
//! ## Cache-then-network reads
//!
//! 1. **Guard**: refuse while the collection has pending sync entries
//! 2. **Cache**: answer from the local store
//! 3. **Network**: read the same thing from the backend
//! 4. **Reconcile**: replace the cached entities with the network ones
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tether_storage::MemoryPersister;
//! use tether_sync::repository::mock::MockNetwork;
//! use tether_sync::{DataStore, DataStoreType, OfflineRepository, SyncConfig, SyncManager};
//!
//! let persister = Arc::new(MemoryPersister::new());
//! let sync = Arc::new(SyncManager::new(persister.clone(), SyncConfig::default()));
//! let offline = Arc::new(OfflineRepository::new(persister));
//! let network = Arc::new(MockNetwork::new());
//!
//! let store = DataStore::new("notes", DataStoreType::Sync, offline, network, sync);
//! assert_eq!(store.collection(), "notes");
//! ```

mod config;
mod datastore;
mod error;
mod operation;
pub mod processor;
pub mod repository;
mod sync_manager;

pub use config::{CacheConfig, NetworkConfig, SyncConfig, TetherConfig};
pub use datastore::{DataStore, DataStoreType, SyncSummary};
pub use error::{SyncError, SyncResult};
pub use operation::{Operation, OperationKind, OperationResult, RequestOptions};
pub use processor::{
    CacheOfflineDataProcessor, DataProcessor, NetworkDataProcessor, OfflineDataProcessor, Phase,
    ProcessOutput, TwoPhase,
};
pub use repository::{
    HttpRepository, LazyRepository, OfflineRepository, Repository, RepositoryProvider,
};
pub use sync_manager::{PushResult, SyncEntry, SyncManager, SyncOperation, coalesce};
