//! Core type definitions for Tether.
//!
//! This crate defines the plain data types shared by every other crate in the
//! workspace:
//! - [`Entity`], the JSON record stored in collections, and its [`Kmd`] metadata
//! - [`EntityId`], server-assigned or client-generated identifiers
//! - [`Timestamp`], millisecond wall-clock times
//!
//! Nothing here performs I/O.

mod entity;
mod ids;
mod timestamp;

pub use entity::{ACL_FIELD, Entity, ID_FIELD, KMD_FIELD, Kmd};
pub use ids::EntityId;
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
