//! Error types for the sync layer.

use tether_query::QueryError;
use tether_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in repositories, processors and the sync log.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The requested entity or collection does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend answered with a 5xx status.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The backend refused the request with a 4xx status other than 404.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The caller passed something unusable. Raised before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Pending local mutations block a read that needs a clean remote view.
    #[error(
        "unable to {action} on collection {collection}: push the {pending} pending sync item(s) first"
    )]
    SyncConflict {
        collection: String,
        pending: usize,
        action: String,
    },

    /// The local storage engine failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport failure: unreachable backend, timeout or malformed response.
    #[error("network error: {0}")]
    Network(String),

    /// Query construction or evaluation error.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An entity could not be built or stamped.
    #[error("entity error: {0}")]
    Entity(#[from] tether_types::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether this is a [`SyncError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_action_and_count() {
        let err = SyncError::SyncConflict {
            collection: "notes".into(),
            pending: 3,
            action: "read".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("unable to read"));
        assert!(msg.contains("notes"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn retryable_kinds() {
        assert!(SyncError::Network("timeout".into()).is_retryable());
        assert!(
            SyncError::Server {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!SyncError::NotFound("x".into()).is_retryable());
        assert!(
            !SyncError::Rejected {
                status: 400,
                message: String::new()
            }
            .is_retryable()
        );
    }
}
