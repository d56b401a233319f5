//! Error types for query evaluation.

use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors that can occur while building or evaluating a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The filter expression is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The filter uses an operator this evaluator does not know.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// A `$regex` pattern failed to compile.
    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// The query contains operators that can only be evaluated by the backend.
    #[error("query cannot be evaluated offline: {0}")]
    UnsupportedOffline(String),

    /// The aggregation is malformed.
    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),
}
