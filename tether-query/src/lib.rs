//! Query evaluation for Tether.
//!
//! Queries are evaluated against entity arrays that are already in memory:
//! whatever a persister or a network read returned. A [`Query`] combines a
//! [`Filter`] tree with a sort specification, skip/limit pagination and an
//! optional field projection. [`Aggregation`] groups the matching entities
//! and reduces each group to a single value.
//!
//! Filters use the Mongo-style JSON expression the backend understands, so
//! the same [`Filter`] can be evaluated locally or handed to the network
//! layer via [`Filter::to_value`].
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tether_query::Query;
//! use tether_types::Entity;
//!
//! let entities = vec![
//!     Entity::from_value(json!({"_id": "1", "age": 30})).unwrap(),
//!     Entity::from_value(json!({"_id": "2", "age": 20})).unwrap(),
//! ];
//!
//! let query = Query::new().greater_than("age", json!(25)).ascending("age");
//! let result = query.process(entities).unwrap();
//! assert_eq!(result.len(), 1);
//! ```

mod aggregation;
mod error;
mod filter;
mod query;
mod sort;

pub use aggregation::{Aggregation, Reduce};
pub use error::{QueryError, QueryResult};
pub use filter::{Condition, Filter, Pattern};
pub use query::{PROTECTED_FIELDS, Query};
pub use sort::{SortDirection, compare_values};
