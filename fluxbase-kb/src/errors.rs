//! Error types shared across the knowledge-base store, search, graph, and
//! quota modules.

use thiserror::Error;
use uuid::Uuid;

/// Errors from `fluxbase-kb` operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KBError {
    /// No row with the given id.
    #[error("{what} {id} not found")]
    NotFound {
        /// What kind of row (`"knowledge base"`, `"document"`, ...).
        what: &'static str,
        /// The id that was looked up.
        id: Uuid,
    },

    /// No knowledge base with the given `(namespace, name)` pair.
    #[error("knowledge base {name:?} not found in namespace {namespace:?}")]
    NotFoundByName {
        /// The namespace searched.
        namespace: String,
        /// The name searched.
        name: String,
    },

    /// A `KnowledgeBase` invariant was violated.
    #[error("invalid knowledge base: {0}")]
    InvalidKnowledgeBase(&'static str),

    /// A quota ceiling would be exceeded by this write.
    #[error("quota exceeded: {resource} usage {used} would exceed max {max}")]
    QuotaExceeded {
        /// Which resource (`"documents"`, `"chunks"`, `"storage_bytes"`).
        resource: &'static str,
        /// Usage after this write.
        used: i64,
        /// The configured ceiling.
        max: i64,
    },

    /// A chunk's embedding dimension didn't match its KB's configured
    /// dimensionality.
    #[error("embedding has {actual} dimensions, knowledge base expects {expected}")]
    DimensionMismatch {
        /// Dimensions the embedding actually has.
        actual: usize,
        /// Dimensions the owning KB is configured for.
        expected: usize,
    },

    /// Metadata filter compilation failed.
    #[error("filter error: {0}")]
    Filter(#[from] fluxbase_filter::FilterError),

    /// The database rejected or failed to execute a query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
