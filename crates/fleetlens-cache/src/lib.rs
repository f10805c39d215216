//! Fleetlens Cache -- queryable cache for oversized telemetry results.
//!
//! Large result sets are persisted as SQLite tables instead of being pushed
//! through the assistant's context. Callers later run read-only SQL against
//! them. The crate is split into:
//!
//! - [`sanitize`]: table-name fragments and the strict table-name pattern.
//! - [`guard`]: read-only query validation and row-cap wrapping.
//! - [`dataset`]: the tabular input/output model.
//! - [`ledger`]: the durable per-table metadata record.
//! - [`store`]: the [`TableStore`] that owns the database connection.
//! - [`governor`]: age/LRU eviction and same-session consolidation.

pub mod dataset;
pub mod governor;
pub mod guard;
pub mod ledger;
pub mod sanitize;
pub mod store;

pub use dataset::{ColumnType, QueryMetadata, QueryOutput, ResultSet};
pub use governor::{CleanupPolicy, CleanupStats, ConsolidationStats};
pub use ledger::CachedTable;
pub use store::{CacheInfo, DatasetListing, Provenance, TableStore};

/// Prefix every cached table name carries.
pub const TABLE_PREFIX: &str = "ace";

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A table name does not match `ace_[A-Za-z0-9_]+`.
    #[error("invalid table name '{name}': table names must match ace_[A-Za-z0-9_]+")]
    InvalidIdentifier { name: String },

    /// A submitted query is not a pure read.
    #[error("forbidden operation: {reason}")]
    ForbiddenOperation { reason: String },

    /// The configured storage path escapes the permitted directory tree.
    #[error("invalid storage path '{path}': {reason}")]
    PathValidation { path: String, reason: String },

    /// The engine rejected a policy-permitted query.
    #[error("query failed: {0}")]
    Query(String),

    /// The tabular input cannot be stored as a table.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for `Result<T, CacheError>`.
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// Returns `true` for errors raised at a validation boundary
    /// (identifier, query policy, storage path).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::ForbiddenOperation { .. }
                | Self::PathValidation { .. }
        )
    }
}
