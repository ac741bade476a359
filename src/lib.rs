//! # Graphcache - embedded object-graph cache
//!
//! Mirrors graph-structured application objects (a root object plus every
//! object it transitively references) into a local SQLite store, and
//! reconstructs equivalent objects back into memory.
//!
//! Graphcache provides:
//! - Cycle-safe graph walks for save and cascading remove
//! - A process-wide subclass registry mapping class names to row types
//! - A composable query builder evaluated by the storage engine
//! - A serial execution context that confines the SQLite connection to one thread

pub mod object;
pub mod codec;
pub mod row;
pub mod registry;
pub mod graph;
pub mod storage;
pub mod store;
pub mod query;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use object::{Object, ObjectKey, ObjectRef, Value};
pub use codec::{Decoder, Encoded};
pub use row::Row;
pub use registry::{GenericRow, RowType, SchemaRow, SubclassRegistry};
pub use storage::{DbStats, SqliteStore, Task};
pub use store::Store;
pub use query::{Condition, Connective, Filter, Literal, Order, Query};
pub use config::StoreConfig;

/// Result type alias for Graphcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Graphcache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Cannot decode {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Row type declares class `{declared}` but was registered as `{requested}`")]
    ClassMismatch { requested: String, declared: String },

    #[error("Row type does not declare a class name")]
    UndeclaredClass,

    #[error("Object {0} has no data available")]
    DataUnavailable(String),

    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaMismatch { found: i64, supported: i64 },

    #[error("Store executor has shut down")]
    ExecutorClosed,

    #[error("Store operation panicked: {0}")]
    Panicked(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with the operation that produced it
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn decode(key: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Error::Decode {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
