//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with one table:
//! - objects(class_name, object_id, created_at, updated_at, payload)
//!
//! The connection lives on a dedicated executor thread; every operation
//! against it is submitted as a job and completes through a [`Task`].

pub mod schema;
pub mod sqlite;
pub mod executor;

pub use sqlite::{SqliteStore, SqlFragment, Scan, DbStats};
pub use executor::{Executor, Task};
