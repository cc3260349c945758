//! doorward-store: persistent enrollment gallery and access log.
//!
//! SQLite holds enrollments and the append-only access log. A JSON-lines
//! file serves as the fallback audit sink, and reference photos live in a
//! per-environment directory tree.

mod error;
pub mod jsonl;
pub mod photos;
mod schema;
pub mod sqlite;

pub use error::StoreError;
pub use jsonl::JsonlAuditLog;
pub use photos::PhotoStore;
pub use sqlite::SqliteStore;
