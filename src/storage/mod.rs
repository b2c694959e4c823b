//! Storage backends
//!
//! A store is configured with at most one backend: a JSON snapshot file
//! (namespace-level persistence, debounced), or a relational store (SQLite or
//! MySQL) that `Remote` collections write through to. All relational traffic
//! for a store goes through the single connection owned by its persistence
//! coordinator.

pub mod schema;
pub mod sqlite;
pub mod json;
#[cfg(feature = "mysql")]
pub mod mysql;

pub use json::JsonSnapshot;
pub use sqlite::SqliteStore;
#[cfg(feature = "mysql")]
pub use mysql::MySqlStore;

use crate::codec::EncodedRow;
use crate::collection::CollectionKind;
use crate::Result;

/// The relational operations collections need from a SQL backend.
///
/// Implementations wrap driver failures into [`crate::Error::Backend`] with
/// the operation that hit them; they never retry.
pub trait SqlStore: Send {
    /// Check whether a table with this exact name exists
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create the table for a collection kind (idempotent)
    fn create_table(&self, kind: CollectionKind, table: &str) -> Result<()>;

    /// Drop a table; used to undo a failed promote
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Row count of any collection table
    fn count(&self, table: &str) -> Result<usize>;

    /// Names of all tables starting with `prefix`. Used at store open to
    /// resume identity allocation past tables left by a previous process.
    fn table_names(&self, prefix: &str) -> Result<Vec<String>>;

    // ========== List tables ==========

    /// Point query by index
    fn list_get(&self, table: &str, index: usize) -> Result<Option<EncodedRow>>;

    /// Insert a row at an explicit index (caller keeps indices contiguous)
    fn list_put(&self, table: &str, index: usize, row: &EncodedRow) -> Result<()>;

    /// Overwrite the row at an index
    fn list_set(&self, table: &str, index: usize, row: &EncodedRow) -> Result<()>;

    /// Delete the row at an index and shift all subsequent rows down by one.
    /// O(n) in the table size; the documented cost of SQL-backed lists.
    fn list_remove(&self, table: &str, index: usize) -> Result<()>;

    /// All rows in index order (one cursor, drained at call time)
    fn list_rows(&self, table: &str) -> Result<Vec<EncodedRow>>;

    // ========== Map tables ==========

    /// Point query by encoded key. An absent key payload matches with
    /// `IS NULL`, which is how `Boolean(false)` and `None` keys stay
    /// addressable.
    fn map_get(&self, table: &str, key: &EncodedRow) -> Result<Option<EncodedRow>>;

    /// Upsert a key/value pair
    fn map_put(&self, table: &str, key: &EncodedRow, value: &EncodedRow) -> Result<()>;

    /// Delete a key, returning the previous value row if present
    fn map_remove(&self, table: &str, key: &EncodedRow) -> Result<Option<EncodedRow>>;

    /// All entries (one cursor, drained at call time)
    fn map_rows(&self, table: &str) -> Result<Vec<(EncodedRow, EncodedRow)>>;

    // ========== Named-map tables ==========

    /// Point query by name
    fn named_get(&self, table: &str, name: &str) -> Result<Option<EncodedRow>>;

    /// Upsert a named entry
    fn named_put(&self, table: &str, name: &str, value: &EncodedRow) -> Result<()>;

    /// Delete a named entry, returning the previous value row if present
    fn named_remove(&self, table: &str, name: &str) -> Result<Option<EncodedRow>>;

    /// All entries in name order (one cursor, drained at call time)
    fn named_rows(&self, table: &str) -> Result<Vec<(String, EncodedRow)>>;

    /// Delete every row of a table (namespace regeneration)
    fn clear(&self, table: &str) -> Result<()>;
}

/// The backend a store was configured with
pub enum ActiveBackend {
    /// No persistence: everything stays `Local` and in-process
    Unconfigured,
    /// Debounced whole-namespace snapshots to a JSON file
    Json(JsonSnapshot),
    /// Write-through relational storage
    Sql(Box<dyn SqlStore>),
}

impl ActiveBackend {
    /// Whether this backend supports `Remote` collections
    pub fn is_relational(&self) -> bool {
        matches!(self, ActiveBackend::Sql(_))
    }
}
