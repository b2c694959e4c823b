//! # Varstore - Persistent Value & Collection Storage
//!
//! A persistent, type-tagged value store for embedded scripting runtimes.
//!
//! Varstore provides:
//! - Tagged [`Value`] representation (none, integer, decimal, text, boolean, list, map)
//! - Dual-backend collections: heap-resident (`Local`) or SQL-table-resident (`Remote`)
//! - A one-way `promote` operation moving a live collection into the relational backend
//!   without breaking outstanding references
//! - A global variable namespace ([`NamedMap`]) that survives process restarts
//! - Debounced JSON snapshot persistence, or write-through SQLite/MySQL storage
//!
//! ## Threading contract
//!
//! Every collection handle is internally synchronized: concurrent structural
//! mutation of the same collection from several threads is serialized, not
//! undefined. Cross-collection and cross-thread
//! *ordering* is still the caller's problem: absent external synchronization,
//! two threads mutating the same collection interleave in an unspecified
//! order. Backend calls are synchronous and block the calling thread; there is
//! no cancellation or timeout support.

pub mod value;
pub mod identity;
pub mod collection;
pub mod codec;
pub mod storage;
pub mod persist;
pub mod store;
pub mod config;

// Re-exports for convenient access
pub use value::{Value, ValueKind};
pub use identity::CollectionIdentity;
pub use collection::{List, Map, NamedMap};
pub use store::Store;
pub use config::{BackendConfig, StoreConfig};

/// Result type alias for varstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for varstore operations.
///
/// Structural errors (`TypeMismatch`, `IndexOutOfBounds`, `SelfContainment`)
/// mean the request was invalid; `Backend` means the store is unavailable or
/// failing. Backend failures are surfaced as-is and never retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: ValueKind, actual: ValueKind },

    #[error("list index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("a collection cannot contain itself")]
    SelfContainment,

    #[error("collection is already table-backed; promote is one-way and one-shot")]
    AlreadyRemote,

    #[error("invalid variable name: {0}")]
    InvalidName(String),

    #[error("no backend available for {0}")]
    BackendUnavailable(&'static str),

    #[error("backend error during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("malformed persisted data: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a low-level driver/IO failure with the operation that hit it
    pub(crate) fn backend(
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Backend { operation, source: Box::new(source) }
    }
}
