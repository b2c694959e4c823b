//! Persistence coordinator - backend ownership and debounced flushing
//!
//! The coordinator owns the store's [`ActiveBackend`] and decides when a JSON
//! snapshot is due. Relational backends write through on every mutation, so
//! for them a flush is a no-op; the mutation counter still runs, since hosts
//! surface it as a liveness signal either way.
//!
//! Debounce rule for the JSON backend: a flush is due once the counter
//! reaches the threshold and the guard interval has passed since the last
//! flush, or unconditionally once the staleness bound has passed. The due
//! decision and the counter reset happen under one lock, so a burst of
//! concurrent mutations elects exactly one flusher.

use crate::codec;
use crate::collection::NamedMap;
use crate::config::{BackendConfig, StoreConfig};
use crate::storage::{ActiveBackend, JsonSnapshot, SqlStore, SqliteStore};
use crate::store::Shared;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Root key of the snapshot file
pub(crate) const GLOBALS_KEY: &str = "global_vars";

struct FlushState {
    pending: u64,
    last_flush: Instant,
}

pub(crate) struct PersistenceCoordinator {
    backend: Mutex<ActiveBackend>,
    flush: Mutex<FlushState>,
    threshold: u64,
    min_interval: Duration,
    max_interval: Duration,
    // Kind flags cached at construction; the backend variant never changes
    json: bool,
    relational: bool,
}

fn open_backend(config: &BackendConfig) -> Result<ActiveBackend> {
    match config {
        BackendConfig::None => Ok(ActiveBackend::Unconfigured),
        BackendConfig::Json { path } => Ok(ActiveBackend::Json(JsonSnapshot::new(path.clone())?)),
        BackendConfig::Sqlite { path } => {
            Ok(ActiveBackend::Sql(Box::new(SqliteStore::open(path)?)))
        }
        BackendConfig::Mysql { url } => open_mysql(url),
    }
}

#[cfg(feature = "mysql")]
fn open_mysql(url: &str) -> Result<ActiveBackend> {
    Ok(ActiveBackend::Sql(Box::new(
        crate::storage::MySqlStore::connect(url)?,
    )))
}

#[cfg(not(feature = "mysql"))]
fn open_mysql(_url: &str) -> Result<ActiveBackend> {
    Err(Error::BackendUnavailable(
        "mysql (built without the `mysql` feature)",
    ))
}

impl PersistenceCoordinator {
    pub(crate) fn new(config: &StoreConfig) -> Result<Self> {
        let backend = open_backend(&config.backend)?;
        let kind = match &backend {
            ActiveBackend::Unconfigured => "none",
            ActiveBackend::Json(_) => "json",
            ActiveBackend::Sql(_) => "sql",
        };
        tracing::info!(backend = kind, "persistence configured");

        let json = matches!(backend, ActiveBackend::Json(_));
        let relational = backend.is_relational();
        Ok(Self {
            backend: Mutex::new(backend),
            flush: Mutex::new(FlushState {
                pending: 0,
                last_flush: Instant::now(),
            }),
            threshold: config.flush_threshold,
            min_interval: config.flush_min_interval(),
            max_interval: config.flush_max_interval(),
            json,
            relational,
        })
    }

    pub(crate) fn is_relational(&self) -> bool {
        self.relational
    }

    pub(crate) fn is_json(&self) -> bool {
        self.json
    }

    /// Run a closure against the relational backend, holding its lock for
    /// the duration.
    pub(crate) fn with_sql<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn SqlStore) -> Result<T>,
    ) -> Result<T> {
        let guard = self.backend.lock();
        match &*guard {
            ActiveBackend::Sql(sql) => f(sql.as_ref()),
            _ => Err(Error::BackendUnavailable(operation)),
        }
    }

    /// Record one mutation; returns true when the caller should flush now.
    ///
    /// When a flush is elected the counter and clock reset immediately, under
    /// the same lock, so concurrent mutators cannot elect a second one.
    pub(crate) fn note_mutation(&self) -> bool {
        let mut state = self.flush.lock();
        state.pending += 1;
        if !self.json {
            return false;
        }
        let elapsed = state.last_flush.elapsed();
        let due = (state.pending >= self.threshold && elapsed >= self.min_interval)
            || elapsed >= self.max_interval;
        if due {
            state.pending = 0;
            state.last_flush = Instant::now();
        }
        due
    }

    /// Mutations recorded since the last flush
    pub(crate) fn pending(&self) -> u64 {
        self.flush.lock().pending
    }

    /// Read the snapshot file; `Ok(None)` when no snapshot backend is
    /// configured or the file does not exist yet.
    pub(crate) fn read_snapshot(&self) -> Result<Option<serde_json::Value>> {
        let guard = self.backend.lock();
        match &*guard {
            ActiveBackend::Json(snapshot) => snapshot.read(),
            _ => Ok(None),
        }
    }

    /// Write a snapshot tree; a no-op (returning false) for non-JSON
    /// backends, where durability already happened at mutation time.
    pub(crate) fn write_snapshot(&self, tree: &serde_json::Value) -> Result<bool> {
        let guard = self.backend.lock();
        match &*guard {
            ActiveBackend::Json(snapshot) => {
                snapshot.write(tree)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Reset the debounce state after a completed flush
    pub(crate) fn mark_flushed(&self) {
        let mut state = self.flush.lock();
        state.pending = 0;
        state.last_flush = Instant::now();
    }
}

// ========== Snapshot tree <-> namespace ==========

/// Serialize the global namespace as the snapshot tree
/// `{"global_vars": {<name>: <json tree>, ...}}`.
///
/// The namespace lock is not held by the caller; each entry is read through
/// the collection's own lock, so a flush never blocks mutators for the whole
/// serialization.
pub(crate) fn snapshot_tree(namespace: &NamedMap) -> Result<serde_json::Value> {
    let mut globals = serde_json::Map::new();
    for (name, value) in namespace.iter()? {
        globals.insert(name, codec::to_json_tree(&value)?);
    }
    let mut root = serde_json::Map::new();
    root.insert(GLOBALS_KEY.to_string(), serde_json::Value::Object(globals));
    Ok(serde_json::Value::Object(root))
}

/// The tree an empty namespace serializes to
pub(crate) fn empty_snapshot() -> serde_json::Value {
    let mut root = serde_json::Map::new();
    root.insert(
        GLOBALS_KEY.to_string(),
        serde_json::Value::Object(serde_json::Map::new()),
    );
    serde_json::Value::Object(root)
}

/// Rebuild a `Local` namespace from a snapshot tree. A root without the
/// `global_vars` member is treated as an empty namespace; any other shape is
/// a format error.
pub(crate) fn namespace_from_tree(
    tree: &serde_json::Value,
    shared: &Arc<Shared>,
) -> Result<NamedMap> {
    let root = tree
        .as_object()
        .ok_or_else(|| Error::Format("snapshot root is not an object".to_string()))?;
    let globals = match root.get(GLOBALS_KEY) {
        None => return Ok(NamedMap::new_local(shared)),
        Some(serde_json::Value::Object(globals)) => globals,
        Some(other) => {
            return Err(Error::Format(format!(
                "snapshot {} member is not an object: {}",
                GLOBALS_KEY, other
            )))
        }
    };

    let mut entries = BTreeMap::new();
    for (name, value) in globals {
        entries.insert(name.clone(), codec::from_json_tree(value, shared)?);
    }
    Ok(NamedMap::from_entries(shared, entries))
}
