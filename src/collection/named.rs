//! Named maps - string-keyed collections
//!
//! Used only for the global-variable namespace: keys are short names (at most
//! 100 characters, the width of the backend `name` column). Local entries are
//! kept sorted by name, which also makes snapshots deterministic.

use super::{ensure_persistable, upgrade, CollectionKind};
use crate::codec;
use crate::identity::CollectionIdentity;
use crate::store::Shared;
use crate::value::Value;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Maximum variable-name length, matching the backend column width
pub const MAX_NAME_LEN: usize = 100;

enum NamedStore {
    Local(BTreeMap<String, Value>),
    Remote { table: String },
}

struct NamedInner {
    identity: CollectionIdentity,
    backend: NamedStore,
    modifications: u64,
    cached_len: Option<usize>,
}

/// A string-keyed collection. Cheap to clone; clones share the same
/// underlying map.
#[derive(Clone)]
pub struct NamedMap {
    inner: Arc<Mutex<NamedInner>>,
    store: Weak<Shared>,
}

impl NamedMap {
    pub(crate) fn new_local(shared: &Arc<Shared>) -> NamedMap {
        Self::from_entries(shared, BTreeMap::new())
    }

    pub(crate) fn from_entries(shared: &Arc<Shared>, entries: BTreeMap<String, Value>) -> NamedMap {
        NamedMap {
            inner: Arc::new(Mutex::new(NamedInner {
                identity: shared.next_identity(),
                backend: NamedStore::Local(entries),
                modifications: 0,
                cached_len: None,
            })),
            store: Arc::downgrade(shared),
        }
    }

    /// Attach to an existing backend table with an explicit name; used for
    /// the global namespace, whose table name is fixed rather than derived
    /// from an identity.
    pub(crate) fn attach_remote_table(shared: &Arc<Shared>, table: String) -> NamedMap {
        NamedMap {
            inner: Arc::new(Mutex::new(NamedInner {
                identity: shared.next_identity(),
                backend: NamedStore::Remote { table },
                modifications: 0,
                cached_len: None,
            })),
            store: Arc::downgrade(shared),
        }
    }

    /// The identity of this named map
    pub fn identity(&self) -> CollectionIdentity {
        self.inner.lock().identity
    }

    /// Whether this named map is table-backed
    pub fn is_remote(&self) -> bool {
        matches!(self.inner.lock().backend, NamedStore::Remote { .. })
    }

    pub fn modification_count(&self) -> u64 {
        self.inner.lock().modifications
    }

    fn remote_table(&self) -> Option<String> {
        match &self.inner.lock().backend {
            NamedStore::Remote { table } => Some(table.clone()),
            NamedStore::Local(_) => None,
        }
    }

    fn notify(&self) -> Result<()> {
        match self.store.upgrade() {
            Some(shared) => shared.notify_modified(),
            None => Ok(()),
        }
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName(format!(
                "{:.32}... ({} bytes, limit {})",
                name,
                name.len(),
                MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Number of entries
    pub fn len(&self) -> Result<usize> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    NamedStore::Local(entries) => Ok(entries.len()),
                    NamedStore::Remote { .. } => {
                        drop(guard);
                        self.len()
                    }
                }
            }
            Some(table) => {
                if let Some(n) = self.inner.lock().cached_len {
                    return Ok(n);
                }
                let shared = upgrade(&self.store, "named len")?;
                let n = shared.with_sql("named len", |sql| sql.count(&table))?;
                self.inner.lock().cached_len = Some(n);
                Ok(n)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Look up a name; an absent name is a normal `None`, not an error
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    NamedStore::Local(entries) => Ok(entries.get(name).cloned()),
                    NamedStore::Remote { .. } => {
                        drop(guard);
                        self.get(name)
                    }
                }
            }
            Some(table) => {
                let shared = upgrade(&self.store, "named get")?;
                match shared.with_sql("named get", |sql| sql.named_get(&table, name))? {
                    Some(row) => Ok(Some(codec::decode_row(&row, &shared)?)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Look up a name that must be present
    pub fn get_required(&self, name: &str) -> Result<Value> {
        self.get(name)?
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))
    }

    pub fn contains_name(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// Insert or replace an entry
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        Self::check_name(name)?;
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "named set")?;
                // May promote a nested collection; runs before our own lock
                let row = ensure_persistable(&value)?;
                let mut guard = self.inner.lock();
                shared.with_sql("named set", |sql| sql.named_put(&table, name, &row))?;
                guard.cached_len = None;
                guard.modifications += 1;
                drop(guard);
                self.notify()
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    NamedStore::Local(entries) => {
                        entries.insert(name.to_string(), value);
                        inner.modifications += 1;
                        drop(guard);
                        self.notify()
                    }
                    // Promoted between the probe and the lock; redo remotely
                    NamedStore::Remote { .. } => {
                        drop(guard);
                        self.set(name, value)
                    }
                }
            }
        }
    }

    /// Remove a name, returning the previous value if present
    pub fn remove(&self, name: &str) -> Result<Option<Value>> {
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "named remove")?;
                let mut guard = self.inner.lock();
                let previous =
                    shared.with_sql("named remove", |sql| sql.named_remove(&table, name))?;
                let removed = previous.is_some();
                if removed {
                    guard.cached_len = None;
                    guard.modifications += 1;
                }
                drop(guard);
                if removed {
                    self.notify()?;
                }
                match previous {
                    Some(row) => Ok(Some(codec::decode_row(&row, &shared)?)),
                    None => Ok(None),
                }
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    NamedStore::Local(entries) => match entries.remove(name) {
                        Some(value) => {
                            inner.modifications += 1;
                            drop(guard);
                            self.notify()?;
                            Ok(Some(value))
                        }
                        None => Ok(None),
                    },
                    NamedStore::Remote { .. } => {
                        drop(guard);
                        self.remove(name)
                    }
                }
            }
        }
    }

    /// Iterate over a snapshot of the entries, in name order
    pub fn iter(&self) -> Result<std::vec::IntoIter<(String, Value)>> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    NamedStore::Local(entries) => Ok(entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<Vec<_>>()
                        .into_iter()),
                    NamedStore::Remote { .. } => {
                        drop(guard);
                        self.iter()
                    }
                }
            }
            Some(table) => {
                let shared = upgrade(&self.store, "named scan")?;
                let rows = shared.with_sql("named scan", |sql| sql.named_rows(&table))?;
                let mut entries = Vec::with_capacity(rows.len());
                for (name, row) in &rows {
                    entries.push((name.clone(), codec::decode_row(row, &shared)?));
                }
                Ok(entries.into_iter())
            }
        }
    }

    /// Delete every entry (namespace regeneration)
    pub(crate) fn clear(&self) -> Result<()> {
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "named clear")?;
                let mut guard = self.inner.lock();
                shared.with_sql("named clear", |sql| sql.clear(&table))?;
                guard.cached_len = Some(0);
                guard.modifications += 1;
                drop(guard);
                self.notify()
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    NamedStore::Local(entries) => {
                        entries.clear();
                        inner.modifications += 1;
                        drop(guard);
                        self.notify()
                    }
                    NamedStore::Remote { .. } => {
                        drop(guard);
                        self.clear()
                    }
                }
            }
        }
    }

    /// Move this named map into the relational backend. One-way, one-shot,
    /// all-or-nothing like [`List::promote`](super::List::promote).
    pub fn promote(&self) -> Result<()> {
        let shared = upgrade(&self.store, "promote")?;
        let mut guard = self.inner.lock();
        let entries = match &guard.backend {
            NamedStore::Remote { .. } => return Err(Error::AlreadyRemote),
            NamedStore::Local(entries) => entries.clone(),
        };
        let identity = shared.next_remote_identity(CollectionKind::Named)?;
        let table = shared.table_name(CollectionKind::Named, identity);
        shared.with_sql("promote", |sql| sql.create_table(CollectionKind::Named, &table))?;

        let copy = (|| -> Result<()> {
            for (name, value) in &entries {
                let row = ensure_persistable(value)?;
                shared.with_sql("promote", |sql| sql.named_put(&table, name, &row))?;
            }
            Ok(())
        })();

        match copy {
            Ok(()) => {
                guard.identity = identity;
                guard.backend = NamedStore::Remote { table };
                guard.cached_len = Some(entries.len());
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = shared.with_sql("promote", |sql| sql.drop_table(&table)) {
                    tracing::warn!("failed to drop half-built table {}: {}", table, cleanup);
                }
                Err(e)
            }
        }
    }

    /// An independent `Local` copy with a fresh identity and deep-cloned
    /// values, regardless of the source backend.
    pub fn deep_clone(&self) -> Result<NamedMap> {
        let shared = upgrade(&self.store, "clone")?;
        let mut cloned = BTreeMap::new();
        for (name, value) in self.iter()? {
            cloned.insert(name, value.deep_clone()?);
        }
        Ok(NamedMap::from_entries(&shared, cloned))
    }
}

impl std::fmt::Debug for NamedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedMap").finish_non_exhaustive()
    }
}

impl PartialEq for NamedMap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.identity() == other.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, StoreConfig};
    use crate::store::Store;

    fn unbacked_store() -> Store {
        Store::open(StoreConfig {
            backend: BackendConfig::None,
            ..StoreConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_set_get_remove() {
        let store = unbacked_store();
        let vars = store.new_named_map();

        vars.set("count", Value::Integer(3)).unwrap();
        vars.set("count", Value::Integer(4)).unwrap();
        vars.set("label", Value::Text("hi".into())).unwrap();

        assert_eq!(vars.len().unwrap(), 2);
        assert_eq!(vars.get("count").unwrap(), Some(Value::Integer(4)));
        assert_eq!(vars.get("missing").unwrap(), None);
        assert_eq!(vars.remove("count").unwrap(), Some(Value::Integer(4)));
        assert_eq!(vars.remove("count").unwrap(), None);
    }

    #[test]
    fn test_name_length_limit() {
        let store = unbacked_store();
        let vars = store.new_named_map();

        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            vars.set(&long, Value::None),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(vars.set("", Value::None), Err(Error::InvalidName(_))));

        let at_limit = "y".repeat(MAX_NAME_LEN);
        vars.set(&at_limit, Value::Integer(1)).unwrap();
        assert_eq!(vars.get(&at_limit).unwrap(), Some(Value::Integer(1)));
    }

    #[test]
    fn test_get_required() {
        let store = unbacked_store();
        let vars = store.new_named_map();
        assert!(matches!(
            vars.get_required("nope"),
            Err(Error::KeyNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_iteration_is_name_ordered() {
        let store = unbacked_store();
        let vars = store.new_named_map();
        vars.set("zeta", Value::Integer(1)).unwrap();
        vars.set("alpha", Value::Integer(2)).unwrap();

        let names: Vec<String> = vars.iter().unwrap().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
