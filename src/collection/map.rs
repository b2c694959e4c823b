//! Map collections - values keyed by arbitrary values
//!
//! Local maps keep insertion order. Key equality follows [`Value`] equality:
//! scalars by tag + payload, collections by identity.

use super::{ensure_persistable, upgrade, CollectionKind};
use crate::codec::{self, encode_row};
use crate::identity::CollectionIdentity;
use crate::store::Shared;
use crate::value::Value;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

enum MapStore {
    Local(Vec<(Value, Value)>),
    Remote { table: String },
}

struct MapInner {
    identity: CollectionIdentity,
    backend: MapStore,
    modifications: u64,
    cached_len: Option<usize>,
}

/// A map collection. Cheap to clone; clones share the same underlying map.
#[derive(Clone)]
pub struct Map {
    inner: Arc<Mutex<MapInner>>,
    store: Weak<Shared>,
}

impl Map {
    pub(crate) fn new_local(shared: &Arc<Shared>) -> Map {
        Self::from_entries(shared, Vec::new())
    }

    pub(crate) fn from_entries(shared: &Arc<Shared>, entries: Vec<(Value, Value)>) -> Map {
        Map {
            inner: Arc::new(Mutex::new(MapInner {
                identity: shared.next_identity(),
                backend: MapStore::Local(entries),
                modifications: 0,
                cached_len: None,
            })),
            store: Arc::downgrade(shared),
        }
    }

    /// Attach to an existing backend table by identity; not validated until
    /// first real access.
    pub(crate) fn attach_remote(shared: &Arc<Shared>, identity: CollectionIdentity) -> Map {
        Map {
            inner: Arc::new(Mutex::new(MapInner {
                identity,
                backend: MapStore::Remote {
                    table: shared.table_name(CollectionKind::Map, identity),
                },
                modifications: 0,
                cached_len: None,
            })),
            store: Arc::downgrade(shared),
        }
    }

    /// The identity of this map
    pub fn identity(&self) -> CollectionIdentity {
        self.inner.lock().identity
    }

    /// Whether this map is table-backed
    pub fn is_remote(&self) -> bool {
        matches!(self.inner.lock().backend, MapStore::Remote { .. })
    }

    pub fn modification_count(&self) -> u64 {
        self.inner.lock().modifications
    }

    fn remote_table(&self) -> Option<String> {
        match &self.inner.lock().backend {
            MapStore::Remote { table } => Some(table.clone()),
            MapStore::Local(_) => None,
        }
    }

    fn notify(&self) -> Result<()> {
        match self.store.upgrade() {
            Some(shared) => shared.notify_modified(),
            None => Ok(()),
        }
    }

    fn guard_self_containment(&self, value: &Value) -> Result<()> {
        if let Value::Map(other) = value {
            if Arc::ptr_eq(&self.inner, &other.inner) || other.identity() == self.identity() {
                return Err(Error::SelfContainment);
            }
        }
        Ok(())
    }

    /// Number of entries. O(1) for `Local`; a backend count for `Remote`
    /// unless a cached count is still valid.
    pub fn len(&self) -> Result<usize> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    MapStore::Local(entries) => Ok(entries.len()),
                    MapStore::Remote { .. } => {
                        drop(guard);
                        self.len()
                    }
                }
            }
            Some(table) => {
                if let Some(n) = self.inner.lock().cached_len {
                    return Ok(n);
                }
                let shared = upgrade(&self.store, "map len")?;
                let n = shared.with_sql("map len", |sql| sql.count(&table))?;
                self.inner.lock().cached_len = Some(n);
                Ok(n)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Look up a key; an absent key is a normal `None`, not an error
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    MapStore::Local(entries) => Ok(entries
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.clone())),
                    MapStore::Remote { .. } => {
                        drop(guard);
                        self.get(key)
                    }
                }
            }
            Some(table) => {
                let shared = upgrade(&self.store, "map get")?;
                let key_row = encode_row(key);
                match shared.with_sql("map get", |sql| sql.map_get(&table, &key_row))? {
                    Some(row) => Ok(Some(codec::decode_row(&row, &shared)?)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Look up a key that must be present
    pub fn get_required(&self, key: &Value) -> Result<Value> {
        self.get(key)?.ok_or_else(|| {
            Error::KeyNotFound(codec::encode_key(key).unwrap_or_else(|_| format!("{:?}", key)))
        })
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or replace an entry.
    ///
    /// Neither the key nor the value may be this map itself.
    pub fn insert(&self, key: Value, value: Value) -> Result<()> {
        self.guard_self_containment(&key)?;
        self.guard_self_containment(&value)?;
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "map insert")?;
                // May promote nested collections; runs before our own lock
                let key_row = ensure_persistable(&key)?;
                let value_row = ensure_persistable(&value)?;
                let mut guard = self.inner.lock();
                shared.with_sql("map insert", |sql| sql.map_put(&table, &key_row, &value_row))?;
                guard.cached_len = None;
                guard.modifications += 1;
                drop(guard);
                self.notify()
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    MapStore::Local(entries) => {
                        match entries.iter_mut().find(|(k, _)| k == &key) {
                            Some(entry) => entry.1 = value,
                            None => entries.push((key, value)),
                        }
                        inner.modifications += 1;
                        drop(guard);
                        self.notify()
                    }
                    // Promoted between the probe and the lock; redo remotely
                    MapStore::Remote { .. } => {
                        drop(guard);
                        self.insert(key, value)
                    }
                }
            }
        }
    }

    /// Remove a key, returning the previous value if present
    pub fn remove(&self, key: &Value) -> Result<Option<Value>> {
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "map remove")?;
                let key_row = encode_row(key);
                let mut guard = self.inner.lock();
                let previous =
                    shared.with_sql("map remove", |sql| sql.map_remove(&table, &key_row))?;
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
                    MapStore::Local(entries) => {
                        match entries.iter().position(|(k, _)| k == key) {
                            Some(at) => {
                                let (_, value) = entries.remove(at);
                                inner.modifications += 1;
                                drop(guard);
                                self.notify()?;
                                Ok(Some(value))
                            }
                            None => Ok(None),
                        }
                    }
                    MapStore::Remote { .. } => {
                        drop(guard);
                        self.remove(key)
                    }
                }
            }
        }
    }

    /// Iterate over a snapshot of the entries taken at call time
    pub fn iter(&self) -> Result<std::vec::IntoIter<(Value, Value)>> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    MapStore::Local(entries) => Ok(entries.clone().into_iter()),
                    MapStore::Remote { .. } => {
                        drop(guard);
                        self.iter()
                    }
                }
            }
            Some(table) => {
                let shared = upgrade(&self.store, "map scan")?;
                let rows = shared.with_sql("map scan", |sql| sql.map_rows(&table))?;
                let mut entries = Vec::with_capacity(rows.len());
                for (key_row, value_row) in &rows {
                    entries.push((
                        codec::decode_row(key_row, &shared)?,
                        codec::decode_row(value_row, &shared)?,
                    ));
                }
                Ok(entries.into_iter())
            }
        }
    }

    /// Move this map into the relational backend. One-way and one-shot;
    /// all-or-nothing like [`List::promote`](super::List::promote).
    pub fn promote(&self) -> Result<()> {
        let shared = upgrade(&self.store, "promote")?;
        let mut guard = self.inner.lock();
        let entries = match &guard.backend {
            MapStore::Remote { .. } => return Err(Error::AlreadyRemote),
            MapStore::Local(entries) => entries.clone(),
        };
        let identity = shared.next_remote_identity(CollectionKind::Map)?;
        let table = shared.table_name(CollectionKind::Map, identity);
        shared.with_sql("promote", |sql| sql.create_table(CollectionKind::Map, &table))?;

        let copy = (|| -> Result<()> {
            for (key, value) in &entries {
                let key_row = ensure_persistable(key)?;
                let value_row = ensure_persistable(value)?;
                shared.with_sql("promote", |sql| sql.map_put(&table, &key_row, &value_row))?;
            }
            Ok(())
        })();

        match copy {
            Ok(()) => {
                guard.identity = identity;
                guard.backend = MapStore::Remote { table };
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
    /// entries, regardless of the source backend.
    pub fn deep_clone(&self) -> Result<Map> {
        let shared = upgrade(&self.store, "clone")?;
        let mut cloned = Vec::new();
        for (key, value) in self.iter()? {
            cloned.push((key.deep_clone()?, value.deep_clone()?));
        }
        Ok(Map::from_entries(&shared, cloned))
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map").finish_non_exhaustive()
    }
}

impl PartialEq for Map {
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

    fn sqlite_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(StoreConfig {
            backend: BackendConfig::Sqlite { path: dir.path().join("store.db") },
            ..StoreConfig::default()
        })
        .unwrap();
        (dir, store)
    }

    #[test]
    fn test_local_insert_get_remove() {
        let store = unbacked_store();
        let map = store.new_map();

        map.insert(Value::Text("a".into()), Value::Integer(1)).unwrap();
        map.insert(Value::Integer(2), Value::Text("two".into())).unwrap();
        map.insert(Value::Text("a".into()), Value::Integer(10)).unwrap();

        assert_eq!(map.len().unwrap(), 2);
        assert_eq!(
            map.get(&Value::Text("a".into())).unwrap(),
            Some(Value::Integer(10))
        );
        assert_eq!(map.get(&Value::Text("missing".into())).unwrap(), None);

        assert_eq!(
            map.remove(&Value::Integer(2)).unwrap(),
            Some(Value::Text("two".into()))
        );
        assert_eq!(map.remove(&Value::Integer(2)).unwrap(), None);
        assert_eq!(map.len().unwrap(), 1);
    }

    #[test]
    fn test_get_required() {
        let store = unbacked_store();
        let map = store.new_map();
        map.insert(Value::Text("present".into()), Value::Boolean(true)).unwrap();

        assert_eq!(
            map.get_required(&Value::Text("present".into())).unwrap(),
            Value::Boolean(true)
        );
        assert!(matches!(
            map.get_required(&Value::Text("absent".into())),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_key_equality_is_tag_sensitive() {
        let store = unbacked_store();
        let map = store.new_map();
        map.insert(Value::Integer(1), Value::Text("int".into())).unwrap();
        map.insert(Value::Decimal(1.0), Value::Text("dec".into())).unwrap();

        assert_eq!(map.len().unwrap(), 2);
        assert_eq!(
            map.get(&Value::Integer(1)).unwrap(),
            Some(Value::Text("int".into()))
        );
        assert_eq!(
            map.get(&Value::Decimal(1.0)).unwrap(),
            Some(Value::Text("dec".into()))
        );
    }

    #[test]
    fn test_local_iteration_keeps_insertion_order() {
        let store = unbacked_store();
        let map = store.new_map();
        map.insert(Value::Text("z".into()), Value::Integer(1)).unwrap();
        map.insert(Value::Text("a".into()), Value::Integer(2)).unwrap();

        let keys: Vec<Value> = map.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Value::Text("z".into()), Value::Text("a".into())]);
    }

    #[test]
    fn test_self_containment_rejected_for_key_and_value() {
        let store = unbacked_store();
        let map = store.new_map();

        assert!(matches!(
            map.insert(Value::Text("k".into()), Value::Map(map.clone())),
            Err(Error::SelfContainment)
        ));
        assert!(matches!(
            map.insert(Value::Map(map.clone()), Value::Integer(1)),
            Err(Error::SelfContainment)
        ));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn test_remote_roundtrip_with_special_keys() {
        let (_dir, store) = sqlite_store();
        let map = store.new_map();
        map.promote().unwrap();

        map.insert(Value::None, Value::Text("none-key".into())).unwrap();
        map.insert(Value::Boolean(false), Value::Text("false-key".into())).unwrap();
        map.insert(Value::Decimal(2.5), Value::Integer(25)).unwrap();

        // None and false keys both persist with an absent payload; the tag
        // keeps them distinct
        assert_eq!(
            map.get(&Value::None).unwrap(),
            Some(Value::Text("none-key".into()))
        );
        assert_eq!(
            map.get(&Value::Boolean(false)).unwrap(),
            Some(Value::Text("false-key".into()))
        );
        assert_eq!(map.get(&Value::Decimal(2.5)).unwrap(), Some(Value::Integer(25)));
        assert_eq!(map.len().unwrap(), 3);

        assert_eq!(
            map.remove(&Value::None).unwrap(),
            Some(Value::Text("none-key".into()))
        );
        assert_eq!(map.get(&Value::None).unwrap(), None);
        assert_eq!(map.len().unwrap(), 2);
    }

    #[test]
    fn test_promote_carries_entries() {
        let (_dir, store) = sqlite_store();
        let map = store.new_map();
        map.insert(Value::Text("k".into()), Value::Integer(42)).unwrap();

        map.promote().unwrap();
        assert!(map.is_remote());
        assert_eq!(
            map.get(&Value::Text("k".into())).unwrap(),
            Some(Value::Integer(42))
        );
        assert!(matches!(map.promote(), Err(Error::AlreadyRemote)));
    }

    #[test]
    fn test_remote_map_with_nested_collection_value() {
        let (_dir, store) = sqlite_store();
        let map = store.new_map();
        map.promote().unwrap();

        let nested = store.new_list();
        nested.push(Value::Integer(5)).unwrap();
        map.insert(Value::Text("items".into()), Value::List(nested.clone())).unwrap();

        // Inserting into a remote map promoted the nested list
        assert!(nested.is_remote());
        let fetched = map
            .get(&Value::Text("items".into()))
            .unwrap()
            .unwrap()
            .as_list()
            .unwrap();
        assert_eq!(fetched.get(0).unwrap(), Value::Integer(5));
    }
}
