//! List collections - contiguous 0-based sequences of values

use super::{ensure_persistable, upgrade, CollectionKind};
use crate::codec;
use crate::identity::CollectionIdentity;
use crate::store::Shared;
use crate::value::Value;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

enum ListStore {
    Local(Vec<Value>),
    Remote { table: String },
}

struct ListInner {
    identity: CollectionIdentity,
    backend: ListStore,
    modifications: u64,
    /// Valid only while `Remote`; invalidated by every structural mutation
    cached_len: Option<usize>,
}

/// A list collection. Cheap to clone; clones share the same underlying list.
#[derive(Clone)]
pub struct List {
    inner: Arc<Mutex<ListInner>>,
    store: Weak<Shared>,
}

impl List {
    pub(crate) fn new_local(shared: &Arc<Shared>) -> List {
        Self::from_values(shared, Vec::new())
    }

    pub(crate) fn from_values(shared: &Arc<Shared>, values: Vec<Value>) -> List {
        List {
            inner: Arc::new(Mutex::new(ListInner {
                identity: shared.next_identity(),
                backend: ListStore::Local(values),
                modifications: 0,
                cached_len: None,
            })),
            store: Arc::downgrade(shared),
        }
    }

    /// Attach to an existing backend table by identity. Existence is not
    /// checked here; a dangling identity fails on first real access.
    pub(crate) fn attach_remote(shared: &Arc<Shared>, identity: CollectionIdentity) -> List {
        List {
            inner: Arc::new(Mutex::new(ListInner {
                identity,
                backend: ListStore::Remote {
                    table: shared.table_name(CollectionKind::List, identity),
                },
                modifications: 0,
                cached_len: None,
            })),
            store: Arc::downgrade(shared),
        }
    }

    /// The identity of this list
    pub fn identity(&self) -> CollectionIdentity {
        self.inner.lock().identity
    }

    /// Whether this list is table-backed
    pub fn is_remote(&self) -> bool {
        matches!(self.inner.lock().backend, ListStore::Remote { .. })
    }

    /// Structural mutations since this handle's collection was created
    pub fn modification_count(&self) -> u64 {
        self.inner.lock().modifications
    }

    fn remote_table(&self) -> Option<String> {
        match &self.inner.lock().backend {
            ListStore::Remote { table } => Some(table.clone()),
            ListStore::Local(_) => None,
        }
    }

    fn notify(&self) -> Result<()> {
        match self.store.upgrade() {
            Some(shared) => shared.notify_modified(),
            None => Ok(()),
        }
    }

    fn guard_self_containment(&self, value: &Value) -> Result<()> {
        if let Value::List(other) = value {
            if Arc::ptr_eq(&self.inner, &other.inner) || other.identity() == self.identity() {
                return Err(Error::SelfContainment);
            }
        }
        Ok(())
    }

    /// Number of elements. O(1) for `Local`; a backend count for `Remote`
    /// unless a cached count is still valid.
    pub fn len(&self) -> Result<usize> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    ListStore::Local(items) => Ok(items.len()),
                    ListStore::Remote { .. } => {
                        drop(guard);
                        self.len()
                    }
                }
            }
            Some(table) => {
                if let Some(n) = self.inner.lock().cached_len {
                    return Ok(n);
                }
                let shared = upgrade(&self.store, "list len")?;
                let n = shared.with_sql("list len", |sql| sql.count(&table))?;
                self.inner.lock().cached_len = Some(n);
                Ok(n)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Get the element at `index`; out of range is an explicit error
    pub fn get(&self, index: usize) -> Result<Value> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    ListStore::Local(items) => items
                        .get(index)
                        .cloned()
                        .ok_or(Error::IndexOutOfBounds { index, len: items.len() }),
                    ListStore::Remote { .. } => {
                        drop(guard);
                        self.get(index)
                    }
                }
            }
            Some(table) => {
                let shared = upgrade(&self.store, "list get")?;
                match shared.with_sql("list get", |sql| sql.list_get(&table, index))? {
                    Some(row) => codec::decode_row(&row, &shared),
                    None => Err(Error::IndexOutOfBounds { index, len: self.len()? }),
                }
            }
        }
    }

    /// Linear containment scan. For `Remote` lists this decodes every row;
    /// the full-table cost is documented, not optimized away.
    pub fn contains(&self, value: &Value) -> Result<bool> {
        Ok(self.iter()?.any(|v| &v == value))
    }

    /// Append a value
    pub fn push(&self, value: Value) -> Result<()> {
        self.guard_self_containment(&value)?;
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "list push")?;
                // May promote a nested collection; runs before our own lock
                let row = ensure_persistable(&value)?;
                let mut guard = self.inner.lock();
                let index = match guard.cached_len {
                    Some(n) => n,
                    None => shared.with_sql("list push", |sql| sql.count(&table))?,
                };
                shared.with_sql("list push", |sql| sql.list_put(&table, index, &row))?;
                guard.cached_len = Some(index + 1);
                guard.modifications += 1;
                drop(guard);
                self.notify()
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    ListStore::Local(items) => {
                        items.push(value);
                        inner.modifications += 1;
                        drop(guard);
                        self.notify()
                    }
                    // Promoted between the probe and the lock; redo remotely
                    ListStore::Remote { .. } => {
                        drop(guard);
                        self.push(value)
                    }
                }
            }
        }
    }

    /// Overwrite the element at `index`
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        self.guard_self_containment(&value)?;
        match self.remote_table() {
            Some(table) => {
                let len = self.len()?;
                if index >= len {
                    return Err(Error::IndexOutOfBounds { index, len });
                }
                let shared = upgrade(&self.store, "list set")?;
                let row = ensure_persistable(&value)?;
                let mut guard = self.inner.lock();
                shared.with_sql("list set", |sql| sql.list_set(&table, index, &row))?;
                guard.modifications += 1;
                drop(guard);
                self.notify()
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    ListStore::Local(items) => {
                        let len = items.len();
                        match items.get_mut(index) {
                            Some(slot) => *slot = value,
                            None => return Err(Error::IndexOutOfBounds { index, len }),
                        }
                        inner.modifications += 1;
                        drop(guard);
                        self.notify()
                    }
                    ListStore::Remote { .. } => {
                        drop(guard);
                        self.set(index, value)
                    }
                }
            }
        }
    }

    /// Remove and return the element at `index`.
    ///
    /// For a `Remote` list every subsequent row is shifted down by one to
    /// keep indices contiguous - O(n) in the backend.
    pub fn remove(&self, index: usize) -> Result<Value> {
        match self.remote_table() {
            Some(table) => {
                let shared = upgrade(&self.store, "list remove")?;
                let row = shared
                    .with_sql("list remove", |sql| sql.list_get(&table, index))?
                    .ok_or(Error::IndexOutOfBounds { index, len: self.len()? })?;
                let value = codec::decode_row(&row, &shared)?;
                let mut guard = self.inner.lock();
                shared.with_sql("list remove", |sql| sql.list_remove(&table, index))?;
                guard.cached_len = guard.cached_len.map(|n| n.saturating_sub(1));
                guard.modifications += 1;
                drop(guard);
                self.notify()?;
                Ok(value)
            }
            None => {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                match &mut inner.backend {
                    ListStore::Local(items) => {
                        if index >= items.len() {
                            return Err(Error::IndexOutOfBounds { index, len: items.len() });
                        }
                        let value = items.remove(index);
                        inner.modifications += 1;
                        drop(guard);
                        self.notify()?;
                        Ok(value)
                    }
                    ListStore::Remote { .. } => {
                        drop(guard);
                        self.remove(index)
                    }
                }
            }
        }
    }

    /// Iterate over a snapshot of the elements taken at call time.
    ///
    /// For `Remote` lists this drains one backend cursor; a fresh call
    /// reopens it. Mutation during iteration is not reflected.
    pub fn iter(&self) -> Result<std::vec::IntoIter<Value>> {
        match self.remote_table() {
            None => {
                let guard = self.inner.lock();
                match &guard.backend {
                    ListStore::Local(items) => Ok(items.clone().into_iter()),
                    ListStore::Remote { .. } => {
                        drop(guard);
                        self.iter()
                    }
                }
            }
            Some(table) => {
                let shared = upgrade(&self.store, "list scan")?;
                let rows = shared.with_sql("list scan", |sql| sql.list_rows(&table))?;
                let mut values = Vec::with_capacity(rows.len());
                for row in &rows {
                    values.push(codec::decode_row(row, &shared)?);
                }
                Ok(values.into_iter())
            }
        }
    }

    /// A new independent `Local` list holding deep clones of the elements in
    /// `[from, to)`; never aliases the source.
    pub fn sub_range(&self, from: usize, to: usize) -> Result<List> {
        let shared = upgrade(&self.store, "list sub_range")?;
        let items: Vec<Value> = self.iter()?.collect();
        if from > to || to > items.len() {
            return Err(Error::IndexOutOfBounds { index: to, len: items.len() });
        }
        let mut cloned = Vec::with_capacity(to - from);
        for item in &items[from..to] {
            cloned.push(item.deep_clone()?);
        }
        Ok(List::from_values(&shared, cloned))
    }

    /// Move this list into the relational backend. One-way and one-shot.
    ///
    /// Allocates a fresh identity, creates the table, copies every element
    /// (promoting nested `Local` collections), and only then swaps the
    /// backend pointer. On any failure the half-built table is dropped and
    /// the list stays `Local` and unchanged.
    pub fn promote(&self) -> Result<()> {
        let shared = upgrade(&self.store, "promote")?;
        let mut guard = self.inner.lock();
        let items = match &guard.backend {
            ListStore::Remote { .. } => return Err(Error::AlreadyRemote),
            ListStore::Local(items) => items.clone(),
        };
        let identity = shared.next_remote_identity(CollectionKind::List)?;
        let table = shared.table_name(CollectionKind::List, identity);
        shared.with_sql("promote", |sql| sql.create_table(CollectionKind::List, &table))?;

        let copy = (|| -> Result<()> {
            for (index, item) in items.iter().enumerate() {
                let row = ensure_persistable(item)?;
                shared.with_sql("promote", |sql| sql.list_put(&table, index, &row))?;
            }
            Ok(())
        })();

        match copy {
            Ok(()) => {
                guard.identity = identity;
                guard.backend = ListStore::Remote { table };
                guard.cached_len = Some(items.len());
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
    /// elements, regardless of the source backend.
    pub fn deep_clone(&self) -> Result<List> {
        let shared = upgrade(&self.store, "clone")?;
        let mut cloned = Vec::new();
        for item in self.iter()? {
            cloned.push(item.deep_clone()?);
        }
        Ok(List::from_values(&shared, cloned))
    }
}

impl std::fmt::Debug for List {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // No locking here: Debug must not deadlock mid-operation
        f.debug_struct("List").finish_non_exhaustive()
    }
}

impl PartialEq for List {
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
    fn test_local_push_get_len() {
        let store = unbacked_store();
        let list = store.new_list();
        assert!(list.is_empty().unwrap());

        list.push(Value::Integer(1)).unwrap();
        list.push(Value::Text("two".into())).unwrap();

        assert_eq!(list.len().unwrap(), 2);
        assert_eq!(list.get(0).unwrap(), Value::Integer(1));
        assert_eq!(list.get(1).unwrap(), Value::Text("two".into()));
        assert!(matches!(
            list.get(2),
            Err(Error::IndexOutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_local_set_remove() {
        let store = unbacked_store();
        let list = store.new_list();
        list.push(Value::Integer(1)).unwrap();
        list.push(Value::Integer(2)).unwrap();
        list.push(Value::Integer(3)).unwrap();

        list.set(1, Value::Integer(20)).unwrap();
        assert_eq!(list.remove(1).unwrap(), Value::Integer(20));
        assert_eq!(list.len().unwrap(), 2);
        assert_eq!(list.get(1).unwrap(), Value::Integer(3));
        assert!(list.set(5, Value::None).is_err());
        assert!(list.remove(5).is_err());
    }

    #[test]
    fn test_self_containment_rejected() {
        let store = unbacked_store();
        let list = store.new_list();
        list.push(Value::Integer(1)).unwrap();

        let err = list.push(Value::List(list.clone())).unwrap_err();
        assert!(matches!(err, Error::SelfContainment));
        // The list is unmodified
        assert_eq!(list.len().unwrap(), 1);

        assert!(matches!(
            list.set(0, Value::List(list.clone())),
            Err(Error::SelfContainment)
        ));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let store = unbacked_store();
        let a = store.new_list();
        a.push(Value::Integer(1)).unwrap();

        let b = a.deep_clone().unwrap();
        assert_ne!(a.identity(), b.identity());

        b.push(Value::Integer(2)).unwrap();
        assert_eq!(a.len().unwrap(), 1);
        assert_eq!(b.len().unwrap(), 2);
    }

    #[test]
    fn test_deep_clone_copies_nested_collections() {
        let store = unbacked_store();
        let nested = store.new_list();
        nested.push(Value::Integer(1)).unwrap();
        let outer = store.new_list();
        outer.push(Value::List(nested.clone())).unwrap();

        let copy = outer.deep_clone().unwrap();
        let nested_copy = copy.get(0).unwrap().as_list().unwrap();
        nested_copy.push(Value::Integer(2)).unwrap();

        assert_eq!(nested.len().unwrap(), 1);
        assert_eq!(nested_copy.len().unwrap(), 2);
    }

    #[test]
    fn test_sub_range_never_aliases() {
        let store = unbacked_store();
        let list = store.new_list();
        for n in 1..=5 {
            list.push(Value::Integer(n)).unwrap();
        }

        let slice = list.sub_range(1, 4).unwrap();
        assert_eq!(slice.len().unwrap(), 3);
        assert_eq!(slice.get(0).unwrap(), Value::Integer(2));
        assert!(!slice.is_remote());

        slice.set(0, Value::Integer(99)).unwrap();
        assert_eq!(list.get(1).unwrap(), Value::Integer(2));

        assert!(list.sub_range(4, 2).is_err());
        assert!(list.sub_range(0, 9).is_err());
    }

    #[test]
    fn test_promote_preserves_order() {
        let (_dir, store) = sqlite_store();
        let list = store.new_list();
        for n in [1, 2, 3] {
            list.push(Value::Integer(n)).unwrap();
        }

        list.promote().unwrap();
        assert!(list.is_remote());
        assert_eq!(list.len().unwrap(), 3);
        assert_eq!(list.get(0).unwrap(), Value::Integer(1));
        assert_eq!(list.get(1).unwrap(), Value::Integer(2));
        assert_eq!(list.get(2).unwrap(), Value::Integer(3));

        assert!(matches!(list.promote(), Err(Error::AlreadyRemote)));
    }

    #[test]
    fn test_promote_without_relational_backend_fails_local_intact() {
        let store = unbacked_store();
        let list = store.new_list();
        list.push(Value::Integer(1)).unwrap();

        assert!(matches!(list.promote(), Err(Error::BackendUnavailable(_))));
        assert!(!list.is_remote());
        assert_eq!(list.get(0).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_remote_mutation_and_scan() {
        let (_dir, store) = sqlite_store();
        let list = store.new_list();
        list.promote().unwrap();

        list.push(Value::Text("a".into())).unwrap();
        list.push(Value::Boolean(false)).unwrap();
        list.push(Value::None).unwrap();
        list.set(0, Value::Text("A".into())).unwrap();

        let items: Vec<Value> = list.iter().unwrap().collect();
        assert_eq!(
            items,
            vec![Value::Text("A".into()), Value::Boolean(false), Value::None]
        );

        assert!(list.contains(&Value::Boolean(false)).unwrap());
        assert!(!list.contains(&Value::Boolean(true)).unwrap());

        assert_eq!(list.remove(1).unwrap(), Value::Boolean(false));
        assert_eq!(list.len().unwrap(), 2);
        assert_eq!(list.get(1).unwrap(), Value::None);
    }

    #[test]
    fn test_promote_recurses_into_nested_locals() {
        let (_dir, store) = sqlite_store();
        let nested = store.new_list();
        nested.push(Value::Integer(7)).unwrap();

        let outer = store.new_list();
        outer.push(Value::List(nested.clone())).unwrap();
        outer.promote().unwrap();

        assert!(nested.is_remote());
        let fetched = outer.get(0).unwrap().as_list().unwrap();
        assert_eq!(fetched.identity(), nested.identity());
        assert_eq!(fetched.get(0).unwrap(), Value::Integer(7));
    }
}
