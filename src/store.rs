//! Store - the owning handle for collections and the global namespace
//!
//! A [`Store`] ties together the identity allocator, the persistence
//! coordinator, and the lazily-loaded global namespace. Collections keep a
//! weak reference back to the store's shared state; once the store is
//! dropped, surviving `Local` handles keep working in memory while
//! backend-dependent operations fail with
//! [`BackendUnavailable`](crate::Error::BackendUnavailable).
//!
//! Lock order, store-wide: collection -> namespace registry -> allocator ->
//! backend. Every path through this module takes locks in that order or a
//! suffix of it.

use crate::codec;
use crate::collection::{CollectionKind, List, Map, NamedMap};
use crate::config::StoreConfig;
use crate::identity::{CollectionIdentity, IdentityAllocator};
use crate::persist::{self, PersistenceCoordinator};
use crate::storage::SqlStore;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// State shared between a store and its collections
pub(crate) struct Shared {
    config: StoreConfig,
    persist: PersistenceCoordinator,
    allocator: IdentityAllocator,
    /// The global namespace, loaded on first access
    namespace: Mutex<Option<NamedMap>>,
}

impl Shared {
    pub(crate) fn next_identity(&self) -> CollectionIdentity {
        self.allocator.next()
    }

    /// Allocate an identity whose table suffix is free in the relational
    /// backend; skipped candidates are burned, which is how a store resumes
    /// against tables left by a previous process.
    pub(crate) fn next_remote_identity(&self, kind: CollectionKind) -> Result<CollectionIdentity> {
        self.allocator.next_probed(|candidate| {
            let table = codec::table_name(&self.config.table_prefix, kind, candidate);
            self.persist
                .with_sql("identity probe", |sql| sql.table_exists(&table))
        })
    }

    pub(crate) fn table_name(&self, kind: CollectionKind, identity: CollectionIdentity) -> String {
        codec::table_name(&self.config.table_prefix, kind, identity)
    }

    pub(crate) fn with_sql<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn SqlStore) -> Result<T>,
    ) -> Result<T> {
        self.persist.with_sql(operation, f)
    }

    pub(crate) fn is_relational(&self) -> bool {
        self.persist.is_relational()
    }

    /// Called by collections after every completed mutation, with the
    /// collection's own lock already released.
    pub(crate) fn notify_modified(self: &Arc<Self>) -> Result<()> {
        if self.persist.note_mutation() {
            self.flush_now()
        } else {
            Ok(())
        }
    }

    /// Write the namespace snapshot now. A namespace that was never loaded
    /// has nothing to save, and must not clobber an existing snapshot file.
    pub(crate) fn flush_now(self: &Arc<Self>) -> Result<()> {
        if !self.persist.is_json() {
            // Relational backends write through at mutation time
            return Ok(());
        }
        let namespace = self.namespace.lock().clone();
        let Some(namespace) = namespace else {
            return Ok(());
        };
        // Serialize outside the registry lock; each entry is read through
        // its collection's own lock.
        let tree = persist::snapshot_tree(&namespace)?;
        if self.persist.write_snapshot(&tree)? {
            tracing::debug!("namespace snapshot written");
        }
        self.persist.mark_flushed();
        Ok(())
    }

    fn globals_table(&self) -> String {
        format!("{}globals", self.config.table_prefix)
    }

    /// Advance the allocator past every identity already persisted under
    /// the configured prefix, so a fresh local collection can never alias a
    /// collection attached from a previous run.
    fn resume_identities(&self) -> Result<()> {
        let prefix = self.config.table_prefix.clone();
        let names = self
            .persist
            .with_sql("identity resume", |sql| sql.table_names(&prefix))?;
        for name in names {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let mut chars = rest.chars();
            // Skip non-collection tables under the prefix (e.g. the fixed
            // globals table)
            if chars.next().and_then(CollectionKind::from_kind_char).is_none() {
                continue;
            }
            if let Ok(identity) = CollectionIdentity::parse(chars.as_str()) {
                self.allocator.resume_after(identity);
            }
        }
        Ok(())
    }

    /// Build the namespace from whatever the backend holds.
    ///
    /// Relational: attach to the fixed globals table, creating it on first
    /// use. JSON: parse the snapshot file, an absent file meaning an empty
    /// namespace and an unparsable one a hard error, never a silent reset.
    /// Unconfigured: a fresh in-process namespace.
    fn load_namespace(self: &Arc<Self>) -> Result<NamedMap> {
        if self.persist.is_relational() {
            let table = self.globals_table();
            self.with_sql("globals load", |sql| {
                sql.create_table(CollectionKind::Named, &table)
            })?;
            return Ok(NamedMap::attach_remote_table(self, table));
        }
        match self.persist.read_snapshot()? {
            Some(tree) => persist::namespace_from_tree(&tree, self),
            None => Ok(NamedMap::new_local(self)),
        }
    }
}

/// The storage engine's top-level handle
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Open a store against the configured backend. Fails if the backend
    /// cannot be reached or the configuration is malformed.
    pub fn open(config: StoreConfig) -> Result<Store> {
        config.validate()?;
        let persist = PersistenceCoordinator::new(&config)?;
        let shared = Arc::new(Shared {
            config,
            persist,
            allocator: IdentityAllocator::new(),
            namespace: Mutex::new(None),
        });
        if shared.is_relational() {
            shared.resume_identities()?;
        }
        Ok(Store { shared })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    // ========== Collection construction ==========

    /// A fresh, empty `Local` list owned by this store
    pub fn new_list(&self) -> List {
        List::new_local(&self.shared)
    }

    /// A fresh, empty `Local` map owned by this store
    pub fn new_map(&self) -> Map {
        Map::new_local(&self.shared)
    }

    /// A fresh, empty `Local` named map owned by this store
    pub fn new_named_map(&self) -> NamedMap {
        NamedMap::new_local(&self.shared)
    }

    /// Attach a handle to a list persisted by an earlier process. The table
    /// is not validated here; a dangling identity surfaces as a `Backend`
    /// error on first access.
    pub fn attach_list(&self, identity: CollectionIdentity) -> Result<List> {
        if !self.shared.is_relational() {
            return Err(Error::BackendUnavailable("attach list"));
        }
        Ok(List::attach_remote(&self.shared, identity))
    }

    /// Attach a handle to a map persisted by an earlier process
    pub fn attach_map(&self, identity: CollectionIdentity) -> Result<Map> {
        if !self.shared.is_relational() {
            return Err(Error::BackendUnavailable("attach map"));
        }
        Ok(Map::attach_remote(&self.shared, identity))
    }

    // ========== Global namespace ==========

    /// The global namespace, loaded from the backend on first call and
    /// cached; later calls return the same underlying map.
    pub fn globals(&self) -> Result<NamedMap> {
        let mut registry = self.shared.namespace.lock();
        if let Some(namespace) = &*registry {
            return Ok(namespace.clone());
        }
        let namespace = self.shared.load_namespace()?;
        *registry = Some(namespace.clone());
        Ok(namespace)
    }

    /// Drop the cached namespace and rebuild it from the backend,
    /// discarding any in-memory state not yet flushed. Handles to the old
    /// namespace keep working but are no longer what the store persists.
    pub fn reload_globals(&self) -> Result<NamedMap> {
        let namespace = self.shared.load_namespace()?;
        *self.shared.namespace.lock() = Some(namespace.clone());
        tracing::info!("global namespace reloaded from backend");
        Ok(namespace)
    }

    /// Explicitly regenerate the namespace as empty, in memory and in the
    /// backend. This is the only path that discards persisted globals.
    pub fn reset_globals(&self) -> Result<NamedMap> {
        let namespace = if self.shared.is_relational() {
            let table = self.shared.globals_table();
            self.shared.with_sql("globals reset", |sql| {
                sql.create_table(CollectionKind::Named, &table)
            })?;
            let namespace = NamedMap::attach_remote_table(&self.shared, table);
            namespace.clear()?;
            namespace
        } else {
            NamedMap::new_local(&self.shared)
        };
        *self.shared.namespace.lock() = Some(namespace.clone());
        self.shared.persist.write_snapshot(&persist::empty_snapshot())?;
        self.shared.persist.mark_flushed();
        tracing::info!("global namespace reset");
        Ok(namespace)
    }

    // ========== Persistence ==========

    /// Flush the namespace snapshot immediately, bypassing the debounce.
    /// A no-op for relational and unconfigured backends.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush_now()
    }

    /// Mutations recorded since the last flush
    pub fn pending_modifications(&self) -> u64 {
        self.shared.persist.pending()
    }

    /// Final flush and teardown. Flush failures are logged, not escalated;
    /// there is no caller left to handle them.
    pub fn shutdown(self) {
        match self.shared.flush_now() {
            Ok(()) => tracing::debug!("store shut down"),
            Err(e) => tracing::warn!("final flush failed during shutdown: {}", e),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.shared.config.backend)
            .finish_non_exhaustive()
    }
}
