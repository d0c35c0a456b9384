use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, Thread, ThreadId};

use affinity_core::DispatchConfig;
use tracing::debug;

use crate::dispatcher::Dispatcher;

/// Maps thread identities to their dispatchers.
///
/// Owned by the application rather than living in global state: build one
/// at startup and share it (typically behind an `Arc`). Entries stay until
/// [`deregister`](DispatcherRegistry::deregister) is called; the registry
/// never observes thread exit on its own.
#[derive(Debug)]
pub struct DispatcherRegistry {
    dispatchers: RwLock<HashMap<ThreadId, Arc<Dispatcher>>>,
    config: DispatchConfig,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    /// Registry whose newly created dispatchers use `config`.
    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            dispatchers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the dispatcher owned by `thread`, creating and registering one if needed.
    ///
    /// Creation and registration happen under one write lock, so concurrent
    /// lookups for the same thread always return the same instance, whether
    /// or not that thread ever runs its dispatcher.
    pub fn dispatcher_for(&self, thread: ThreadId) -> Arc<Dispatcher> {
        if let Some(existing) = self.get(thread) {
            return existing;
        }

        let mut map = self.dispatchers.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(thread)
            .or_insert_with(|| {
                debug!(?thread, "registering dispatcher");
                Arc::new(Dispatcher::with_owner(thread, self.config.clone()))
            })
            .clone()
    }

    /// [`dispatcher_for`](DispatcherRegistry::dispatcher_for) taking a thread handle.
    pub fn dispatcher_for_thread(&self, thread: &Thread) -> Arc<Dispatcher> {
        self.dispatcher_for(thread.id())
    }

    /// The dispatcher owned by the calling thread.
    pub fn current(&self) -> Arc<Dispatcher> {
        self.dispatcher_for(thread::current().id())
    }

    /// Register an existing dispatcher under its owner.
    ///
    /// The first registration for an owner wins: if one is already present,
    /// `dispatcher` is discarded and the registered instance is returned.
    pub fn register(&self, dispatcher: Arc<Dispatcher>) -> Arc<Dispatcher> {
        let mut map = self.dispatchers.write().unwrap_or_else(PoisonError::into_inner);
        let owner = dispatcher.owner();
        let registered = map.entry(owner).or_insert_with(|| dispatcher.clone());
        if !Arc::ptr_eq(registered, &dispatcher) {
            debug!(?owner, kept = %registered.id(), discarded = %dispatcher.id(), "dispatcher already registered");
        }
        registered.clone()
    }

    /// Look up without creating.
    pub fn get(&self, thread: ThreadId) -> Option<Arc<Dispatcher>> {
        self.dispatchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread)
            .cloned()
    }

    /// Remove the entry for `thread`, returning it.
    ///
    /// Holders of the returned `Arc` keep a working dispatcher; only the
    /// lookup path forgets it, and a later `dispatcher_for` builds a new one.
    pub fn deregister(&self, thread: ThreadId) -> Option<Arc<Dispatcher>> {
        let removed = self
            .dispatchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&thread);
        if removed.is_some() {
            debug!(?thread, "dispatcher deregistered");
        }
        removed
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.dispatchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&thread)
    }

    /// Number of registered dispatchers.
    pub fn len(&self) -> usize {
        self.dispatchers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DispatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
