use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use affinity_core::{DispatchConfig, DispatchError};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::metrics::DispatcherMetrics;
use crate::signal::WakeSignal;
use crate::work_item::WorkItem;

/// Identity of a dispatcher instance, carried in every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DispatcherId(Uuid);

impl DispatcherId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs submitted work on a single owner thread.
///
/// Any thread may [`invoke_async`](Dispatcher::invoke_async); only the owner
/// may [`run`](Dispatcher::run) the pump loop that executes the queue. Items
/// submitted while nobody is pumping stay queued until the next `run`.
///
/// Share it across threads behind an `Arc`.
pub struct Dispatcher {
    pub(super) id: DispatcherId,
    pub(super) owner: ThreadId,
    pub(super) config: DispatchConfig,
    pub(super) queue: Mutex<VecDeque<WorkItem>>,
    pub(super) wake: WakeSignal,
    pub(super) running: AtomicBool,
    /// Token of the active `run`; `None` between runs.
    pub(super) token: Mutex<Option<CancelToken>>,
    /// Serializes `running` and `disposed` transitions with `dispose`.
    pub(super) exit_lock: Mutex<()>,
    pub(super) exited: Condvar,
    pub(super) disposed: AtomicBool,
    pub(super) next_seq: AtomicU64,
    pub(super) metrics: RwLock<DispatcherMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher owned by the calling thread, with default config.
    ///
    /// The dispatcher is not registered anywhere; use
    /// [`DispatcherRegistry::current`](crate::DispatcherRegistry::current)
    /// when other threads need to find it by thread identity.
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    /// Create a dispatcher owned by the calling thread.
    pub fn with_config(config: DispatchConfig) -> Self {
        Self::with_owner(thread::current().id(), config)
    }

    pub(crate) fn with_owner(owner: ThreadId, config: DispatchConfig) -> Self {
        let id = DispatcherId::new();
        debug!(dispatcher = %id, ?owner, "dispatcher created");
        Self {
            id,
            owner,
            config,
            queue: Mutex::new(VecDeque::new()),
            wake: WakeSignal::new(),
            running: AtomicBool::new(false),
            token: Mutex::new(None),
            exit_lock: Mutex::new(()),
            exited: Condvar::new(),
            disposed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            metrics: RwLock::new(DispatcherMetrics::default()),
        }
    }

    pub fn id(&self) -> DispatcherId {
        self.id
    }

    /// The only thread allowed to run the pump loop.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    // ── Affinity ─────────────────────────────────────────────────────

    /// Whether the calling thread is the owner.
    pub fn check_access(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Fail with [`DispatchError::AccessViolation`] unless called on the owner.
    pub fn verify_access(&self) -> Result<(), DispatchError> {
        if self.check_access() {
            Ok(())
        } else {
            Err(DispatchError::AccessViolation {
                owner: self.owner,
                caller: thread::current().id(),
            })
        }
    }

    // ── Observable state ─────────────────────────────────────────────

    /// True only while the owner is inside [`run`](Dispatcher::run).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True while a run is active and its token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token_slot()
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of items waiting to run.
    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// Get a snapshot of the current dispatcher metrics.
    pub fn metrics(&self) -> DispatcherMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Disposal ─────────────────────────────────────────────────────

    /// Wait for the pump loop to stop, then mark the dispatcher disposed.
    ///
    /// This neither cancels an active run nor drains the queue. Calling it
    /// while `run` is active and its token is never cancelled blocks
    /// forever, and so does calling it from inside a work item. Once
    /// disposed, `run` fails with [`DispatchError::Disposed`] and new
    /// submissions settle immediately with the same error.
    ///
    /// Items still queued are never executed. Their futures stay pending
    /// for as long as any handle to the dispatcher lives (a registry entry
    /// counts), and resolve to [`DispatchError::Abandoned`] when the last
    /// one drops.
    pub fn dispose(&self) {
        let guard = self.exit_lock();
        let _guard = self
            .exited
            .wait_while(guard, |_| self.is_running())
            .unwrap_or_else(PoisonError::into_inner);
        self.disposed.store(true, Ordering::Release);
        debug!(dispatcher = %self.id, pending = self.queue_len(), "dispatcher disposed");
    }

    /// Wait up to `timeout` for the pump loop to stop. Returns whether it did.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let guard = self.exit_lock();
        let (_guard, result) = self
            .exited
            .wait_timeout_while(guard, timeout, |_| self.is_running())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    // ── Lock helpers ─────────────────────────────────────────────────
    //
    // No lock below is held while user code runs, so poisoning can only
    // come from a panic inside these short critical sections; the data is
    // still consistent and is used as-is.

    pub(super) fn queue(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn token_slot(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn exit_lock(&self) -> MutexGuard<'_, ()> {
        self.exit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn with_metrics(&self, f: impl FnOnce(&mut DispatcherMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("running", &self.is_running())
            .field("queued", &self.queue_len())
            .finish_non_exhaustive()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let pending = self
            .queue
            .get_mut()
            .map(|q| q.len())
            .unwrap_or_else(|e| e.into_inner().len());
        if pending > 0 {
            debug!(dispatcher = %self.id, pending, "dropping dispatcher with queued work items");
        }
    }
}
