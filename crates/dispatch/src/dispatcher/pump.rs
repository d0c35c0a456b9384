use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::Instant;

use affinity_core::DispatchError;
use tracing::{debug, error, info, trace, warn};

use super::core::Dispatcher;
use crate::cancel::CancelToken;
use crate::work_item::{panic_message, ItemOutcome, WorkItem};

impl Dispatcher {
    /// Run the pump loop on the owner thread. Blocks until `token` is cancelled.
    ///
    /// Each wake-up (or wait timeout) drains the whole queue in FIFO order,
    /// executing items synchronously on this thread. Failures inside items
    /// go to their futures and never end the loop. Cancellation is checked
    /// between items, so the item in flight always completes; items left in
    /// the queue stay there for a later `run`.
    ///
    /// Fails with [`DispatchError::AccessViolation`] off the owner thread,
    /// [`DispatchError::AlreadyRunning`] if a run is already active (including
    /// a re-entrant call from inside a work item), and
    /// [`DispatchError::Disposed`] after [`dispose`](Dispatcher::dispose).
    pub fn run(&self, token: CancelToken) -> Result<(), DispatchError> {
        self.verify_access()?;
        self.claim_run()?;
        let _guard = RunGuard { dispatcher: self };

        *self.token_slot() = Some(token.clone());
        self.with_metrics(|m| m.runs_started += 1);

        let queued = self.queue_len();
        info!(dispatcher = %self.id, queued, "pump loop started");
        if queued > 0 {
            // Work queued before the run must not wait for a fresh signal.
            self.wake.set();
        }

        let wait = self.config.wait_timeout();
        while !token.is_cancelled() {
            let signalled = self.wake.wait_timeout(wait);
            let executed = self.drain(&token);
            if executed > 0 {
                debug!(dispatcher = %self.id, signalled, executed, "drain pass complete");
            }
        }

        info!(dispatcher = %self.id, remaining = self.queue_len(), "pump loop cancelled");
        Ok(())
    }

    /// Flip `running` on, unless disposed or already running.
    fn claim_run(&self) -> Result<(), DispatchError> {
        let _exit = self.exit_lock();
        if self.is_disposed() {
            return Err(DispatchError::Disposed);
        }
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DispatchError::AlreadyRunning)
    }

    /// Execute queued items until the queue is empty or `token` is cancelled.
    ///
    /// The queue lock is held only for each pop, so producers keep
    /// enqueueing while an item runs; those items join this same pass.
    fn drain(&self, token: &CancelToken) -> usize {
        let mut executed = 0;
        while !token.is_cancelled() {
            let Some(item) = self.queue().pop_front() else {
                break;
            };
            self.execute(item);
            executed += 1;
        }
        if executed > 0 {
            self.with_metrics(|m| m.drain_passes += 1);
        }
        executed
    }

    fn execute(&self, item: WorkItem) {
        let seq = item.seq();
        let waited = item.enqueued_at().elapsed();
        let started = Instant::now();

        // `WorkItem::run` already contains panics from the callable; this
        // catches anything the settle/report path itself throws.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| item.run()));
        let elapsed = started.elapsed();

        match outcome {
            Ok(ItemOutcome::Completed) => {
                trace!(dispatcher = %self.id, seq, ?waited, ?elapsed, "work item completed");
                self.with_metrics(|m| m.record_execution(elapsed, false));
            }
            Ok(ItemOutcome::Failed(reason)) => {
                if self.config.log_item_failures {
                    warn!(dispatcher = %self.id, seq, error = %reason, "work item failed");
                } else {
                    debug!(dispatcher = %self.id, seq, error = %reason, "work item failed");
                }
                self.with_metrics(|m| m.record_execution(elapsed, true));
            }
            Err(payload) => {
                error!(
                    dispatcher = %self.id,
                    seq,
                    panic = %panic_message(payload.as_ref()),
                    "pump machinery fault while running work item"
                );
                self.with_metrics(|m| m.machinery_faults += 1);
            }
        }

        if let Some(threshold) = self.config.slow_item_threshold() {
            if elapsed > threshold {
                warn!(dispatcher = %self.id, seq, ?elapsed, ?threshold, "slow work item");
            }
        }
    }
}

/// Restores idle state when a run ends, however it ends.
struct RunGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let d = self.dispatcher;
        *d.token_slot() = None;
        if d.queue_len() > 0 {
            // Leave a pending signal so the next run's first wait returns at once.
            d.wake.set();
        }
        let _exit = d.exit_lock();
        d.running.store(false, Ordering::Release);
        d.exited.notify_all();
    }
}
