use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use affinity_core::DispatchError;

use crate::future::DispatchFuture;

/// What happened when a work item ran, reported back to the pump loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Failed(String),
}

type Job = Box<dyn FnOnce() -> ItemOutcome + Send>;

/// A queued callable paired with the completer of its [`DispatchFuture`].
///
/// Consumed by [`WorkItem::run`], so an item can execute at most once.
pub struct WorkItem {
    seq: u64,
    enqueued_at: Instant,
    job: Job,
}

impl WorkItem {
    /// Wrap `callable` and return the item together with its future.
    ///
    /// Running the item never unwinds: a panic inside `callable` is caught
    /// and becomes [`DispatchError::ItemFailure`] on the future.
    pub(crate) fn new<F, T>(seq: u64, callable: F) -> (Self, DispatchFuture<T>)
    where
        F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let (mut completer, future) = DispatchFuture::pair();

        let job: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(callable)) {
                Ok(result) => result,
                Err(payload) => Err(DispatchError::ItemFailure(panic_message(payload.as_ref()))),
            };
            let report = match &outcome {
                Ok(_) => ItemOutcome::Completed,
                Err(e) => ItemOutcome::Failed(e.to_string()),
            };
            completer.settle(outcome);
            report
        });

        let item = Self {
            seq,
            enqueued_at: Instant::now(),
            job,
        };
        (item, future)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Execute synchronously on the calling thread and settle the future.
    pub(crate) fn run(self) -> ItemOutcome {
        (self.job)()
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("seq", &self.seq)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "work item panicked".to_string()
    }
}
