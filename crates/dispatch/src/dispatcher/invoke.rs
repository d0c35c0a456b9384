use std::fmt::Display;
use std::sync::atomic::Ordering;

use affinity_core::DispatchError;
use tracing::{debug, trace, warn};

use super::core::Dispatcher;
use crate::future::DispatchFuture;
use crate::work_item::WorkItem;

impl Dispatcher {
    /// Queue `callable` for the owner thread and return its future at once.
    ///
    /// Safe to call from any thread, the owner included. A panic inside
    /// `callable` settles the future with [`DispatchError::ItemFailure`].
    pub fn invoke_async<F, T>(&self, callable: F) -> DispatchFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move || Ok(callable()))
    }

    /// Like [`invoke_async`](Dispatcher::invoke_async) for callables that
    /// report failure through `Result`; an `Err(e)` settles the future with
    /// `ItemFailure(e.to_string())`.
    pub fn invoke_fallible<F, T, E>(&self, callable: F) -> DispatchFuture<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Display,
    {
        self.submit(move || callable().map_err(|e| DispatchError::ItemFailure(e.to_string())))
    }

    /// Queue an optional callable. `None` fails with
    /// [`DispatchError::InvalidArgument`] and queues nothing.
    pub fn invoke_optional<F, T>(&self, callable: Option<F>) -> Result<DispatchFuture<T>, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let callable = callable
            .ok_or_else(|| DispatchError::InvalidArgument("callable must be provided".into()))?;
        Ok(self.invoke_async(callable))
    }

    fn submit<F, T>(&self, job: F) -> DispatchFuture<T>
    where
        F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        // `dispose` flips `disposed` under the exit lock, so nothing lands in
        // the queue once it has returned.
        let (seq, depth, future) = {
            let _exit = self.exit_lock();
            if self.is_disposed() {
                debug!(dispatcher = %self.id, "rejecting work item: dispatcher disposed");
                return DispatchFuture::settled(Err(DispatchError::Disposed));
            }
            // Sequence numbers are taken under the queue lock so they follow queue order.
            let mut queue = self.queue();
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let (item, future) = WorkItem::new(seq, job);
            queue.push_back(item);
            (seq, queue.len(), future)
        };

        self.with_metrics(|m| m.record_enqueue(depth));
        trace!(dispatcher = %self.id, seq, depth, "work item queued");

        let warn_depth = self.config.queue_warn_depth;
        if warn_depth > 0 && depth % warn_depth == 0 {
            warn!(dispatcher = %self.id, depth, "dispatcher queue is growing");
        }

        if self.is_running() && !self.is_cancelled() {
            self.wake.set();
        }
        future
    }
}
