//! Single-settlement result channel between a work item and its submitter.
//!
//! [`DispatchFuture`] is handed to whoever called `invoke_*`; the matching
//! [`Completer`] travels inside the work item and is settled on the owner
//! thread. Both sides sit on a `tokio::sync::oneshot` channel, so the future
//! can be awaited from async code or waited on from a plain thread.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use affinity_core::DispatchError;
use tokio::sync::oneshot;
use tracing::trace;

type Outcome<T> = Result<T, DispatchError>;

/// Handle to the eventual result of a dispatched work item.
///
/// Resolves to the callable's value, to [`DispatchError::ItemFailure`] when
/// the callable failed, or to [`DispatchError::Abandoned`] when the item was
/// dropped without running.
#[must_use = "a DispatchFuture does nothing unless awaited or waited on"]
#[derive(Debug)]
pub struct DispatchFuture<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> DispatchFuture<T> {
    pub(crate) fn pair() -> (Completer<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx: Some(tx) }, Self { rx })
    }

    /// A future that is already settled with `outcome`.
    pub fn settled(outcome: Outcome<T>) -> Self {
        let (mut completer, future) = Self::pair();
        completer.settle(outcome);
        future
    }

    /// Block the current thread until the item settles.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async runtime; `.await` the future
    /// there instead.
    ///
    /// Never wait on the owner thread for an item that has not run yet.
    /// Outside `run` nothing else will execute it, and from inside a work
    /// item the pump cannot reach it until the current item returns. Both
    /// block forever.
    pub fn wait(self) -> Outcome<T> {
        self.rx.blocking_recv().unwrap_or(Err(DispatchError::Abandoned))
    }
}

impl<T> Future for DispatchFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::Abandoned)))
    }
}

/// Settlement side of a [`DispatchFuture`]. Settles exactly once.
#[derive(Debug)]
pub(crate) struct Completer<T> {
    tx: Option<oneshot::Sender<Outcome<T>>>,
}

impl<T> Completer<T> {
    /// Record the outcome.
    ///
    /// A second settlement is a contract violation: it trips a debug
    /// assertion and is otherwise ignored.
    pub(crate) fn settle(&mut self, outcome: Outcome<T>) {
        match self.tx.take() {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    trace!("dispatch future dropped before settlement");
                }
            }
            None => debug_assert!(false, "dispatch future settled twice"),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn settle_then_wait() {
        let (mut completer, future) = DispatchFuture::pair();
        assert!(!completer.is_settled());
        completer.settle(Ok(42));
        assert!(completer.is_settled());
        assert_eq!(future.wait(), Ok(42));
    }

    #[test]
    fn failure_is_delivered() {
        let future: DispatchFuture<()> =
            DispatchFuture::settled(Err(DispatchError::ItemFailure("boom".into())));
        assert_eq!(future.wait(), Err(DispatchError::ItemFailure("boom".into())));
    }

    #[test]
    fn dropped_completer_abandons() {
        let (completer, future) = DispatchFuture::<u32>::pair();
        drop(completer);
        assert_eq!(future.wait(), Err(DispatchError::Abandoned));
    }

    #[test]
    fn settling_after_future_dropped_is_quiet() {
        let (mut completer, future) = DispatchFuture::pair();
        drop(future);
        completer.settle(Ok("late"));
        assert!(completer.is_settled());
    }

    #[test]
    fn wait_blocks_until_settled_on_another_thread() {
        let (mut completer, future) = DispatchFuture::pair();
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            completer.settle(Ok(String::from("done")));
        });
        assert_eq!(future.wait(), Ok(String::from("done")));
        handle.join().unwrap();
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "settled twice")]
    fn double_settle_panics_in_debug() {
        let (mut completer, _future) = DispatchFuture::pair();
        completer.settle(Ok(1));
        completer.settle(Ok(2));
    }

    #[tokio::test]
    async fn awaitable_from_async_context() {
        let (mut completer, future) = DispatchFuture::pair();
        let handle = thread::spawn(move || completer.settle(Ok(7u8)));
        assert_eq!(future.await, Ok(7));
        handle.join().unwrap();
    }
}
