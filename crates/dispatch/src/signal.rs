//! Auto-reset wake signal used between producers and the pump loop.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Single-slot, auto-reset event.
///
/// `set` marks the slot and releases at most one waiter; several sets
/// before a wait collapse into one wakeup. A waiter therefore learns only
/// that *something* was queued, never how much.
#[derive(Debug, Default)]
pub struct WakeSignal {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal and wake one waiter.
    pub fn set(&self) {
        let mut signalled = self.lock();
        *signalled = true;
        self.cond.notify_one();
    }

    /// Wait until signalled or until `timeout` elapses.
    ///
    /// Returns `true` if the signal was consumed, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut signalled, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |signalled| !*signalled)
            .unwrap_or_else(PoisonError::into_inner);

        if *signalled {
            *signalled = false;
            true
        } else {
            false
        }
    }

    /// Whether a set is pending (not yet consumed by a waiter).
    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    // The guarded bool has no invariant a panicking holder could break.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.signalled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn times_out_when_never_set() {
        let signal = WakeSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn set_before_wait_is_consumed_once() {
        let signal = WakeSignal::new();
        signal.set();
        signal.set();
        assert!(signal.is_set());

        assert!(signal.wait_timeout(Duration::from_millis(10)));
        // both sets collapsed into the one wakeup above
        assert!(!signal.is_set());
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        let signal = Arc::new(WakeSignal::new());
        let setter = signal.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        assert!(signal.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
