//! Synchronization primitives shared by the looper and queue crates.
//!
//! Re-exports the `parking_lot` lock types (no poisoning, so a panicking
//! handler cannot wedge a queue) and adds a deadline-bounded condition wait.

use std::time::{Duration, Instant};

pub use parking_lot::{Condvar, Mutex, MutexGuard};
pub use std::sync::Arc;

/// Converts a relative timeout into an absolute deadline.
///
/// Returns `None` when the deadline is not representable, e.g. for
/// `Duration::MAX`. Callers treat `None` as "wait forever".
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Blocks on `cond` until notified or until `deadline` passes.
///
/// Returns `true` when the wait ended because the deadline elapsed.
pub fn wait_deadline<T>(
    cond: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => cond.wait_until(guard, deadline).timed_out(),
        None => {
            cond.wait(guard);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrepresentable_deadline_means_forever() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_millis(5)).is_some());
    }

    #[test]
    fn wait_deadline_times_out() {
        let lock = Mutex::new(());
        let cond = Condvar::new();
        let mut guard = lock.lock();
        let start = Instant::now();
        let timed_out = wait_deadline(&cond, &mut guard, deadline_after(Duration::from_millis(20)));
        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
