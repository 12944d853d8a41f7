//! Periodic and one-shot timers.
//!
//! Each [`ThreadTimer`] owns a small monitor thread that sleeps until the next
//! absolute deadline and then runs the callback outside of any lock. Periodic
//! timers advance their deadline by whole periods so they do not drift; if the
//! callback overruns by more than a period the schedule restarts from now
//! instead of firing a burst of catch-up ticks.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::sync::{Condvar, Mutex, MutexGuard};
use crate::thread::{ThreadConfig, ThreadFactory, ThreadHandle};
use crate::OsalError;

/// Stack size for timer monitor threads.
const TIMER_STACK_SIZE: usize = 32 * 1024;

/// Timer configuration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    pub name: String,
    pub period: Duration,
    /// Re-arm after every expiry.
    pub reload: bool,
}

impl TimerConfig {
    pub fn periodic(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            reload: true,
        }
    }

    pub fn one_shot(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            reload: false,
        }
    }
}

pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// A created timer. Dropping it destroys it.
pub trait Timer: Send + Sync {
    /// Arms the timer; the first expiry is one period from now.
    fn start(&self) -> Result<(), OsalError>;
    fn stop(&self);
    fn is_active(&self) -> bool;
}

/// Creates timers.
pub trait TimerSource: Send + Sync {
    fn create(&self, config: TimerConfig, callback: TimerCallback) -> Result<Box<dyn Timer>, OsalError>;
}

/// [`TimerSource`] that drives every timer from its own monitor thread.
pub struct ThreadTimerSource {
    threads: Arc<dyn ThreadFactory>,
}

impl ThreadTimerSource {
    pub fn new(threads: Arc<dyn ThreadFactory>) -> Self {
        Self { threads }
    }
}

impl fmt::Debug for ThreadTimerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTimerSource").finish_non_exhaustive()
    }
}

impl TimerSource for ThreadTimerSource {
    fn create(&self, config: TimerConfig, callback: TimerCallback) -> Result<Box<dyn Timer>, OsalError> {
        if config.period.is_zero() {
            return Err(OsalError::InvalidConfig("timer period must be non-zero"));
        }

        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            cond: Condvar::new(),
            period: config.period,
            reload: config.reload,
            callback,
        });

        let worker = Arc::clone(&shared);
        let thread_cfg = ThreadConfig::new(config.name.clone()).with_stack_size(TIMER_STACK_SIZE);
        let handle = self
            .threads
            .spawn(&thread_cfg, Box::new(move || worker.run()))?;

        Ok(Box::new(ThreadTimer {
            name: config.name,
            shared,
            handle: Some(handle),
        }))
    }
}

#[derive(Default)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
    period: Duration,
    reload: bool,
    callback: TimerCallback,
}

impl TimerShared {
    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                break;
            }
            let Some(deadline) = state.deadline else {
                self.cond.wait(&mut state);
                continue;
            };
            let now = Instant::now();
            if now < deadline {
                self.cond.wait_until(&mut state, deadline);
                continue;
            }

            state.deadline = if self.reload {
                let next = deadline + self.period;
                Some(if next <= now { now + self.period } else { next })
            } else {
                None
            };
            MutexGuard::unlocked(&mut state, || (self.callback)());
        }
    }
}

/// Timer driven by a dedicated monitor thread.
pub struct ThreadTimer {
    name: String,
    shared: Arc<TimerShared>,
    handle: Option<ThreadHandle>,
}

impl Timer for ThreadTimer {
    fn start(&self) -> Result<(), OsalError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(OsalError::InvalidConfig("timer has been destroyed"));
        }
        state.deadline = Some(Instant::now() + self.shared.period);
        self.shared.cond.notify_all();
        log::trace!("timer `{}` armed for {:?}", self.name, self.shared.period);
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        self.shared.cond.notify_all();
    }

    fn is_active(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.is_current() {
                log::warn!("timer `{}` destroyed from its own callback", self.name);
                return;
            }
            if let Err(err) = handle.join() {
                log::warn!("timer `{}` monitor exited abnormally: {err}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::StdThreadFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn source() -> ThreadTimerSource {
        ThreadTimerSource::new(Arc::new(StdThreadFactory))
    }

    fn counter() -> (Arc<AtomicUsize>, TimerCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&count);
        let cb: TimerCallback = Arc::new(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        });
        (count, cb)
    }

    #[test]
    fn zero_period_is_rejected() {
        let (_, cb) = counter();
        let err = source()
            .create(TimerConfig::periodic("zero", Duration::ZERO), cb)
            .err()
            .expect("zero period must fail");
        assert!(matches!(err, OsalError::InvalidConfig(_)));
    }

    #[test]
    fn periodic_timer_fires_repeatedly() {
        let (count, cb) = counter();
        let timer = source()
            .create(TimerConfig::periodic("periodic", Duration::from_millis(10)), cb)
            .expect("create timer");
        assert!(!timer.is_active());

        timer.start().expect("start timer");
        assert!(timer.is_active());
        thread::sleep(Duration::from_millis(105));
        timer.stop();
        assert!(!timer.is_active());

        let fired = count.load(Ordering::SeqCst);
        assert!((5..=12).contains(&fired), "expected ~10 expiries, got {fired}");

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn one_shot_timer_fires_once() {
        let (count, cb) = counter();
        let timer = source()
            .create(TimerConfig::one_shot("once", Duration::from_millis(10)), cb)
            .expect("create timer");

        timer.start().expect("start timer");
        thread::sleep(Duration::from_millis(60));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
    }

    #[test]
    fn dropping_timer_stops_callbacks() {
        let (count, cb) = counter();
        let timer = source()
            .create(TimerConfig::periodic("dropped", Duration::from_millis(5)), cb)
            .expect("create timer");
        timer.start().expect("start timer");
        drop(timer);

        let after_drop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
