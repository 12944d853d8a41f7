//! Liveness supervision for a looper.
//!
//! The worker stamps a [`Heartbeat`] around every dispatch and flags itself
//! idle while it waits for work. A [`Watchdog`] polls the heartbeat from its
//! own timer thread; when the worker has been busy longer than the configured
//! period, the stall callback runs once. It runs again only after the worker
//! has produced a fresh heartbeat and stalled anew.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use osal::sync::Mutex;
use osal::{Platform, Timer, TimerCallback, TimerConfig};

use crate::error::LooperError;

/// Smallest interval between two stall checks.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Callback invoked when a stall is detected.
pub(crate) type StallCallback = Arc<dyn Fn() + Send + Sync>;

/// Heartbeat shared between a looper worker and its watchdog.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    origin: Instant,
    last: AtomicU64,
    idle: AtomicBool,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
            idle: AtomicBool::new(true),
        }
    }

    /// Records progress and marks the worker busy.
    pub fn beat(&self) {
        self.last.store(self.stamp(Instant::now()), Ordering::Release);
        self.idle.store(false, Ordering::Release);
    }

    /// Marks the worker as waiting for work.
    pub fn set_idle(&self) {
        self.idle.store(true, Ordering::Release);
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Time since the last beat, as seen at `now`.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let last = self.last.load(Ordering::Acquire);
        Duration::from_nanos(self.stamp(now).saturating_sub(last))
    }

    fn last_stamp(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    fn stamp(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_nanos() as u64
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Edge detector turning heartbeat samples into stall episodes.
#[derive(Debug)]
pub(crate) struct StallDetector {
    period: Duration,
    tripped_on: Option<u64>,
}

impl StallDetector {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tripped_on: None,
        }
    }

    /// Returns `true` exactly once per stall episode.
    pub fn poll(&mut self, heartbeat: &Heartbeat, now: Instant) -> bool {
        if heartbeat.is_idle() {
            self.tripped_on = None;
            return false;
        }

        let stamp = heartbeat.last_stamp();
        if let Some(tripped) = self.tripped_on {
            if tripped == stamp {
                return false;
            }
            self.tripped_on = None;
        }

        if heartbeat.elapsed_at(now) > self.period {
            self.tripped_on = Some(stamp);
            true
        } else {
            false
        }
    }
}

/// Periodic supervisor attached to a looper.
pub(crate) struct Watchdog {
    timer: Box<dyn Timer>,
}

impl Watchdog {
    pub(crate) fn new(
        platform: &Platform,
        looper: &str,
        period: Duration,
        heartbeat: Arc<Heartbeat>,
        on_stall: StallCallback,
    ) -> Result<Self, LooperError> {
        if period.is_zero() {
            return Err(LooperError::InvalidConfig("watchdog period must be non-zero"));
        }

        let detector = Mutex::new(StallDetector::new(period));
        let name = looper.to_owned();
        let check: TimerCallback = Arc::new(move || {
            let stalled = detector.lock().poll(&heartbeat, Instant::now());
            if stalled {
                log::warn!("looper `{name}` has not made progress for over {period:?}");
                on_stall();
            }
        });

        let interval = (period / 2).max(MIN_CHECK_INTERVAL);
        let timer = platform
            .timers()
            .create(TimerConfig::periodic(format!("{looper}-wdt"), interval), check)?;

        Ok(Self { timer })
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_active()
    }

    pub(crate) fn arm(&self) -> Result<(), LooperError> {
        self.timer.start()?;
        Ok(())
    }

    pub(crate) fn disarm(&self) {
        self.timer.stop();
    }
}
