//! # osal
//!
//! Host operating-system abstraction used by the `msglooper` and `mqueue`
//! crates. Everything that differs between targets (how threads are spawned,
//! where periodic timer callbacks come from, where log lines end up) sits
//! behind a small trait so the core crates never branch on the platform.
//!
//! ## Module Overview
//! - [`thread`] – thread factory with name / priority / stack size / joinable.
//! - [`timer`]  – periodic and one-shot timers driven by a monitor thread.
//! - [`logger`] – `log` sink with the `date time L tag: message` line format.
//! - [`sync`]   – lock types plus a deadline-bounded condition wait.
//!
//! A [`Platform`] bundles one thread factory and one timer source. It is
//! chosen once at process start and handed to the components that need it.

use core::fmt;
use std::sync::Arc;

mod error;

pub mod logger;
pub mod sync;
pub mod thread;
pub mod timer;

pub use error::OsalError;
pub use thread::{StdThreadFactory, ThreadConfig, ThreadFactory, ThreadHandle, ThreadPriority};
pub use timer::{ThreadTimerSource, Timer, TimerCallback, TimerConfig, TimerSource};

/// Platform strategy injected into loopers and watchdogs.
#[derive(Clone)]
pub struct Platform {
    threads: Arc<dyn ThreadFactory>,
    timers: Arc<dyn TimerSource>,
}

impl Platform {
    pub fn new(threads: Arc<dyn ThreadFactory>, timers: Arc<dyn TimerSource>) -> Self {
        Self { threads, timers }
    }

    /// Platform backed by `std::thread` and thread-driven timers.
    pub fn host() -> Self {
        let threads: Arc<dyn ThreadFactory> = Arc::new(StdThreadFactory);
        let timers: Arc<dyn TimerSource> = Arc::new(ThreadTimerSource::new(Arc::clone(&threads)));
        Self::new(threads, timers)
    }

    pub fn threads(&self) -> &Arc<dyn ThreadFactory> {
        &self.threads
    }

    pub fn timers(&self) -> &Arc<dyn TimerSource> {
        &self.timers
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
