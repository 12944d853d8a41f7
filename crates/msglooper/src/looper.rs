//! Message looper: one worker thread draining a time-ordered pending list.
//!
//! The pending list is kept in dispatch order at insertion time:
//!
//! - [`Looper::post`] appends behind everything already due (FIFO);
//! - [`Looper::post_front`] goes ahead of every pending immediate message,
//!   LIFO among front posts, but behind delayed messages at the head of the
//!   list whose due time has already passed;
//! - [`Looper::post_delay`] is placed by due time, after entries with the
//!   same due time.
//!
//! The worker only pops the head once it is due, so everything still in the
//! list is cancellable. Hooks never run while the list lock is held.

use core::fmt::{self, Write as _};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use osal::sync::{Condvar, Mutex};
use osal::{Platform, ThreadConfig, ThreadHandle, ThreadPriority};

use crate::error::{LooperError, PostError};
use crate::message::{DispatchFn, Message, MessageStatus, ReleaseFn};
use crate::watchdog::{Heartbeat, StallCallback, Watchdog};

/// Longer delays are clamped so the due time stays representable.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
enum Placement {
    Back,
    Front,
    Delayed(Duration),
}

struct Entry {
    msg: Message,
    due: Instant,
    delayed: bool,
}

#[derive(Default)]
struct LooperState {
    pending: VecDeque<Entry>,
    running: bool,
    /// A worker thread exists and has not left its loop yet. Can outlive
    /// `running` when a handler stops its own looper.
    worker_active: bool,
    /// Bumped on every start; a worker exits once it no longer matches.
    epoch: u64,
}

impl LooperState {
    fn insert(&mut self, mut msg: Message, placement: Placement) {
        let now = Instant::now();
        msg.set_status(MessageStatus::Pending);
        let (due, delayed, index) = match placement {
            Placement::Back => (now, false, self.first_due_after(now)),
            Placement::Front => {
                let index = self
                    .pending
                    .iter()
                    .position(|e| !(e.delayed && e.due <= now))
                    .unwrap_or(self.pending.len());
                (now, false, index)
            }
            Placement::Delayed(delay) => {
                let due = now + delay.min(MAX_DELAY);
                (due, true, self.first_due_after(due))
            }
        };
        self.pending.insert(index, Entry { msg, due, delayed });
    }

    fn first_due_after(&self, due: Instant) -> usize {
        self.pending
            .iter()
            .position(|e| e.due > due)
            .unwrap_or(self.pending.len())
    }
}

struct Shared {
    name: String,
    state: Mutex<LooperState>,
    cond: Condvar,
    heartbeat: Arc<Heartbeat>,
    default_dispatch: Option<DispatchFn>,
    default_release: Option<ReleaseFn>,
}

/// Clears `worker_active` when the worker leaves its loop, also on panic.
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        self.0.heartbeat.set_idle();
        self.0.state.lock().worker_active = false;
        self.0.cond.notify_all();
    }
}

impl Shared {
    fn run(&self, epoch: u64) {
        let _exit = WorkerExit(self);
        log::debug!("looper `{}` worker started", self.name);
        while let Some(entry) = self.next_entry(epoch) {
            self.heartbeat.beat();
            self.execute(entry);
            self.heartbeat.beat();
        }
        log::debug!("looper `{}` worker exiting", self.name);
    }

    /// Blocks until the head of the list is due. `None` means exit.
    fn next_entry(&self, epoch: u64) -> Option<Entry> {
        let mut state = self.state.lock();
        loop {
            if !state.running || state.epoch != epoch {
                return None;
            }
            let now = Instant::now();
            match state.pending.front().map(|e| e.due) {
                Some(due) if due <= now => return state.pending.pop_front(),
                Some(due) => {
                    self.heartbeat.set_idle();
                    self.cond.wait_until(&mut state, due);
                }
                None => {
                    self.heartbeat.set_idle();
                    self.cond.wait(&mut state);
                }
            }
        }
    }

    fn execute(&self, entry: Entry) {
        let Entry { mut msg, due, .. } = entry;
        msg.set_status(MessageStatus::Running);

        let late = Instant::now().saturating_duration_since(due);
        let status = match msg.timeout() {
            Some(limit) if late > limit => {
                log::warn!(
                    "looper `{}`: message what={} expired ({late:?} late, timeout {limit:?})",
                    self.name,
                    msg.what
                );
                MessageStatus::Timeout
            }
            _ => {
                match msg.dispatch_hook().or_else(|| self.default_dispatch.clone()) {
                    Some(dispatch) => {
                        log::trace!("looper `{}`: dispatch what={}", self.name, msg.what);
                        dispatch(&mut msg);
                    }
                    None => log::warn!(
                        "looper `{}`: no dispatch handler for what={}",
                        self.name,
                        msg.what
                    ),
                }
                MessageStatus::Completed
            }
        };

        self.retire(msg, status);
    }

    /// Sets the final status, notifies and releases.
    fn retire(&self, mut msg: Message, status: MessageStatus) {
        debug_assert!(status.is_terminal());
        msg.set_status(status);
        if let Some(notify) = msg.notify_hook() {
            notify(&msg, status);
        }
        match msg.release_hook().or_else(|| self.default_release.clone()) {
            Some(release) => release(msg),
            None => drop(msg),
        }
    }
}

/// Builder for [`Looper`].
pub struct LooperBuilder {
    thread: ThreadConfig,
    dispatch: Option<DispatchFn>,
    release: Option<ReleaseFn>,
    platform: Option<Platform>,
}

impl LooperBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            thread: ThreadConfig::new(name),
            dispatch: None,
            release: None,
            platform: None,
        }
    }

    /// Replaces the whole worker thread configuration.
    pub fn thread_config(mut self, config: ThreadConfig) -> Self {
        self.thread = config;
        self
    }

    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.thread.priority = priority;
        self
    }

    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.thread.stack_size = stack_size;
        self
    }

    /// Default dispatch hook for messages that do not carry one.
    pub fn dispatch<F>(mut self, dispatch: F) -> Self
    where
        F: Fn(&mut Message) + Send + Sync + 'static,
    {
        self.dispatch = Some(Arc::new(dispatch));
        self
    }

    /// Default release hook for messages that do not carry one.
    pub fn release<F>(mut self, release: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(release));
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn build(self) -> Result<Looper, LooperError> {
        let Self {
            mut thread,
            dispatch,
            release,
            platform,
        } = self;

        thread.validate().map_err(|err| match err {
            osal::OsalError::InvalidConfig(reason) => LooperError::InvalidConfig(reason),
            other => LooperError::Platform(other),
        })?;
        if !thread.joinable {
            log::debug!("looper `{}`: worker forced joinable", thread.name);
            thread.joinable = true;
        }

        let shared = Arc::new(Shared {
            name: thread.name.clone(),
            state: Mutex::new(LooperState::default()),
            cond: Condvar::new(),
            heartbeat: Arc::new(Heartbeat::new()),
            default_dispatch: dispatch,
            default_release: release,
        });

        Ok(Looper {
            shared,
            thread,
            platform: platform.unwrap_or_default(),
            worker: Mutex::new(None),
            watchdog: Mutex::new(None),
        })
    }
}

/// Single-consumer message loop.
///
/// All methods take `&self`; share the looper between producers with an
/// `Arc`. Dropping a running looper stops it.
pub struct Looper {
    shared: Arc<Shared>,
    thread: ThreadConfig,
    platform: Platform,
    worker: Mutex<Option<ThreadHandle>>,
    watchdog: Mutex<Option<Watchdog>>,
}

impl Looper {
    pub fn builder(name: impl Into<String>) -> LooperBuilder {
        LooperBuilder::new(name)
    }

    /// Creates a stopped looper from a thread configuration and default hooks.
    pub fn create(
        thread: ThreadConfig,
        dispatch: Option<DispatchFn>,
        release: Option<ReleaseFn>,
    ) -> Result<Self, LooperError> {
        let mut builder = LooperBuilder::new(thread.name.clone()).thread_config(thread);
        builder.dispatch = dispatch;
        builder.release = release;
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Spawns the worker thread.
    ///
    /// After a handler stopped its own looper, waits for that handler to
    /// return first. Restarting from inside that handler fails with
    /// [`LooperError::AlreadyRunning`].
    pub fn start(&self) -> Result<(), LooperError> {
        let mut state = self.shared.state.lock();
        if state.running {
            return Err(LooperError::AlreadyRunning(self.shared.name.clone()));
        }
        while state.worker_active {
            if self.worker.lock().as_ref().is_some_and(ThreadHandle::is_current) {
                log::warn!(
                    "looper `{}`: restart requested from its own handler",
                    self.shared.name
                );
                return Err(LooperError::AlreadyRunning(self.shared.name.clone()));
            }
            self.shared.cond.wait(&mut state);
        }
        if let Some(previous) = self.worker.lock().take() {
            if let Err(err) = previous.join() {
                log::warn!("looper `{}` worker ended abnormally: {err}", self.shared.name);
            }
        }

        state.epoch += 1;
        state.running = true;
        state.worker_active = true;
        let epoch = state.epoch;
        let shared = Arc::clone(&self.shared);
        let handle = match self
            .platform
            .threads()
            .spawn(&self.thread, Box::new(move || shared.run(epoch)))
        {
            Ok(handle) => handle,
            Err(err) => {
                state.running = false;
                state.worker_active = false;
                return Err(err.into());
            }
        };
        *self.worker.lock() = Some(handle);

        self.shared.heartbeat.beat();
        if let Some(watchdog) = self.watchdog.lock().as_ref() {
            if let Err(err) = watchdog.arm() {
                log::warn!("looper `{}`: failed to arm watchdog: {err}", self.shared.name);
            }
        }
        log::debug!("looper `{}` started", self.shared.name);
        Ok(())
    }

    /// Stops the worker and releases every message that has not run.
    ///
    /// Waits for the message currently being dispatched. Calling `stop` from
    /// a handler running on this looper does not wait for itself.
    pub fn stop(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            self.shared.cond.notify_all();
            if let Some(watchdog) = self.watchdog.lock().as_ref() {
                watchdog.disarm();
            }
            self.worker.lock().take()
        };

        if let Some(handle) = handle {
            if handle.is_current() {
                log::debug!("looper `{}` stopped from its own handler", self.shared.name);
                // Joined by the next `start` once the handler returns.
                *self.worker.lock() = Some(handle);
            } else if let Err(err) = handle.join() {
                log::warn!("looper `{}` worker ended abnormally: {err}", self.shared.name);
            }
        }

        let drained: Vec<Entry> = self.shared.state.lock().pending.drain(..).collect();
        let released = drained.len();
        for entry in drained {
            self.shared.retire(entry.msg, MessageStatus::Destroy);
        }
        log::debug!(
            "looper `{}` stopped, released {released} pending message(s)",
            self.shared.name
        );
    }

    /// Stops the looper if needed and frees it.
    pub fn destroy(self) {
        if self.is_running() {
            log::warn!("looper `{}` destroyed while running", self.shared.name);
        }
        drop(self);
    }

    /// Appends a message behind everything already due.
    pub fn post(&self, msg: Message) -> Result<(), PostError> {
        self.enqueue(msg, Placement::Back)
    }

    /// Puts a message ahead of every pending immediate message.
    pub fn post_front(&self, msg: Message) -> Result<(), PostError> {
        self.enqueue(msg, Placement::Front)
    }

    /// Schedules a message `delay` from now.
    pub fn post_delay(&self, msg: Message, delay: Duration) -> Result<(), PostError> {
        self.enqueue(msg, Placement::Delayed(delay))
    }

    fn enqueue(&self, msg: Message, placement: Placement) -> Result<(), PostError> {
        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(PostError::new(&self.shared.name, msg));
        }
        log::trace!(
            "looper `{}`: post what={} {placement:?}",
            self.shared.name,
            msg.what
        );
        state.insert(msg, placement);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Cancels every pending message with the given `what`.
    pub fn remove(&self, what: i32) -> usize {
        self.remove_if(|msg| msg.what == what)
    }

    /// Cancels every pending message matching `predicate`.
    ///
    /// The predicate runs with the looper locked and must not call back into
    /// it. The message being dispatched, if any, is never matched. Returns the
    /// number of messages cancelled.
    pub fn remove_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Message) -> bool,
    {
        let removed: Vec<Entry> = {
            let mut state = self.shared.state.lock();
            let (removed, kept): (Vec<Entry>, Vec<Entry>) =
                state.pending.drain(..).partition(|e| predicate(&e.msg));
            state.pending = kept.into();
            self.shared.cond.notify_all();
            removed
        };

        let count = removed.len();
        for entry in removed {
            self.shared.retire(entry.msg, MessageStatus::Destroy);
        }
        if count > 0 {
            log::debug!("looper `{}`: removed {count} message(s)", self.shared.name);
        }
        count
    }

    /// Number of messages waiting to be dispatched.
    pub fn message_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Describes the pending list, one message per line, and logs it.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        {
            let state = self.shared.state.lock();
            let now = Instant::now();
            let _ = writeln!(
                out,
                "looper `{}` ({}): {} pending",
                self.shared.name,
                if state.running { "running" } else { "stopped" },
                state.pending.len()
            );
            for (index, entry) in state.pending.iter().enumerate() {
                let msg = &entry.msg;
                let _ = writeln!(
                    out,
                    "  #{index} what={} arg1={} arg2={} status={} due_in={:?} timeout={:?} data={:?}",
                    msg.what,
                    msg.arg1,
                    msg.arg2,
                    msg.status(),
                    entry.due.saturating_duration_since(now),
                    msg.timeout(),
                    msg.data()
                );
            }
        }
        log::info!("{}", out.trim_end());
        out
    }

    /// Arms liveness supervision. `on_stall` runs on the watchdog thread
    /// once per stall longer than `period`.
    ///
    /// Replaces any previous watchdog. Armed immediately when running,
    /// otherwise on the next `start`.
    pub fn enable_watchdog<F>(&self, period: Duration, on_stall: F) -> Result<(), LooperError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let on_stall: StallCallback = Arc::new(on_stall);
        let watchdog = Watchdog::new(
            &self.platform,
            &self.shared.name,
            period,
            Arc::clone(&self.shared.heartbeat),
            on_stall,
        )?;

        let state = self.shared.state.lock();
        if state.running {
            watchdog.arm()?;
        }
        let previous = self.watchdog.lock().replace(watchdog);
        drop(state);
        drop(previous);
        log::debug!("looper `{}`: watchdog enabled ({period:?})", self.shared.name);
        Ok(())
    }

    pub fn disable_watchdog(&self) {
        let previous = self.watchdog.lock().take();
        if previous.is_some() {
            log::debug!("looper `{}`: watchdog disabled", self.shared.name);
        }
    }

    /// `true` while a watchdog is attached and its timer is running.
    pub fn watchdog_armed(&self) -> bool {
        self.watchdog
            .lock()
            .as_ref()
            .map(Watchdog::is_armed)
            .unwrap_or(false)
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.stop();
        self.disable_watchdog();
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Looper")
            .field("name", &self.shared.name)
            .field("running", &state.running)
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}
