//! Thread factory.
//!
//! Workers are created from a [`ThreadConfig`] describing the name, priority,
//! stack size and whether the thread can be joined. The host implementation
//! maps onto `std::thread::Builder`; priorities are advisory there because the
//! standard library has no portable way to apply them.

use std::thread::{self, JoinHandle, ThreadId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::OsalError;

/// Default stack size for spawned threads.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Scheduling priority requested for a thread.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Configuration for a platform thread.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    pub name: String,
    pub priority: ThreadPriority,
    pub stack_size: usize,
    pub joinable: bool,
}

impl ThreadConfig {
    /// Creates a joinable, normal-priority configuration with the default
    /// stack size.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: ThreadPriority::Normal,
            stack_size: DEFAULT_STACK_SIZE,
            joinable: true,
        }
    }

    pub fn with_priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Marks the thread as detached; its handle cannot be joined.
    pub fn detached(mut self) -> Self {
        self.joinable = false;
        self
    }

    pub fn validate(&self) -> Result<(), OsalError> {
        if self.name.is_empty() {
            return Err(OsalError::InvalidConfig("thread name must not be empty"));
        }
        if self.stack_size == 0 {
            return Err(OsalError::InvalidConfig("thread stack size must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self::new("osal")
    }
}

/// Thread entry point.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a spawned thread.
#[derive(Debug)]
pub struct ThreadHandle {
    name: String,
    id: ThreadId,
    join: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    pub fn is_joinable(&self) -> bool {
        self.join.is_some()
    }

    /// Returns `true` when the calling thread is the one this handle refers to.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Waits for the thread to exit.
    ///
    /// Detached threads return immediately.
    pub fn join(self) -> Result<(), OsalError> {
        match self.join {
            Some(handle) => handle.join().map_err(|_| OsalError::Panicked(self.name)),
            None => {
                log::debug!("thread `{}` is detached, not joining", self.name);
                Ok(())
            }
        }
    }
}

/// Creates platform threads.
pub trait ThreadFactory: Send + Sync {
    fn spawn(&self, config: &ThreadConfig, entry: ThreadEntry) -> Result<ThreadHandle, OsalError>;
}

/// [`ThreadFactory`] backed by `std::thread`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdThreadFactory;

impl ThreadFactory for StdThreadFactory {
    fn spawn(&self, config: &ThreadConfig, entry: ThreadEntry) -> Result<ThreadHandle, OsalError> {
        config.validate()?;
        if config.priority != ThreadPriority::Normal {
            log::debug!(
                "thread `{}` requested {:?} priority; advisory on this host",
                config.name,
                config.priority
            );
        }

        let handle = thread::Builder::new()
            .name(config.name.clone())
            .stack_size(config.stack_size)
            .spawn(entry)
            .map_err(|source| OsalError::Spawn {
                name: config.name.clone(),
                source,
            })?;
        let id = handle.thread().id();
        log::trace!("spawned thread `{}` ({id:?})", config.name);

        Ok(ThreadHandle {
            name: config.name.clone(),
            id,
            join: config.joinable.then_some(handle),
        })
    }
}
