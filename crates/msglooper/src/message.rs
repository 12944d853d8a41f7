//! Messages handed to a [`Looper`](crate::Looper).
//!
//! A message carries an identity (`what`), two integer arguments, a tagged
//! payload and up to three hooks. Hooks left unset fall back to the defaults
//! of the looper that ends up executing the message.
//!
//! The release hook takes the message by value: whatever path retires a
//! message (dispatch, timeout, cancellation, shutdown) hands it to release
//! exactly once, and nothing can touch it afterwards.

use core::fmt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of a message.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageStatus {
    New = 0,
    Pending,
    Running,
    Completed,
    Timeout,
    Destroy,
}

impl MessageStatus {
    /// `true` for statuses after which the message is released.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Timeout | Self::Destroy)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Timeout => "TIMEOUT",
            Self::Destroy => "DESTROY",
        };
        f.write_str(name)
    }
}

/// Message payload.
///
/// `Owned` data belongs to the message and is dropped when the message is
/// released. `Shared` data is reference counted; releasing the message only
/// gives up this message's reference.
#[derive(Default)]
pub enum Payload {
    #[default]
    Empty,
    Owned(Box<dyn Any + Send>),
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn owned<T: Any + Send>(value: T) -> Self {
        Self::Owned(Box::new(value))
    }

    pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self::Shared(value)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Empty => None,
            Self::Owned(value) => value.downcast_ref(),
            Self::Shared(value) => value.downcast_ref(),
        }
    }

    /// Moves owned data of type `T` out, leaving `Empty` behind.
    ///
    /// Shared data and owned data of another type stay in place.
    pub fn take_owned<T: Any>(&mut self) -> Option<T> {
        match core::mem::take(self) {
            Self::Owned(value) => match value.downcast::<T>() {
                Ok(value) => Some(*value),
                Err(value) => {
                    *self = Self::Owned(value);
                    None
                }
            },
            other => {
                *self = other;
                None
            }
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Owned(_) => f.write_str("Owned(..)"),
            Self::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

/// Executes a message on the looper thread.
pub type DispatchFn = Arc<dyn Fn(&mut Message) + Send + Sync>;
/// Retires a message and frees its payload.
pub type ReleaseFn = Arc<dyn Fn(Message) + Send + Sync>;
/// Observes the final status of a message.
pub type NotifyFn = Arc<dyn Fn(&Message, MessageStatus) + Send + Sync>;

/// A unit of work for a looper.
pub struct Message {
    pub what: i32,
    pub arg1: i32,
    pub arg2: i32,
    data: Payload,
    timeout: Option<Duration>,
    status: MessageStatus,
    dispatch: Option<DispatchFn>,
    release: Option<ReleaseFn>,
    notify: Option<NotifyFn>,
}

impl Message {
    /// Creates a message that uses the looper's default hooks and never
    /// times out.
    pub fn obtain(what: i32, arg1: i32, arg2: i32, data: Payload) -> Self {
        Self {
            what,
            arg1,
            arg2,
            data,
            timeout: None,
            status: MessageStatus::New,
            dispatch: None,
            release: None,
            notify: None,
        }
    }

    /// Creates a message with explicit hooks. A zero `timeout` never expires.
    #[allow(clippy::too_many_arguments)]
    pub fn obtain_full(
        what: i32,
        arg1: i32,
        arg2: i32,
        data: Payload,
        timeout: Duration,
        dispatch: Option<DispatchFn>,
        release: Option<ReleaseFn>,
        notify: Option<NotifyFn>,
    ) -> Self {
        let mut msg = Self::obtain(what, arg1, arg2, data).with_timeout(timeout);
        msg.dispatch = dispatch;
        msg.release = release;
        msg.notify = notify;
        msg
    }

    /// Shorthand for a message without arguments or payload.
    pub fn empty(what: i32) -> Self {
        Self::obtain(what, 0, 0, Payload::Empty)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn with_dispatch<F>(mut self, dispatch: F) -> Self
    where
        F: Fn(&mut Message) + Send + Sync + 'static,
    {
        self.dispatch = Some(Arc::new(dispatch));
        self
    }

    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(release));
        self
    }

    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&Message, MessageStatus) + Send + Sync + 'static,
    {
        self.notify = Some(Arc::new(notify));
        self
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Payload {
        &mut self.data
    }

    pub fn data_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    /// Takes the whole payload, leaving `Empty` behind.
    pub fn take_data(&mut self) -> Payload {
        core::mem::take(&mut self.data)
    }

    pub(crate) fn set_status(&mut self, status: MessageStatus) {
        self.status = status;
    }

    pub(crate) fn dispatch_hook(&self) -> Option<DispatchFn> {
        self.dispatch.clone()
    }

    pub(crate) fn release_hook(&self) -> Option<ReleaseFn> {
        self.release.clone()
    }

    pub(crate) fn notify_hook(&self) -> Option<NotifyFn> {
        self.notify.clone()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("what", &self.what)
            .field("arg1", &self.arg1)
            .field("arg2", &self.arg2)
            .field("data", &self.data)
            .field("timeout", &self.timeout)
            .field("status", &self.status)
            .field("dispatch", &self.dispatch.is_some())
            .field("release", &self.release.is_some())
            .field("notify", &self.notify.is_some())
            .finish()
    }
}
