//! # msglooper
//!
//! Single-consumer message loops for actor-style components. A [`Looper`]
//! owns one worker thread and a time-ordered list of pending [`Message`]s;
//! producers on any thread post work, the worker runs it one message at a
//! time, so handlers need no locking of their own.
//!
//! ## Module Overview
//! - [`message`]  – messages, payloads, hooks and statuses.
//! - [`looper`]   – the worker loop, posting, cancellation and shutdown.
//!
//! [`Looper::enable_watchdog`] adds heartbeat-based stall detection.
//!
//! Threads and timers come from an [`osal::Platform`], chosen when the looper
//! is built.

mod error;
mod watchdog;

pub mod looper;
pub mod message;

pub use error::{LooperError, PostError};
pub use looper::{Looper, LooperBuilder};
pub use message::{DispatchFn, Message, MessageStatus, NotifyFn, Payload, ReleaseFn};
pub use osal::{Platform, ThreadConfig, ThreadPriority};

#[cfg(test)]
mod tests;
