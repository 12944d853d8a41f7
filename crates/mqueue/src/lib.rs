//! # mqueue
//!
//! Bounded mailbox queues of fixed-size byte items and queue sets that let a
//! single consumer block on several queues at once.
//!
//! ## Module Overview
//! - [`queue`] – [`MessageQueue`], a ring buffer with timed send / receive.
//! - [`set`]   – [`QueueSet`], readiness select across member queues.
//!
//! [`QueueSet::select`] only reports *which* queue has data; the caller then
//! receives from it. That two-step protocol assumes one consumer per set.
//! [`QueueSet::select_receive`] does both steps at once and tolerates several
//! consumers.

mod error;

pub mod queue;
pub mod set;

pub use error::QueueError;
pub use queue::{MessageQueue, QueueId, WAIT_FOREVER};
pub use set::QueueSet;
