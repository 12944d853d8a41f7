use thiserror::Error;

/// Errors reported by queues and queue sets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("cannot reserve {capacity} slots of {item_size} bytes")]
    Allocation { item_size: usize, capacity: usize },
    #[error("buffer of {actual} bytes does not fit the {expected}-byte item slot")]
    ItemSize { expected: usize, actual: usize },
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
    #[error("queue or set has been destroyed")]
    Closed,
    #[error("{0} thread(s) still blocked on the queue")]
    Busy(usize),
    #[error("queue of {requested} slots exceeds the {available} slots left in the set")]
    CapacityExceeded { requested: usize, available: usize },
    #[error("queue already belongs to a queue set")]
    AlreadyMember,
    #[error("queue is not a member of this set")]
    NotMember,
}

impl QueueError {
    /// `true` for outcomes that only mean "nothing happened within the
    /// timeout"; retrying later may succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Full | Self::Empty)
    }
}
