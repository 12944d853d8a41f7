//! Bounded mailbox queue of fixed-size byte items.
//!
//! Each queue owns a ring buffer of `capacity` slots, each `item_size` bytes.
//! Items are copied in on send and copied out on receive, so the caller keeps
//! ownership of its buffers. Senders block while the ring is full, receivers
//! block while it is empty, both bounded by a [`Duration`] timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;

use log::{debug, trace};
use osal::sync::{deadline_after, wait_deadline, Arc, Condvar, Mutex};

use crate::error::QueueError;
use crate::set::SetShared;

/// Timeout value that blocks until the operation can complete.
pub const WAIT_FOREVER: Duration = Duration::MAX;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique queue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u64);

impl QueueId {
    fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

struct Ring {
    buf: Vec<u8>,
    head: usize,
    count: usize,
    blocked: usize,
    closed: bool,
}

impl Ring {
    fn write(&mut self, item: &[u8], item_size: usize, capacity: usize) {
        let slot = (self.head + self.count) % capacity;
        let start = slot * item_size;
        let dst = &mut self.buf[start..start + item_size];
        dst[..item.len()].copy_from_slice(item);
        dst[item.len()..].fill(0);
        self.count += 1;
    }

    fn read(&mut self, out: &mut [u8], item_size: usize, capacity: usize) {
        let start = self.head * item_size;
        out[..item_size].copy_from_slice(&self.buf[start..start + item_size]);
        self.head = (self.head + 1) % capacity;
        self.count -= 1;
    }
}

pub(crate) struct QueueInner {
    id: QueueId,
    item_size: usize,
    capacity: usize,
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Set this queue currently belongs to, if any.
    pub(crate) set: Mutex<Option<Weak<SetShared>>>,
}

/// Handle to a bounded mailbox queue.
///
/// Cloning the handle shares the queue. Two handles compare equal when they
/// refer to the same queue.
#[derive(Clone)]
pub struct MessageQueue {
    pub(crate) inner: Arc<QueueInner>,
}

impl MessageQueue {
    /// Creates a queue holding up to `capacity` items of `item_size` bytes.
    ///
    /// The whole ring is reserved up front; a reservation the allocator
    /// refuses is reported as [`QueueError::Allocation`].
    pub fn create(item_size: usize, capacity: usize) -> Result<Self, QueueError> {
        if item_size == 0 {
            return Err(QueueError::InvalidConfig("item size must be non-zero"));
        }
        if capacity == 0 {
            return Err(QueueError::InvalidConfig("capacity must be non-zero"));
        }
        let alloc_err = QueueError::Allocation {
            item_size,
            capacity,
        };
        let len = item_size.checked_mul(capacity).ok_or(alloc_err.clone())?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| alloc_err)?;
        buf.resize(len, 0);

        let id = QueueId::next();
        trace!("queue {id} created: {capacity} x {item_size} bytes");
        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                item_size,
                capacity,
                ring: Mutex::new(Ring {
                    buf,
                    head: 0,
                    count: 0,
                    blocked: 0,
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                set: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    pub fn item_size(&self) -> usize {
        self.inner.item_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.inner.capacity
    }

    /// `true` once [`destroy`](Self::destroy) succeeded.
    pub fn is_closed(&self) -> bool {
        self.inner.ring.lock().closed
    }

    /// Copies `item` into the tail slot, blocking up to `timeout` while the
    /// queue is full.
    ///
    /// Items shorter than the slot are zero-padded. On timeout nothing is
    /// written and [`QueueError::Full`] is returned.
    pub fn send(&self, item: &[u8], timeout: Duration) -> Result<(), QueueError> {
        let (item_size, capacity) = (self.inner.item_size, self.inner.capacity);
        if item.len() > item_size {
            return Err(QueueError::ItemSize {
                expected: item_size,
                actual: item.len(),
            });
        }

        let deadline = deadline_after(timeout);
        let mut ring = self.inner.ring.lock();
        loop {
            if ring.closed {
                return Err(QueueError::Closed);
            }
            if ring.count < capacity {
                break;
            }
            if timeout.is_zero() {
                return Err(QueueError::Full);
            }
            ring.blocked += 1;
            let timed_out = wait_deadline(&self.inner.not_full, &mut ring, deadline);
            ring.blocked -= 1;
            if timed_out && !ring.closed && ring.count >= capacity {
                return Err(QueueError::Full);
            }
        }

        ring.write(item, item_size, capacity);
        drop(ring);

        self.inner.not_empty.notify_one();
        self.notify_set();
        Ok(())
    }

    /// Copies the head item into `out`, blocking up to `timeout` while the
    /// queue is empty.
    ///
    /// `out` must hold at least [`item_size`](Self::item_size) bytes; only
    /// that prefix is written.
    pub fn receive(&self, out: &mut [u8], timeout: Duration) -> Result<(), QueueError> {
        let (item_size, capacity) = (self.inner.item_size, self.inner.capacity);
        if out.len() < item_size {
            return Err(QueueError::ItemSize {
                expected: item_size,
                actual: out.len(),
            });
        }

        let deadline = deadline_after(timeout);
        let mut ring = self.inner.ring.lock();
        loop {
            if ring.count > 0 {
                break;
            }
            if ring.closed {
                return Err(QueueError::Closed);
            }
            if timeout.is_zero() {
                return Err(QueueError::Empty);
            }
            ring.blocked += 1;
            let timed_out = wait_deadline(&self.inner.not_empty, &mut ring, deadline);
            ring.blocked -= 1;
            if timed_out && ring.count == 0 {
                return Err(if ring.closed {
                    QueueError::Closed
                } else {
                    QueueError::Empty
                });
            }
        }

        ring.read(out, item_size, capacity);
        drop(ring);

        self.inner.not_full.notify_one();
        Ok(())
    }

    /// Non-blocking [`send`](Self::send).
    pub fn try_send(&self, item: &[u8]) -> Result<(), QueueError> {
        self.send(item, Duration::ZERO)
    }

    /// Non-blocking [`receive`](Self::receive).
    pub fn try_receive(&self, out: &mut [u8]) -> Result<(), QueueError> {
        self.receive(out, Duration::ZERO)
    }

    /// Closes the queue.
    ///
    /// Fails with [`QueueError::Busy`] while any thread is blocked in
    /// `send` or `receive`. After success every operation on any handle
    /// returns [`QueueError::Closed`] and the queue leaves its set.
    pub fn destroy(&self) -> Result<(), QueueError> {
        {
            let mut ring = self.inner.ring.lock();
            if ring.closed {
                return Ok(());
            }
            if ring.blocked > 0 {
                return Err(QueueError::Busy(ring.blocked));
            }
            ring.closed = true;
            ring.count = 0;
        }

        let set = self.inner.set.lock().take();
        if let Some(set) = set.and_then(|weak| weak.upgrade()) {
            set.detach(self);
        }
        debug!("queue {} destroyed", self.inner.id);
        Ok(())
    }

    fn notify_set(&self) {
        let set = self.inner.set.lock().as_ref().and_then(Weak::upgrade);
        if let Some(set) = set {
            set.signal();
        }
    }
}

impl PartialEq for MessageQueue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MessageQueue {}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.inner.ring.lock();
        f.debug_struct("MessageQueue")
            .field("id", &self.inner.id)
            .field("item_size", &self.inner.item_size)
            .field("capacity", &self.inner.capacity)
            .field("len", &ring.count)
            .field("closed", &ring.closed)
            .finish()
    }
}
