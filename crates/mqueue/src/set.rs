//! Queue sets: block on several queues and learn which one has data.
//!
//! A set has a total capacity; the capacities of its members may not exceed
//! it. A queue belongs to at most one set at a time. Senders wake the set's
//! selectors after every successful send, so a select never sleeps through
//! an item that arrived while it was scanning.

use std::fmt;
use std::time::Duration;

use log::debug;
use osal::sync::{deadline_after, wait_deadline, Arc, Condvar, Mutex};

use crate::error::QueueError;
use crate::queue::MessageQueue;

struct SetState {
    members: Vec<MessageQueue>,
    /// Member index where the next scan starts.
    cursor: usize,
    used: usize,
    closed: bool,
}

impl SetState {
    /// Round-robin scan starting at the cursor. The cursor moves past the
    /// returned member so a busy queue cannot starve the others.
    fn next_ready(&mut self) -> Option<MessageQueue> {
        let n = self.members.len();
        let idx = (0..n)
            .map(|step| (self.cursor + step) % n)
            .find(|&idx| !self.members[idx].is_empty())?;
        self.cursor = (idx + 1) % n;
        Some(self.members[idx].clone())
    }

    fn take_ready(&mut self, out: &mut [u8]) -> Result<Option<MessageQueue>, QueueError> {
        let n = self.members.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            match self.members[idx].try_receive(out) {
                Ok(()) => {
                    self.cursor = (idx + 1) % n;
                    return Ok(Some(self.members[idx].clone()));
                }
                Err(QueueError::Empty | QueueError::Closed) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn position(&self, queue: &MessageQueue) -> Option<usize> {
        self.members.iter().position(|member| member == queue)
    }

    fn remove_at(&mut self, idx: usize) -> MessageQueue {
        let queue = self.members.remove(idx);
        self.used -= queue.capacity();
        if self.cursor > idx {
            self.cursor -= 1;
        }
        if self.cursor >= self.members.len() {
            self.cursor = 0;
        }
        queue
    }
}

pub(crate) struct SetShared {
    total_capacity: usize,
    state: Mutex<SetState>,
    ready: Condvar,
}

impl SetShared {
    /// Wakes selectors. Taking the state lock orders the wakeup after any
    /// scan in progress, which then either saw the item or is already waiting.
    pub(crate) fn signal(&self) {
        let _state = self.state.lock();
        self.ready.notify_all();
    }

    /// Drops a destroyed member.
    pub(crate) fn detach(&self, queue: &MessageQueue) {
        let mut state = self.state.lock();
        if let Some(idx) = state.position(queue) {
            state.remove_at(idx);
        }
    }

    fn is_owner_of(self: &Arc<Self>, queue: &MessageQueue) -> bool {
        queue
            .inner
            .set
            .lock()
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(self)))
    }
}

/// Handle to a queue set. Cloning shares the set.
#[derive(Clone)]
pub struct QueueSet {
    shared: Arc<SetShared>,
}

impl QueueSet {
    /// Creates an empty set whose members may hold `total_capacity` items in
    /// total.
    pub fn create(total_capacity: usize) -> Result<Self, QueueError> {
        if total_capacity == 0 {
            return Err(QueueError::InvalidConfig("set capacity must be non-zero"));
        }
        Ok(Self {
            shared: Arc::new(SetShared {
                total_capacity,
                state: Mutex::new(SetState {
                    members: Vec::new(),
                    cursor: 0,
                    used: 0,
                    closed: false,
                }),
                ready: Condvar::new(),
            }),
        })
    }

    pub fn total_capacity(&self) -> usize {
        self.shared.total_capacity
    }

    /// Slots still available for new members.
    pub fn free_capacity(&self) -> usize {
        self.shared.total_capacity - self.shared.state.lock().used
    }

    /// Number of member queues.
    pub fn len(&self) -> usize {
        self.shared.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, queue: &MessageQueue) -> bool {
        self.shared.state.lock().position(queue).is_some()
    }

    /// Adds `queue` to the set.
    ///
    /// Items already waiting in the queue are visible to the next select.
    pub fn add_queue(&self, queue: &MessageQueue) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        if state.closed || queue.is_closed() {
            return Err(QueueError::Closed);
        }

        let mut owner = queue.inner.set.lock();
        if owner.as_ref().and_then(|weak| weak.upgrade()).is_some() {
            return Err(QueueError::AlreadyMember);
        }
        let available = self.shared.total_capacity - state.used;
        if queue.capacity() > available {
            return Err(QueueError::CapacityExceeded {
                requested: queue.capacity(),
                available,
            });
        }
        *owner = Some(Arc::downgrade(&self.shared));
        drop(owner);

        state.used += queue.capacity();
        state.members.push(queue.clone());
        debug!(
            "queue {} joined set ({}/{} slots)",
            queue.id(),
            state.used,
            self.shared.total_capacity
        );
        self.shared.ready.notify_all();
        Ok(())
    }

    /// Removes `queue` from the set, freeing its capacity.
    pub fn remove_queue(&self, queue: &MessageQueue) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        let idx = state.position(queue).ok_or(QueueError::NotMember)?;
        let queue = state.remove_at(idx);
        if self.shared.is_owner_of(&queue) {
            *queue.inner.set.lock() = None;
        }
        debug!("queue {} left set", queue.id());
        Ok(())
    }

    /// Waits up to `timeout` for any member to hold an item and returns that
    /// member without consuming from it.
    ///
    /// Returns `Ok(None)` on timeout. With several consumers on one set the
    /// reported queue may be drained by someone else before the caller
    /// receives; use [`select_receive`](Self::select_receive) there.
    pub fn select(&self, timeout: Duration) -> Result<Option<MessageQueue>, QueueError> {
        self.wait_for(timeout, |state| Ok(state.next_ready()))
    }

    /// Like [`select`](Self::select) but also receives the item into `out`
    /// while still holding the set, so concurrent consumers never race for
    /// the same item.
    ///
    /// `out` must be large enough for the largest `item_size` among members.
    pub fn select_receive(
        &self,
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<MessageQueue>, QueueError> {
        self.wait_for(timeout, |state| state.take_ready(out))
    }

    fn wait_for<F>(&self, timeout: Duration, mut poll: F) -> Result<Option<MessageQueue>, QueueError>
    where
        F: FnMut(&mut SetState) -> Result<Option<MessageQueue>, QueueError>,
    {
        let deadline = deadline_after(timeout);
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed);
            }
            if let Some(queue) = poll(&mut *state)? {
                return Ok(Some(queue));
            }
            if timeout.is_zero() {
                return Ok(None);
            }
            if wait_deadline(&self.shared.ready, &mut state, deadline) {
                if state.closed {
                    return Err(QueueError::Closed);
                }
                return poll(&mut *state);
            }
        }
    }

    /// Closes the set and releases every member, which may then join another
    /// set. Blocked selectors return [`QueueError::Closed`].
    pub fn destroy(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.used = 0;
        state.cursor = 0;
        for queue in state.members.drain(..) {
            if self.shared.is_owner_of(&queue) {
                *queue.inner.set.lock() = None;
            }
        }
        self.shared.ready.notify_all();
        debug!("queue set destroyed");
    }
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("QueueSet")
            .field("total_capacity", &self.shared.total_capacity)
            .field("used", &state.used)
            .field(
                "members",
                &state.members.iter().map(MessageQueue::id).collect::<Vec<_>>(),
            )
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WAIT_FOREVER;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            QueueSet::create(0),
            Err(QueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn membership_is_capacity_bounded() {
        let set = QueueSet::create(10).unwrap();
        let a = MessageQueue::create(4, 6).unwrap();
        let b = MessageQueue::create(4, 5).unwrap();
        set.add_queue(&a).unwrap();
        assert_eq!(
            set.add_queue(&b),
            Err(QueueError::CapacityExceeded {
                requested: 5,
                available: 4
            })
        );
        assert_eq!(set.free_capacity(), 4);

        set.remove_queue(&a).unwrap();
        set.add_queue(&b).unwrap();
        assert_eq!(set.free_capacity(), 5);
        assert!(set.contains(&b));
        assert!(!set.contains(&a));
    }

    #[test]
    fn queue_belongs_to_one_set() {
        let first = QueueSet::create(8).unwrap();
        let second = QueueSet::create(8).unwrap();
        let queue = MessageQueue::create(1, 4).unwrap();
        first.add_queue(&queue).unwrap();
        assert_eq!(first.add_queue(&queue), Err(QueueError::AlreadyMember));
        assert_eq!(second.add_queue(&queue), Err(QueueError::AlreadyMember));

        first.remove_queue(&queue).unwrap();
        assert_eq!(first.remove_queue(&queue), Err(QueueError::NotMember));
        second.add_queue(&queue).unwrap();
    }

    #[test]
    fn select_times_out_when_nothing_arrives() {
        let set = QueueSet::create(4).unwrap();
        set.add_queue(&MessageQueue::create(1, 4).unwrap()).unwrap();

        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        assert_eq!(set.select(timeout), Ok(None));
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(400));
        assert_eq!(set.select(Duration::ZERO), Ok(None));
    }

    #[test]
    fn select_reports_without_consuming() {
        let set = QueueSet::create(8).unwrap();
        let a = MessageQueue::create(1, 4).unwrap();
        let b = MessageQueue::create(1, 4).unwrap();
        set.add_queue(&a).unwrap();
        set.add_queue(&b).unwrap();

        b.try_send(&[5]).unwrap();
        assert_eq!(set.select(Duration::ZERO).unwrap(), Some(b.clone()));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn items_queued_before_joining_are_visible() {
        let set = QueueSet::create(4).unwrap();
        let queue = MessageQueue::create(1, 4).unwrap();
        queue.try_send(&[1]).unwrap();
        set.add_queue(&queue).unwrap();
        assert_eq!(set.select(Duration::ZERO).unwrap(), Some(queue));
    }

    #[test]
    fn select_rotates_between_busy_queues() {
        let set = QueueSet::create(8).unwrap();
        let a = MessageQueue::create(1, 4).unwrap();
        let b = MessageQueue::create(1, 4).unwrap();
        set.add_queue(&a).unwrap();
        set.add_queue(&b).unwrap();
        for _ in 0..3 {
            a.try_send(&[b'a']).unwrap();
            b.try_send(&[b'b']).unwrap();
        }

        let mut order = Vec::new();
        let mut out = [0u8; 1];
        while let Some(queue) = set.select(Duration::ZERO).unwrap() {
            queue.try_receive(&mut out).unwrap();
            order.push(out[0]);
        }
        assert_eq!(order, b"ababab");
    }

    #[test]
    fn blocked_select_wakes_on_send() {
        let set = QueueSet::create(4).unwrap();
        let queue = MessageQueue::create(2, 4).unwrap();
        set.add_queue(&queue).unwrap();

        let selector = {
            let set = set.clone();
            thread::spawn(move || set.select(WAIT_FOREVER))
        };
        thread::sleep(Duration::from_millis(20));
        queue.try_send(b"hi").unwrap();
        assert_eq!(selector.join().unwrap().unwrap(), Some(queue));
    }

    #[test]
    fn select_receive_serves_many_consumers() {
        const ITEMS: u32 = 200;
        let set = QueueSet::create(16).unwrap();
        let queues: Vec<_> = (0..2)
            .map(|_| MessageQueue::create(4, 8).unwrap())
            .collect();
        for queue in &queues {
            set.add_queue(queue).unwrap();
        }

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let set = set.clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    let mut out = [0u8; 4];
                    while let Ok(Some(_)) = set.select_receive(&mut out, Duration::from_millis(200)) {
                        got.push(u32::from_le_bytes(out));
                    }
                    got
                })
            })
            .collect();

        for i in 0..ITEMS {
            queues[(i % 2) as usize]
                .send(&i.to_le_bytes(), Duration::from_secs(2))
                .unwrap();
        }

        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..ITEMS).collect::<Vec<_>>());
    }

    #[test]
    fn destroyed_set_releases_members() {
        let set = QueueSet::create(4).unwrap();
        let queue = MessageQueue::create(1, 4).unwrap();
        set.add_queue(&queue).unwrap();

        let selector = {
            let set = set.clone();
            thread::spawn(move || set.select(WAIT_FOREVER))
        };
        thread::sleep(Duration::from_millis(20));
        set.destroy();
        assert_eq!(selector.join().unwrap(), Err(QueueError::Closed));
        assert!(set.is_empty());

        let other = QueueSet::create(4).unwrap();
        other.add_queue(&queue).unwrap();
    }

    #[test]
    fn destroyed_queue_leaves_its_set() {
        let set = QueueSet::create(4).unwrap();
        let queue = MessageQueue::create(1, 4).unwrap();
        set.add_queue(&queue).unwrap();
        queue.destroy().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.free_capacity(), 4);
        assert_eq!(set.add_queue(&queue), Err(QueueError::Closed));
    }
}
