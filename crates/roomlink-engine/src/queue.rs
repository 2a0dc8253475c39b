//! Bounded two-lane event queue with a single consumer.
//!
//! Urgent items are delivered before any normal item, FIFO within each lane.
//! Producers never block: a push into a full queue fails. A small reserve
//! above the capacity is kept for [`EventQueue::push_reserved`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is closed")]
    Closed,
}

struct Lanes<T> {
    urgent: VecDeque<T>,
    normal: VecDeque<T>,
    closed: bool,
}

impl<T> Lanes<T> {
    fn len(&self) -> usize {
        self.urgent.len() + self.normal.len()
    }
}

pub struct EventQueue<T> {
    lanes: Mutex<Lanes<T>>,
    notify: Notify,
    capacity: usize,
    reserve: usize,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_reserve(capacity, 0)
    }

    /// A queue that admits `reserve` items beyond `capacity`, only through
    /// [`push_reserved`](Self::push_reserved).
    pub fn with_reserve(capacity: usize, reserve: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                urgent: VecDeque::new(),
                normal: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            reserve,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lanes<T>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T, priority: Priority) -> Result<(), QueueError> {
        self.push_within(item, priority, self.capacity)
    }

    /// Push that may also use the reserved slots.
    pub fn push_reserved(&self, item: T, priority: Priority) -> Result<(), QueueError> {
        self.push_within(item, priority, self.capacity + self.reserve)
    }

    fn push_within(&self, item: T, priority: Priority, limit: usize) -> Result<(), QueueError> {
        {
            let mut lanes = self.lock();
            if lanes.closed {
                return Err(QueueError::Closed);
            }
            if lanes.len() >= limit {
                return Err(QueueError::Full);
            }
            match priority {
                Priority::Urgent => lanes.urgent.push_back(item),
                Priority::Normal => lanes.normal.push_back(item),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next item. Returns `None` once the queue is closed; items
    /// still queued at that point are discarded.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut lanes = self.lock();
                if lanes.closed {
                    return None;
                }
                if let Some(item) = lanes.urgent.pop_front().or_else(|| lanes.normal.pop_front()) {
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        {
            let mut lanes = self.lock();
            lanes.closed = true;
            lanes.urgent.clear();
            lanes.normal.clear();
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
