//! Blocking FIFO of runnable workers with duplicate suppression.
//!
//! A worker is present at most once no matter how often it is offered, so a
//! VM that is re-submitted rapidly cannot claim more than one scheduling
//! round ahead of its competitors. Identity is pointer identity of the shared
//! handle.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// An element handed out by [`BoundedDistinctQueue::take`].
#[derive(Debug)]
pub enum Entry<T> {
    /// A worker eligible for a slice.
    Item(Arc<T>),
    /// Tells the taking thread to exit.
    Terminate,
}

impl<T> Entry<T> {
    fn is(&self, item: &Arc<T>) -> bool {
        matches!(self, Self::Item(held) if Arc::ptr_eq(held, item))
    }
}

/// Blocking, order-preserving queue of shared handles with duplicate
/// suppression and a capacity bound.
#[derive(Debug)]
pub struct BoundedDistinctQueue<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
    available: Condvar,
    capacity: usize,
}

impl<T> BoundedDistinctQueue<T> {
    /// Create a queue holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Append `item` unless the same handle is already queued.
    ///
    /// Returns `true` if the item was inserted, `false` if it was already
    /// present or the queue is at capacity.
    pub fn offer_distinct(&self, item: &Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| entry.is(item)) || entries.len() >= self.capacity {
            return false;
        }
        entries.push_back(Entry::Item(Arc::clone(item)));
        drop(entries);
        self.available.notify_one();
        true
    }

    /// Append a termination sentinel. Sentinels ignore the capacity bound and
    /// are never deduplicated.
    pub fn offer_terminate(&self) {
        self.entries.lock().push_back(Entry::Terminate);
        self.available.notify_one();
    }

    /// Remove and return the head, blocking until one is available.
    pub fn take(&self) -> Entry<T> {
        let mut entries = self.entries.lock();
        loop {
            if let Some(entry) = entries.pop_front() {
                return entry;
            }
            self.available.wait(&mut entries);
        }
    }

    /// Remove `item` if queued. Returns whether it was present.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !entry.is(item));
        before != entries.len()
    }

    /// Whether `item` is currently queued.
    #[must_use]
    pub fn contains(&self, item: &Arc<T>) -> bool {
        self.entries.lock().iter().any(|entry| entry.is(item))
    }

    /// Drop every entry, sentinels included.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
