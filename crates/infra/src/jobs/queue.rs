//! Bounded min-priority queue with async backpressure.
//!
//! - `get` hands out the entry with the lowest priority value; equal
//!   priorities come out in insertion order.
//! - `put` suspends while the queue is full. Blocked producers are released
//!   in the order they started waiting (tokio's semaphore is fair).
//! - Dropping a pending `put` or `get` leaves the queue untouched.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;

use dbsbm_core::TaskQueueError;

struct Entry<T> {
    priority: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed: `BinaryHeap` is a max-heap and we pop the smallest (priority, seq).
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Heap<T> {
    entries: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> Heap<T> {
    fn push(&mut self, priority: i64, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            priority,
            seq,
            item,
        });
    }
}

/// Bounded priority queue shared between producers and workers.
pub struct PriorityQueue<T> {
    heap: Mutex<Heap<T>>,
    free_slots: Semaphore,
    ready: Semaphore,
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, TaskQueueError> {
        if capacity == 0 {
            return Err(TaskQueueError::invalid_queue(
                "queue capacity must be greater than zero",
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(TaskQueueError::invalid_queue(format!(
                "queue capacity must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            heap: Mutex::new(Heap {
                entries: BinaryHeap::with_capacity(capacity.min(1024)),
                next_seq: 0,
            }),
            free_slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            capacity,
        })
    }

    /// Enqueue, waiting for a free slot if the queue is full.
    pub async fn put(&self, priority: i64, item: T) {
        self.free_slots
            .acquire()
            .await
            .expect("queue semaphores are never closed")
            .forget();
        self.push(priority, item);
    }

    /// Enqueue without waiting. Hands the item back when the queue is full.
    pub fn try_put(&self, priority: i64, item: T) -> Result<(), T> {
        match self.free_slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.push(priority, item);
                Ok(())
            }
            Err(_) => Err(item),
        }
    }

    /// Dequeue the most urgent entry, waiting until one is available.
    pub async fn get(&self) -> T {
        self.ready
            .acquire()
            .await
            .expect("queue semaphores are never closed")
            .forget();

        let entry = self
            .lock()
            .entries
            .pop()
            .expect("a ready permit is only issued for a queued entry");
        self.free_slots.add_permits(1);
        entry.item
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push(&self, priority: i64, item: T) {
        self.lock().push(priority, item);
        self.ready.add_permits(1);
    }

    fn lock(&self) -> MutexGuard<'_, Heap<T>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
