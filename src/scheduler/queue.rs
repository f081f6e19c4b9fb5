use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

struct Entry<T> {
    priority: Priority,
    seq: Reverse<u64>,
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

impl<T> Ord for Entry<T> {
    // Max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Bounded priority queue, FIFO within a priority level.
pub struct JobQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    capacity: usize,
    next_seq: u64,
}

impl<T> JobQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Enqueue, handing the item back when the queue is full
    pub fn push(&mut self, item: T, priority: Priority) -> Result<u64, T> {
        if self.heap.len() >= self.capacity {
            return Err(item);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq: Reverse(seq),
            item,
        });
        Ok(seq)
    }

    /// Put back an item that could not be delivered, keeping its original place in line.
    /// Ignores capacity since the slot was already counted.
    pub fn requeue(&mut self, item: T, priority: Priority, seq: u64) {
        self.heap.push(Entry {
            priority,
            seq: Reverse(seq),
            item,
        });
    }

    pub fn pop(&mut self) -> Option<(T, Priority, u64)> {
        self.heap.pop().map(|e| (e.item, e.priority, e.seq.0))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.heap.drain().map(|e| e.item).collect()
    }
}
