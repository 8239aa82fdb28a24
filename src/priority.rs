// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded per-partition priority queue.
//!
//! Items come out highest priority first; equal priorities come out in
//! insertion order. Backed by a binary heap keyed on
//! `(priority, Reverse(insertion_seq))`, so both ends are `O(log n)`.
//!
//! # Example
//!
//! ```
//! use bridge_router::{Item, ItemKind, Partition, Priority, PriorityQueue};
//!
//! let mut queue = PriorityQueue::new(2);
//! let item = |p| Item::new(Partition::Internal, Partition::External, ItemKind::Request, Priority::new(p).unwrap()).unwrap();
//!
//! queue.enqueue(item(1)).unwrap();
//! queue.enqueue(item(8)).unwrap();
//! assert!(queue.enqueue(item(9)).is_err()); // full, never overwrites
//!
//! assert_eq!(queue.dequeue().unwrap().priority().value(), 8);
//! assert_eq!(queue.dequeue().unwrap().priority().value(), 1);
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use thiserror::Error;

use crate::item::Item;

/// Returned when a queue is at capacity. Hands the item back to the caller.
#[derive(Error, Debug)]
#[error("queue full (capacity {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
    pub item: Box<Item>,
}

impl QueueFull {
    /// Take back the rejected item.
    #[must_use]
    pub fn into_item(self) -> Item {
        *self.item
    }
}

struct Entry {
    key: (u8, Reverse<u64>),
    item: Item,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Bounded priority queue. Not synchronized; the router wraps it in a lock.
pub struct PriorityQueue {
    heap: BinaryHeap<Entry>,
    capacity: usize,
    next_seq: u64,
}

impl PriorityQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(4096)),
            capacity,
            next_seq: 0,
        }
    }

    /// Add an item. Fails without blocking when the queue is full.
    pub fn enqueue(&mut self, item: Item) -> Result<(), QueueFull> {
        if self.heap.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
                item: Box::new(item),
            });
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Entry {
            key: (item.priority().value(), Reverse(seq)),
            item,
        });
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<Item> {
        self.heap.pop().map(|e| e.item)
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Item> {
        self.heap.peek().map(|e| &e.item)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill ratio (0.0 - 1.0)
    #[must_use]
    pub fn pressure(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.heap.len() as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemId, ItemKind, Partition, Priority};

    fn item(priority: u8, tag: u64) -> Item {
        Item::new(
            Partition::External,
            Partition::Internal,
            ItemKind::Observation,
            Priority::new(priority).unwrap(),
        )
        .unwrap()
        .with_correlation(ItemId(tag))
    }

    fn tag(item: &Item) -> u64 {
        item.correlation_id().unwrap().0
    }

    #[test]
    fn test_overflow_scenario() {
        let mut q = PriorityQueue::new(3);
        q.enqueue(item(5, 1)).unwrap();
        q.enqueue(item(1, 2)).unwrap();
        q.enqueue(item(5, 3)).unwrap();

        let err = q.enqueue(item(9, 4)).unwrap_err();
        assert_eq!(err.capacity, 3);
        assert_eq!(err.into_item().priority().value(), 9);
        assert_eq!(q.len(), 3);

        let order: Vec<u64> = std::iter::from_fn(|| q.dequeue()).map(|i| tag(&i)).collect();
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn test_fifo_among_equal_priority() {
        let mut q = PriorityQueue::new(10);
        for t in 0..5 {
            q.enqueue(item(4, t)).unwrap();
        }
        let order: Vec<u64> = std::iter::from_fn(|| q.dequeue()).map(|i| tag(&i)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_peek_matches_dequeue() {
        let mut q = PriorityQueue::new(4);
        assert!(q.peek().is_none());
        q.enqueue(item(2, 1)).unwrap();
        q.enqueue(item(7, 2)).unwrap();

        assert_eq!(tag(q.peek().unwrap()), 2);
        assert_eq!(tag(&q.dequeue().unwrap()), 2);
        assert_eq!(tag(q.peek().unwrap()), 1);
    }

    #[test]
    fn test_interleaved_mutations_keep_order() {
        let mut q = PriorityQueue::new(8);
        q.enqueue(item(3, 1)).unwrap();
        q.enqueue(item(6, 2)).unwrap();
        assert_eq!(tag(&q.dequeue().unwrap()), 2);
        q.enqueue(item(3, 3)).unwrap();
        q.enqueue(item(9, 4)).unwrap();

        let order: Vec<u64> = std::iter::from_fn(|| q.dequeue()).map(|i| tag(&i)).collect();
        assert_eq!(order, vec![4, 1, 3]);
    }

    #[test]
    fn test_pressure_and_full() {
        let mut q = PriorityQueue::new(4);
        assert_eq!(q.pressure(), 0.0);
        q.enqueue(item(1, 1)).unwrap();
        q.enqueue(item(1, 2)).unwrap();
        assert!((q.pressure() - 0.5).abs() < f64::EPSILON);
        assert!(!q.is_full());
        q.enqueue(item(1, 3)).unwrap();
        q.enqueue(item(1, 4)).unwrap();
        assert!(q.is_full());
        assert!(q.enqueue(item(1, 5)).is_err());
    }
}
