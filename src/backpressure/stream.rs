// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Credit-based delivery from one partition queue.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use super::BackpressureLevel;
use crate::item::{Item, Partition};
use crate::priority::{PriorityQueue, QueueFull};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("unknown or cancelled subscription {0}")]
    UnknownSubscription(SubscriptionId),
    #[error("subscription {id} belongs to '{actual}', not '{expected}'")]
    WrongPartition {
        id: SubscriptionId,
        expected: Partition,
        actual: Partition,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Consumer's handle on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    partition: Partition,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }
}

struct Subscription {
    credit: AtomicU64,
    delivered: AtomicU64,
}

impl Subscription {
    /// Take one unit of credit. Never lets two callers spend the same unit.
    fn take_credit(&self) -> bool {
        self.credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    fn refund_credit(&self) {
        self.credit.fetch_add(1, Ordering::AcqRel);
    }
}

/// One partition's queue plus its subscriptions.
pub struct BackpressureStream {
    partition: Partition,
    queue: Mutex<PriorityQueue>,
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    next_subscription: AtomicU64,
    /// Round-robin start point for [`next`](Self::next)
    cursor: AtomicUsize,
    default_credit: u32,
    peak_depth: AtomicUsize,
    delivered: AtomicU64,
    item_ready: Notify,
}

impl BackpressureStream {
    pub fn new(partition: Partition, capacity: usize, default_credit: u32) -> Self {
        Self {
            partition,
            queue: Mutex::new(PriorityQueue::new(capacity)),
            subscriptions: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            cursor: AtomicUsize::new(0),
            default_credit,
            peak_depth: AtomicUsize::new(0),
            delivered: AtomicU64::new(0),
            item_ready: Notify::new(),
        }
    }

    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Producer side. Fails with `QueueFull` regardless of consumer credit.
    /// Returns the depth after the push.
    pub fn push(&self, item: Item) -> Result<usize, QueueFull> {
        let depth = {
            let mut queue = self.queue.lock();
            queue.enqueue(item)?;
            queue.len()
        };
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        crate::metrics::set_queue_depth(self.partition.as_str(), depth);
        self.item_ready.notify_waiters();
        Ok(depth)
    }

    /// Open a subscription with the default credit grant.
    pub fn subscribe(&self) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.insert(
            id,
            Arc::new(Subscription {
                credit: AtomicU64::new(u64::from(self.default_credit)),
                delivered: AtomicU64::new(0),
            }),
        );
        debug!(partition = %self.partition, subscription = %id, credit = self.default_credit, "Subscription opened");
        SubscriptionHandle {
            id,
            partition: self.partition,
        }
    }

    /// Grant `n` more credits. Returns the outstanding credit afterwards.
    pub fn request(&self, handle: &SubscriptionHandle, n: u32) -> Result<u64, StreamError> {
        let sub = self.lookup(handle)?;
        let n = u64::from(n);
        let before = sub
            .credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_add(n)))
            .unwrap_or_else(|c| c);
        Ok(before.saturating_add(n))
    }

    /// Withdraw a subscription. Unspent credit is discarded; delivered items
    /// are not redelivered.
    pub fn cancel(&self, handle: &SubscriptionHandle) -> bool {
        match self.subscriptions.remove(&handle.id) {
            Some((_, sub)) => {
                debug!(
                    partition = %self.partition,
                    subscription = %handle.id,
                    discarded_credit = sub.credit.load(Ordering::Acquire),
                    delivered = sub.delivered.load(Ordering::Relaxed),
                    "Subscription cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Outstanding credit, or `None` if cancelled.
    #[must_use]
    pub fn outstanding_credit(&self, handle: &SubscriptionHandle) -> Option<u64> {
        self.subscriptions
            .get(&handle.id)
            .map(|s| s.credit.load(Ordering::Acquire))
    }

    /// Deliver one item to this subscription if it has credit.
    pub fn poll(&self, handle: &SubscriptionHandle) -> Option<Item> {
        let sub = self.lookup(handle).ok()?;
        self.deliver(&sub)
    }

    /// Deliver one item to any subscription with credit, rotating between
    /// subscriptions so one consumer does not starve the rest.
    pub fn next(&self) -> Option<Item> {
        let mut subs: Vec<(SubscriptionId, Arc<Subscription>)> = self
            .subscriptions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        if subs.is_empty() {
            return None;
        }
        subs.sort_by_key(|(id, _)| *id);

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % subs.len();
        subs.rotate_left(start);
        let sub = subs.into_iter().map(|(_, s)| s).find(|s| s.take_credit())?;
        self.deliver_with_credit(&sub)
    }

    /// Push-style delivery: hand items to `f` while credit and items last.
    pub fn drain<F>(&self, handle: &SubscriptionHandle, mut f: F) -> usize
    where
        F: FnMut(Item),
    {
        let Ok(sub) = self.lookup(handle) else {
            return 0;
        };
        let mut count = 0;
        while let Some(item) = self.deliver(&sub) {
            f(item);
            count += 1;
        }
        count
    }

    /// Wait until the queue holds at least one item.
    pub async fn notified(&self) {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.queue.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.lock().capacity()
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Total items handed to consumers
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pressure(&self) -> BackpressureLevel {
        BackpressureLevel::from_pressure(self.queue.lock().pressure())
    }

    fn lookup(&self, handle: &SubscriptionHandle) -> Result<Arc<Subscription>, StreamError> {
        if handle.partition != self.partition {
            return Err(StreamError::WrongPartition {
                id: handle.id,
                expected: self.partition,
                actual: handle.partition,
            });
        }
        self.subscriptions
            .get(&handle.id)
            .map(|s| s.value().clone())
            .ok_or(StreamError::UnknownSubscription(handle.id))
    }

    fn deliver(&self, sub: &Subscription) -> Option<Item> {
        if !sub.take_credit() {
            return None;
        }
        self.deliver_with_credit(sub)
    }

    /// Credit already taken; refund it if there is nothing to hand out.
    fn deliver_with_credit(&self, sub: &Subscription) -> Option<Item> {
        let (item, depth) = {
            let mut queue = self.queue.lock();
            let item = queue.dequeue();
            (item, queue.len())
        };
        match item {
            Some(item) => {
                sub.delivered.fetch_add(1, Ordering::Relaxed);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_delivery(self.partition.as_str());
                crate::metrics::set_queue_depth(self.partition.as_str(), depth);
                Some(item)
            }
            None => {
                sub.refund_credit();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemKind, Priority};
    use std::sync::atomic::AtomicUsize;

    fn item(priority: u8) -> Item {
        Item::new(
            Partition::External,
            Partition::Internal,
            ItemKind::Observation,
            Priority::new(priority).unwrap(),
        )
        .unwrap()
    }

    fn stream(capacity: usize, credit: u32) -> BackpressureStream {
        BackpressureStream::new(Partition::Internal, capacity, credit)
    }

    #[test]
    fn test_no_delivery_without_credit() {
        let s = stream(10, 0);
        s.push(item(1)).unwrap();
        let h = s.subscribe();

        assert!(s.poll(&h).is_none());
        assert_eq!(s.depth(), 1);

        s.request(&h, 1).unwrap();
        assert!(s.poll(&h).is_some());
        assert_eq!(s.outstanding_credit(&h), Some(0));
    }

    #[test]
    fn test_consumer_receives_at_most_requested() {
        let s = stream(100, 0);
        for _ in 0..50 {
            s.push(item(3)).unwrap();
        }
        let h = s.subscribe();
        assert_eq!(s.request(&h, 7).unwrap(), 7);

        let received = std::iter::from_fn(|| s.poll(&h)).count();
        assert_eq!(received, 7);
        assert_eq!(s.depth(), 43);
    }

    #[test]
    fn test_empty_queue_refunds_credit() {
        let s = stream(10, 3);
        let h = s.subscribe();

        assert!(s.poll(&h).is_none());
        assert_eq!(s.outstanding_credit(&h), Some(3));
        assert!(s.next().is_none());
        assert_eq!(s.outstanding_credit(&h), Some(3));
    }

    #[test]
    fn test_capacity_is_independent_of_credit() {
        let s = stream(2, 1_000);
        let _h = s.subscribe();
        s.push(item(1)).unwrap();
        s.push(item(1)).unwrap();

        let err = s.push(item(9)).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(s.peak_depth(), 2);
    }

    #[test]
    fn test_next_requires_a_subscription() {
        let s = stream(10, 5);
        s.push(item(1)).unwrap();
        assert!(s.next().is_none());

        let _h = s.subscribe();
        assert!(s.next().is_some());
    }

    #[test]
    fn test_next_rotates_between_subscriptions() {
        let s = stream(10, 1);
        let a = s.subscribe();
        let b = s.subscribe();
        s.push(item(1)).unwrap();
        s.push(item(1)).unwrap();

        assert!(s.next().is_some());
        assert!(s.next().is_some());
        // each had one credit, both spent
        assert_eq!(s.outstanding_credit(&a), Some(0));
        assert_eq!(s.outstanding_credit(&b), Some(0));
    }

    #[test]
    fn test_cancel_discards_credit() {
        let s = stream(10, 5);
        let h = s.subscribe();
        s.push(item(1)).unwrap();

        assert!(s.cancel(&h));
        assert!(!s.cancel(&h));
        assert!(s.poll(&h).is_none());
        assert_eq!(s.outstanding_credit(&h), None);
        assert_eq!(s.request(&h, 1), Err(StreamError::UnknownSubscription(h.id())));
        assert_eq!(s.depth(), 1);
    }

    #[test]
    fn test_wrong_partition_handle_rejected() {
        let internal = stream(10, 1);
        let external = BackpressureStream::new(Partition::External, 10, 1);
        let h = external.subscribe();

        assert!(matches!(
            internal.request(&h, 1),
            Err(StreamError::WrongPartition { .. })
        ));
    }

    #[test]
    fn test_drain_delivers_in_priority_order() {
        let s = stream(10, 2);
        let h = s.subscribe();
        s.push(item(1)).unwrap();
        s.push(item(8)).unwrap();
        s.push(item(4)).unwrap();

        let mut seen = Vec::new();
        let n = s.drain(&h, |i| seen.push(i.priority().value()));
        assert_eq!(n, 2);
        assert_eq!(seen, vec![8, 4]);
        assert_eq!(s.delivered(), 2);
    }

    #[test]
    fn test_concurrent_pollers_never_overspend_credit() {
        let s = Arc::new(stream(1_000, 0));
        for _ in 0..500 {
            s.push(item(2)).unwrap();
        }
        let h = s.subscribe();
        s.request(&h, 100).unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                let h = h.clone();
                let received = received.clone();
                std::thread::spawn(move || {
                    while s.poll(&h).is_some() {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(received.load(Ordering::Relaxed), 100);
        assert_eq!(s.depth(), 400);
    }

    #[tokio::test]
    async fn test_ready_wakes_on_push() {
        let s = Arc::new(stream(10, 1));
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.notified().await })
        };
        tokio::task::yield_now().await;
        s.push(item(1)).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
