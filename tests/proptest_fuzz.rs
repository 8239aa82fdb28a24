// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for the bridge router.
//!
//! Covers the queue ordering and capacity guarantees, credit accounting,
//! the consciousness fold, and that malformed input never panics the
//! deserializers.
//!
//! # Running
//! ```bash
//! cargo test --test proptest_fuzz
//! PROPTEST_CASES=10000 cargo test --test proptest_fuzz
//! ```

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use bridge_router::{
    BridgeConfig, BridgeRouter, CosineComparator, EventLogEntry, Item, ItemId, ItemKind, Partition, Priority,
    PriorityQueue, SequenceNo,
};

// =============================================================================
// Strategies
// =============================================================================

fn priority_strategy() -> impl Strategy<Value = Priority> {
    (0u8..=Priority::MAX).prop_map(|p| Priority::new(p).unwrap())
}

fn direction_strategy() -> impl Strategy<Value = (Partition, Partition)> {
    prop_oneof![
        Just((Partition::Internal, Partition::External)),
        Just((Partition::External, Partition::Internal)),
    ]
}

/// Arbitrary JSON, nested a few levels deep
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        any::<u8>().prop_map(|n| json!(n)),
        ".*".prop_map(Value::String),
        prop_oneof![Just("internal"), Just("external"), Just("bridge"), Just("request")]
            .prop_map(|s| Value::String(s.to_string())),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,16}", inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Items tagged with their enqueue order in the correlation id
fn tagged_items(max: usize) -> impl Strategy<Value = Vec<Item>> {
    prop::collection::vec(priority_strategy(), 0..max).prop_map(|priorities| {
        priorities
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                Item::new(Partition::Internal, Partition::External, ItemKind::Observation, p)
                    .unwrap()
                    .with_correlation(ItemId(i as u64))
            })
            .collect()
    })
}

// =============================================================================
// Priority Queue Invariant Tests
// =============================================================================

proptest! {
    /// Dequeue order is by priority, then by enqueue order
    #[test]
    fn prop_queue_priority_then_fifo(items in tagged_items(200)) {
        let mut queue = PriorityQueue::new(items.len().max(1));
        for item in items.iter().cloned() {
            prop_assert!(queue.enqueue(item).is_ok());
        }

        let mut previous: Option<(Priority, u64)> = None;
        while let Some(item) = queue.dequeue() {
            let order = item.correlation_id().unwrap().0;
            if let Some((prev_priority, prev_order)) = previous {
                prop_assert!(item.priority() <= prev_priority, "priority increased");
                if item.priority() == prev_priority {
                    prop_assert!(order > prev_order, "FIFO violated within priority");
                }
            }
            previous = Some((item.priority(), order));
        }
        prop_assert!(queue.is_empty());
    }

    /// A queue never holds more than its capacity and rejects without evicting
    #[test]
    fn prop_queue_capacity_never_exceeded(
        capacity in 1usize..32,
        items in tagged_items(100),
    ) {
        let mut queue = PriorityQueue::new(capacity);
        let mut accepted = Vec::new();
        for item in items {
            let tag = item.correlation_id();
            match queue.enqueue(item) {
                Ok(()) => accepted.push(tag),
                Err(full) => {
                    prop_assert_eq!(full.capacity, capacity);
                    prop_assert_eq!(full.into_item().correlation_id(), tag);
                }
            }
            prop_assert!(queue.len() <= capacity);
        }

        let mut drained = Vec::new();
        while let Some(item) = queue.dequeue() {
            drained.push(item.correlation_id());
        }
        drained.sort();
        accepted.sort();
        prop_assert_eq!(drained, accepted);
    }
}

// =============================================================================
// Router Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every routed item is either still queued or delivered exactly once
    #[test]
    fn prop_router_conserves_items(
        capacity in 1usize..16,
        credit in 1u32..8,
        ops in prop::collection::vec((direction_strategy(), priority_strategy(), any::<bool>()), 0..120),
    ) {
        let router = BridgeRouter::new(
            BridgeConfig {
                internal_queue_capacity: capacity,
                external_queue_capacity: capacity,
                // Keep the breaker out of the way
                failure_threshold: 1_000,
                default_credit: credit,
                ..Default::default()
            },
            Arc::new(CosineComparator),
            None,
        ).unwrap();
        let internal = router.subscribe(Partition::Internal).unwrap();
        let external = router.subscribe(Partition::External).unwrap();

        let mut delivered = 0u64;
        let mut granted = 2 * u64::from(credit);
        for ((source, target), priority, consume) in ops {
            let item = Item::new(source, target, ItemKind::Observation, priority).unwrap();
            let _ = router.route(item);
            if consume {
                let handle = if target == Partition::Internal { &internal } else { &external };
                if router.poll(handle).is_some() {
                    delivered += 1;
                } else if router.outstanding_credit(handle) == Some(0) {
                    router.request(handle, 1).unwrap();
                    granted += 1;
                }
            }
        }

        let stats = router.stats();
        let queued = (stats.internal.depth + stats.external.depth) as u64;
        prop_assert_eq!(stats.total_routed, queued + delivered);
        prop_assert_eq!(stats.internal.delivered + stats.external.delivered, delivered);
        prop_assert!(delivered <= granted);
        prop_assert!(stats.internal.depth <= capacity && stats.external.depth <= capacity);

        let spent = granted
            - router.outstanding_credit(&internal).unwrap()
            - router.outstanding_credit(&external).unwrap();
        prop_assert_eq!(spent, delivered, "credit spent must equal items delivered");
    }

    /// Sequence numbers are dense and the fold over the log matches live metrics
    #[test]
    fn prop_log_dense_and_fold_consistent(
        routes in prop::collection::vec((direction_strategy(), priority_strategy()), 1..150),
        window in 1u64..20,
    ) {
        let router = BridgeRouter::new(
            BridgeConfig { dialogue_window_size: window, ..Default::default() },
            Arc::new(CosineComparator),
            None,
        ).unwrap();
        for ((source, target), priority) in &routes {
            let item = Item::new(*source, *target, ItemKind::Request, *priority).unwrap();
            prop_assert!(router.route(item).is_routed());
        }

        let entries = router.replay(SequenceNo::ZERO);
        prop_assert_eq!(entries.len(), routes.len());
        for (i, entry) in entries.iter().enumerate() {
            prop_assert_eq!(entry.sequence, SequenceNo(i as u64));
        }

        let live = router.consciousness_metrics();
        prop_assert_eq!(live.total_routed, routes.len() as u64);
        prop_assert!(live.balanced_dialogue_events <= routes.len() as u64 / window);
        prop_assert_eq!(live, router.rederive_consciousness());
    }
}

// =============================================================================
// Deserialization Fuzz Tests
// =============================================================================

proptest! {
    /// Random bytes never panic the item deserializer
    #[test]
    fn fuzz_item_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = serde_json::from_slice::<Item>(&bytes);
    }

    /// Random bytes never panic the log entry deserializer
    #[test]
    fn fuzz_log_entry_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = serde_json::from_slice::<EventLogEntry>(&bytes);
    }

    /// Arbitrary JSON either parses or fails cleanly
    #[test]
    fn fuzz_arbitrary_json_shapes(value in arbitrary_json_strategy()) {
        let _ = serde_json::from_value::<Item>(value.clone());
        let _ = serde_json::from_value::<EventLogEntry>(value.clone());
        if let Ok(config) = serde_json::from_value::<BridgeConfig>(value) {
            // Whatever parses must still be checked before use
            let _ = config.validate();
        }
    }

    /// Out-of-range priorities are refused at the deserializer
    #[test]
    fn fuzz_item_priority_range(priority in any::<u8>()) {
        let value = json!({
            "id": 0,
            "source": "internal",
            "target": "external",
            "priority": priority,
            "enqueued_at": 0,
            "kind": "request",
        });
        let parsed = serde_json::from_value::<Item>(value);
        prop_assert_eq!(parsed.is_ok(), priority <= Priority::MAX);
    }

    /// Corrupted serialized entries fail gracefully
    #[test]
    fn fuzz_corrupted_log_entry(
        priority in priority_strategy(),
        corruption in prop::collection::vec(any::<u8>(), 1..50),
        position in 0usize..10000,
    ) {
        let router = BridgeRouter::new(BridgeConfig::default(), Arc::new(CosineComparator), None).unwrap();
        let item = Item::new(Partition::Internal, Partition::External, ItemKind::Result, priority).unwrap();
        prop_assert!(router.route(item).is_routed());
        let entry = router.replay(SequenceNo::ZERO).remove(0);

        let serialized = serde_json::to_vec(&entry).unwrap();
        let mut corrupted = serialized.clone();
        let pos = position % corrupted.len();
        for (i, b) in corruption.iter().enumerate() {
            let idx = (pos + i) % corrupted.len();
            corrupted[idx] ^= b;
        }

        // Should never panic
        let _ = serde_json::from_slice::<EventLogEntry>(&corrupted);
    }
}
