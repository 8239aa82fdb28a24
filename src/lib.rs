// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Bridge Router
//!
//! Cross-partition message routing and pattern synthesis between two
//! logically separate processing partitions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Producers                            │
//! │  • route(item): sync, never blocks                         │
//! │  • route_with_backoff(item): retries QueueFull             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Lane per target (Internal / External)          │
//! │  • Circuit breaker: Closed → Open → HalfOpen trials        │
//! │  • Bounded priority queue (heap, FIFO within priority)     │
//! │  • Credit-based subscriptions for consumers                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                       (journal lock)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Event Log                            │
//! │  • Dense sequence numbers, JSON-lines or in-memory store   │
//! │  • In-memory fallback when the store fails                 │
//! │  • Consciousness metrics folded from the same entries      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Synthesis (background)                    │
//! │  • Recent pattern window per partition                     │
//! │  • Injected comparator scores internal × external pairs    │
//! │  • Matches logged and shared back to both partitions       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bridge_router::{BridgeConfig, BridgeRouter, CosineComparator, Item, ItemKind, Partition, Priority};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BridgeConfig {
//!         event_log_path: Some("./bridge_events.jsonl".into()),
//!         ..Default::default()
//!     };
//!     let router = Arc::new(
//!         BridgeRouter::from_config(config, Arc::new(CosineComparator)).expect("Failed to create router"),
//!     );
//!     let synthesis = router.start().expect("Failed to start");
//!
//!     let consumer = router.subscribe(Partition::External).unwrap();
//!     let item = Item::new(Partition::Internal, Partition::External, ItemKind::Request, Priority::NORMAL).unwrap();
//!     assert!(router.route(item).is_routed());
//!
//!     while let Some(item) = router.poll(&consumer) {
//!         println!("Delivered {} from {}", item.id(), item.source());
//!     }
//!
//!     router.shutdown().await;
//!     synthesis.await.unwrap();
//! }
//! ```
//!
//! ## Features
//!
//! - **Priority Queues**: `O(log n)` bounded heap, FIFO within a priority
//! - **Circuit Breakers**: Per-target fault isolation with half-open trials
//! - **Backpressure**: Consumer credit limits delivery, capacity limits admission
//! - **Event Log**: Append-only, replayable, degrades to memory on failure
//! - **Synthesis**: Background cross-partition pattern matching
//! - **Retry Logic**: Backoff for producers hitting full queues
//!
//! ## Configuration
//!
//! See [`BridgeConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`router`]: The main [`BridgeRouter`] orchestrating all components
//! - [`item`]: Routed items, partitions, priorities
//! - [`priority`]: Bounded priority queue
//! - [`backpressure`]: Credit-based streams and pressure levels
//! - [`resilience`]: Circuit breakers and retry logic
//! - [`storage`]: Event log and its stores
//! - [`synthesis`]: Pattern windows, comparators, the synthesis engine
//! - [`consciousness`]: Aggregate metrics folded from the event log
//! - [`metrics`]: `metrics` crate instrumentation

pub mod backpressure;
pub mod config;
pub mod consciousness;
pub mod item;
pub mod metrics;
pub mod priority;
pub mod resilience;
pub mod router;
pub mod storage;
pub mod synthesis;

// Note: We don't install a tracing subscriber; that is the embedding process's job

pub use backpressure::{BackpressureLevel, BackpressureStream, StreamError, SubscriptionHandle, SubscriptionId};
pub use config::{BridgeConfig, ConfigError};
pub use consciousness::{ConsciousnessMetrics, PartitionCounts};
pub use item::{Item, ItemError, ItemId, ItemKind, Partition, PayloadRef, Priority};
pub use metrics::LatencyTimer;
pub use priority::{PriorityQueue, QueueFull};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitOpen, CircuitSnapshot, CircuitState};
pub use resilience::retry::RetryConfig;
pub use router::{BridgeError, BridgeRouter, BridgeState, MessageStats, PartitionStats, RejectReason, RouteOutcome};
pub use storage::{EventLog, EventLogEntry, EventStore, InMemoryEventStore, JsonlEventStore, LogRecord, PersistenceError, SequenceNo};
pub use synthesis::{
    ComparatorError, CosineComparator, Pattern, PatternComparator, PatternId, PatternOrigin, SynthesizedPattern,
    SynthesisReport,
};
