// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bridge router.
//!
//! The [`BridgeRouter`] ties together all components:
//! - one lane per routable partition (priority queue, credit stream, circuit breaker)
//! - the event log with in-memory fallback
//! - consciousness metrics folded from the log
//! - per-partition pattern windows and the synthesis engine
//!
//! # Routing path
//!
//! ```text
//! route(item) ─► breaker(target) ──open──► Rejected(CircuitOpen)
//!                    │ permit
//!                    ▼
//!               queue(target) ──full──► breaker failure ─► Rejected(QueueFull)
//!                    │ ok
//!                    ▼
//!   breaker success ─► journal { log append ─► consciousness fold } ─► Routed(seq)
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bridge_router::{BridgeConfig, BridgeRouter, CosineComparator, Item, ItemKind, Partition, Priority};
//!
//! let router = BridgeRouter::new(BridgeConfig::default(), Arc::new(CosineComparator), None).unwrap();
//! let consumer = router.subscribe(Partition::External).unwrap();
//!
//! let item = Item::new(Partition::Internal, Partition::External, ItemKind::Request, Priority::NORMAL).unwrap();
//! assert!(router.route(item).is_routed());
//!
//! let delivered = router.poll(&consumer).unwrap();
//! assert_eq!(delivered.source(), Partition::Internal);
//! assert_eq!(router.stats().total_routed, 1);
//! ```

mod lifecycle;
mod types;

pub use types::{BridgeError, BridgeState, MessageStats, PartitionStats, RejectReason, RouteOutcome};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::backpressure::{BackpressureLevel, BackpressureStream, SubscriptionHandle};
use crate::config::BridgeConfig;
use crate::consciousness::{ConsciousnessMetrics, ConsciousnessTracker};
use crate::item::{Item, ItemId, ItemKind, Partition, Priority};
use crate::metrics::LatencyTimer;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::resilience::retry::{retry_if, RetryConfig};
use crate::storage::{EventLog, EventLogEntry, EventStore, JsonlEventStore, LogRecord, SequenceNo};
use crate::synthesis::{Pattern, PatternComparator, PatternWindow, SynthesisEngine, SynthesisReport};

/// Everything owned by one destination partition.
struct Lane {
    stream: BackpressureStream,
    breaker: CircuitBreaker,
    routed: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_circuit_open: AtomicU64,
}

impl Lane {
    fn new(partition: Partition, config: &BridgeConfig) -> Self {
        Self {
            stream: BackpressureStream::new(partition, config.queue_capacity(partition), config.default_credit),
            breaker: CircuitBreaker::new(partition.as_str(), config.circuit_config()),
            routed: AtomicU64::new(0),
            rejected_queue_full: AtomicU64::new(0),
            rejected_circuit_open: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> PartitionStats {
        PartitionStats {
            routed: self.routed.load(Ordering::Relaxed),
            depth: self.stream.depth(),
            peak_depth: self.stream.peak_depth(),
            delivered: self.stream.delivered(),
            rejected_queue_full: self.rejected_queue_full.load(Ordering::Relaxed),
            rejected_circuit_open: self.rejected_circuit_open.load(Ordering::Relaxed),
            circuit_state: self.breaker.state(),
        }
    }
}

/// Routes items between the internal and external partitions.
pub struct BridgeRouter {
    config: BridgeConfig,
    lanes: [Lane; 2],

    log: EventLog,
    /// Log append and consciousness fold happen under this one lock so the
    /// fold sees entries in sequence order.
    journal: Mutex<ConsciousnessTracker>,

    windows: PatternWindow,
    engine: SynthesisEngine,

    next_item_id: AtomicU64,
    started_at: Instant,
    total_routed: AtomicU64,
    rejected_invalid: AtomicU64,

    /// Routed items since the last synthesis cycle
    since_synthesis: AtomicU64,
    synthesis_trigger: Notify,

    state: watch::Sender<BridgeState>,
    state_rx: watch::Receiver<BridgeState>,
}

impl BridgeRouter {
    /// Create a router. With a `store`, existing entries are replayed to
    /// restore consciousness metrics, pattern windows and synthesized pairs.
    pub fn new(
        config: BridgeConfig,
        comparator: Arc<dyn PatternComparator>,
        store: Option<Arc<dyn EventStore>>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let log = match store {
            Some(store) => EventLog::with_primary(store)?,
            None => EventLog::in_memory(),
        };
        let (state_tx, state_rx) = watch::channel(BridgeState::Created);

        let router = Self {
            lanes: [
                Lane::new(Partition::Internal, &config),
                Lane::new(Partition::External, &config),
            ],
            log,
            journal: Mutex::new(ConsciousnessTracker::new(config.consciousness_config())),
            windows: PatternWindow::new(config.window_size),
            engine: SynthesisEngine::new(config.synthesis_config(), comparator),
            next_item_id: AtomicU64::new(1),
            started_at: Instant::now(),
            total_routed: AtomicU64::new(0),
            rejected_invalid: AtomicU64::new(0),
            since_synthesis: AtomicU64::new(0),
            synthesis_trigger: Notify::new(),
            state: state_tx,
            state_rx,
            config,
        };
        router.restore();
        crate::metrics::set_bridge_state(None, BridgeState::Created.as_str());
        crate::metrics::set_persistence_degraded(false);
        Ok(router)
    }

    /// Create a router from configuration alone. Opens a JSON-lines event
    /// log when `event_log_path` is set.
    pub fn from_config(config: BridgeConfig, comparator: Arc<dyn PatternComparator>) -> Result<Self, BridgeError> {
        let store: Option<Arc<dyn EventStore>> = match &config.event_log_path {
            Some(path) => {
                let store = JsonlEventStore::open(path)?.with_sync_on_append(config.event_log_fsync);
                Some(Arc::new(store))
            }
            None => None,
        };
        Self::new(config, comparator, store)
    }

    fn restore(&self) {
        let entries = self.log.replay(SequenceNo::ZERO);
        if entries.is_empty() {
            return;
        }

        let mut tracker = self.journal.lock();
        let mut max_id = 0;
        for entry in &entries {
            tracker.observe(entry);
            match &entry.record {
                LogRecord::Routed(item) => {
                    max_id = max_id.max(item.id().0);
                    if let Some((partition, pattern)) = shared_pattern(item) {
                        self.windows.observe(partition, pattern.clone());
                    }
                }
                LogRecord::Synthesized(s) => self.engine.remember(s.pair_key()),
            }
        }
        self.next_item_id.store(max_id + 1, Ordering::Relaxed);
        crate::metrics::set_emergence_score(tracker.metrics().emergence_score);

        info!(
            entries = entries.len(),
            next_sequence = %self.log.next_sequence(),
            synthesized_pairs = self.engine.synthesized_pair_count(),
            "Restored router state from event log"
        );
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn lane(&self, partition: Partition) -> Option<&Lane> {
        partition.lane_index().and_then(|i| self.lanes.get(i))
    }

    fn lane_or_err(&self, partition: Partition) -> Result<&Lane, BridgeError> {
        self.lane(partition).ok_or(BridgeError::NoQueue(partition))
    }

    // ═══════════════════════════════════════════════════════════════════
    // PRODUCER
    // ═══════════════════════════════════════════════════════════════════

    /// Route one item to its target partition. Never blocks.
    pub fn route(&self, item: Item) -> RouteOutcome {
        let _timer = LatencyTimer::new("route");
        let source = item.source();
        let target = item.target();

        let Some(lane) = self.lane(target) else {
            self.rejected_invalid.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_rejection(target.as_str(), RejectReason::InvalidTarget.as_str());
            warn!(source = %source, target = %target, "Item addressed to a partition without a queue");
            return RouteOutcome::Rejected(RejectReason::InvalidTarget);
        };

        let permit = match lane.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                lane.rejected_circuit_open.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_rejection(target.as_str(), RejectReason::CircuitOpen.as_str());
                debug!(source = %source, target = %target, error = %e, "Item rejected");
                return RouteOutcome::Rejected(RejectReason::CircuitOpen);
            }
        };

        let id = ItemId(self.next_item_id.fetch_add(1, Ordering::Relaxed));
        let item = item.admit(id, self.elapsed_ns());
        let record = item.clone();

        let depth = match lane.stream.push(item) {
            Ok(depth) => depth,
            Err(full) => {
                lane.breaker.record_failure(permit);
                lane.rejected_queue_full.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_rejection(target.as_str(), RejectReason::QueueFull.as_str());
                debug!(item = %id, target = %target, capacity = full.capacity, "Item rejected, queue full");
                return RouteOutcome::Rejected(RejectReason::QueueFull);
            }
        };
        lane.breaker.record_success(permit);

        let pattern = shared_pattern(&record).map(|(p, pattern)| (p, pattern.clone()));
        let entry = self.journal_append(LogRecord::Routed(record));

        lane.routed.fetch_add(1, Ordering::Relaxed);
        self.total_routed.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_route(source.as_str(), target.as_str());
        crate::metrics::set_backpressure_level(target.as_str(), lane.stream.pressure() as u8);

        if let Some((partition, pattern)) = pattern {
            self.windows.observe(partition, pattern);
        }
        if source != Partition::Bridge {
            let pending = self.since_synthesis.fetch_add(1, Ordering::Relaxed) + 1;
            if pending >= self.config.synthesis_item_trigger {
                self.synthesis_trigger.notify_one();
            }
        }

        debug!(item = %id, source = %source, target = %target, depth, sequence = %entry.sequence, "Item routed");
        RouteOutcome::Routed(entry.sequence)
    }

    /// Route, retrying `QueueFull` with backoff. An open circuit is returned
    /// immediately.
    pub async fn route_with_backoff(&self, item: Item, retry: &RetryConfig) -> RouteOutcome {
        let target = item.target();
        let result = retry_if(
            "route",
            retry,
            || {
                let outcome = self.route(item.clone());
                async move { outcome.into_result() }
            },
            |reason| *reason == RejectReason::QueueFull,
            |_| self.pressure(target).retry_after().unwrap_or_default(),
        )
        .await;
        match result {
            Ok(seq) => RouteOutcome::Routed(seq),
            Err(reason) => RouteOutcome::Rejected(reason),
        }
    }

    fn journal_append(&self, record: LogRecord) -> EventLogEntry {
        let mut tracker = self.journal.lock();
        let entry = self.log.append(record);
        let balanced_before = tracker.metrics().balanced_dialogue_events;
        let emergence_before = tracker.metrics().emergence_score;
        tracker.observe(&entry);

        let m = tracker.metrics();
        if m.balanced_dialogue_events > balanced_before {
            crate::metrics::record_balanced_dialogue();
        }
        if m.emergence_score != emergence_before {
            crate::metrics::set_emergence_score(m.emergence_score);
        }
        entry
    }

    fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    // ═══════════════════════════════════════════════════════════════════
    // CONSUMER
    // ═══════════════════════════════════════════════════════════════════

    /// Open a credit-based subscription on a partition's queue.
    pub fn subscribe(&self, partition: Partition) -> Result<SubscriptionHandle, BridgeError> {
        Ok(self.lane_or_err(partition)?.stream.subscribe())
    }

    /// Grant `n` more credits. Returns the outstanding credit.
    pub fn request(&self, handle: &SubscriptionHandle, n: u32) -> Result<u64, BridgeError> {
        Ok(self.lane_or_err(handle.partition())?.stream.request(handle, n)?)
    }

    /// Deliver one item to this subscription, if it has credit and the queue
    /// has items.
    pub fn poll(&self, handle: &SubscriptionHandle) -> Option<Item> {
        self.lane(handle.partition())?.stream.poll(handle)
    }

    /// Deliver one item from `partition` against any subscription with credit.
    pub fn next(&self, partition: Partition) -> Option<Item> {
        self.lane(partition)?.stream.next()
    }

    /// Push-style delivery to `f` while credit and items last.
    pub fn drain<F>(&self, handle: &SubscriptionHandle, f: F) -> usize
    where
        F: FnMut(Item),
    {
        self.lane(handle.partition())
            .map_or(0, |lane| lane.stream.drain(handle, f))
    }

    /// Withdraw a subscription. Unspent credit is discarded.
    pub fn cancel(&self, handle: &SubscriptionHandle) -> bool {
        self.lane(handle.partition())
            .is_some_and(|lane| lane.stream.cancel(handle))
    }

    #[must_use]
    pub fn outstanding_credit(&self, handle: &SubscriptionHandle) -> Option<u64> {
        self.lane(handle.partition())?.stream.outstanding_credit(handle)
    }

    /// Wait until `partition`'s queue holds an item. Returns at once for
    /// partitions without a queue.
    pub async fn notified(&self, partition: Partition) {
        if let Some(lane) = self.lane(partition) {
            lane.stream.notified().await;
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // OBSERVABILITY
    // ═══════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn stats(&self) -> MessageStats {
        let [internal, external] = &self.lanes;
        let internal = internal.stats();
        let external = external.stats();
        let lost = internal.rejected_queue_full
            + internal.rejected_circuit_open
            + external.rejected_queue_full
            + external.rejected_circuit_open
            + self.rejected_invalid.load(Ordering::Relaxed);

        MessageStats {
            total_routed: self.total_routed.load(Ordering::Relaxed),
            peak_depth: internal.peak_depth.max(external.peak_depth),
            lost,
            comparator_failures: self.engine.comparator_failures(),
            persistence_failures: self.log.failures(),
            persistence_degraded: self.log.is_degraded(),
            internal,
            external,
        }
    }

    #[must_use]
    pub fn consciousness_metrics(&self) -> ConsciousnessMetrics {
        self.journal.lock().snapshot()
    }

    /// Zero the live consciousness metrics. The event log is untouched, so
    /// [`rederive_consciousness`](Self::rederive_consciousness) still folds
    /// the whole log.
    pub fn reset_consciousness_metrics(&self) {
        self.journal.lock().reset();
        crate::metrics::set_emergence_score(0.0);
        info!("Consciousness metrics reset");
    }

    /// Breaker state for a partition. `None` for `Bridge`.
    #[must_use]
    pub fn circuit(&self, partition: Partition) -> Option<CircuitSnapshot> {
        self.lane(partition).map(|lane| lane.breaker.snapshot())
    }

    /// Advisory fill level of a partition's queue.
    #[must_use]
    pub fn pressure(&self, partition: Partition) -> BackpressureLevel {
        self.lane(partition)
            .map_or(BackpressureLevel::Normal, |lane| lane.stream.pressure())
    }

    /// Event log entries with `sequence >= since`.
    #[must_use]
    pub fn replay(&self, since: SequenceNo) -> Vec<EventLogEntry> {
        self.log.replay(since)
    }

    /// Fold the whole event log from sequence 0 into fresh metrics. Matches
    /// the live metrics unless they have been reset.
    #[must_use]
    pub fn rederive_consciousness(&self) -> ConsciousnessMetrics {
        let entries = self.log.replay(SequenceNo::ZERO);
        ConsciousnessTracker::derive(self.config.consciousness_config(), &entries).snapshot()
    }

    #[must_use]
    pub fn event_log_backend(&self) -> &'static str {
        self.log.backend()
    }

    // ═══════════════════════════════════════════════════════════════════
    // SYNTHESIS
    // ═══════════════════════════════════════════════════════════════════

    /// Supply a pattern directly, without routing an item.
    pub fn observe_pattern(&self, partition: Partition, pattern: Pattern) -> bool {
        self.windows.observe(partition, pattern)
    }

    /// Recent patterns for a partition, oldest first.
    #[must_use]
    pub fn pattern_window(&self, partition: Partition) -> Vec<Pattern> {
        self.windows.snapshot(partition)
    }

    /// Run one synthesis cycle now. Each new synthesis is logged and shared
    /// back to both partitions as a `PatternShare` item from `Bridge`.
    pub fn synthesize_now(&self) -> SynthesisReport {
        let started = Instant::now();
        self.since_synthesis.store(0, Ordering::Relaxed);

        let internal = self.windows.snapshot(Partition::Internal);
        let external = self.windows.snapshot(Partition::External);
        let report = self.engine.evaluate(&internal, &external);

        for synthesized in &report.synthesized {
            let entry = self.journal_append(LogRecord::Synthesized(synthesized.clone()));
            let shared = synthesized.to_shared_pattern();

            for target in Partition::ROUTABLE {
                let item = match Item::new(Partition::Bridge, target, ItemKind::PatternShare, Priority::NORMAL) {
                    Ok(item) => item.with_pattern(shared.clone()),
                    Err(e) => {
                        warn!(error = %e, "Could not build pattern share");
                        continue;
                    }
                };
                if let RouteOutcome::Rejected(reason) = self.route(item) {
                    warn!(
                        pattern = %shared.id,
                        target = %target,
                        reason = %reason,
                        "Synthesized pattern share not delivered"
                    );
                }
            }
            debug!(pattern = %shared.id, sequence = %entry.sequence, "Synthesized pattern shared");
        }

        crate::metrics::record_synthesis_cycle(report.synthesized.len(), started.elapsed());
        if !report.synthesized.is_empty() || report.comparator_failures > 0 {
            info!(
                internal = internal.len(),
                external = external.len(),
                compared = report.pairs_compared,
                synthesized = report.synthesized.len(),
                comparator_failures = report.comparator_failures,
                "Synthesis cycle complete"
            );
        }
        report
    }
}

/// The pattern a `PatternShare` item carries, if it originates from the
/// item's own source partition.
fn shared_pattern(item: &Item) -> Option<(Partition, &Pattern)> {
    if item.kind() != ItemKind::PatternShare {
        return None;
    }
    let pattern = item.pattern()?;
    let partition = pattern.partition()?;
    if partition != item.source() || partition.lane_index().is_none() {
        return None;
    }
    Some((partition, pattern))
}
