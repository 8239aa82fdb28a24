// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the bridge router.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `bridge_router_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `partition` / `source` / `target`: internal, external, bridge
//! - `reason`: queue_full, circuit_open, invalid_target
//! - `outcome`: success, failure, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// ROUTING
// ═══════════════════════════════════════════════════════════════════════════

/// Record an item accepted into a destination queue
pub fn record_route(source: &str, target: &str) {
    counter!(
        "bridge_router_routed_total",
        "source" => source.to_string(),
        "target" => target.to_string()
    )
    .increment(1);
}

/// Record an item the router refused
pub fn record_rejection(target: &str, reason: &str) {
    counter!(
        "bridge_router_rejected_total",
        "target" => target.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "bridge_router_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set current queue depth for a partition
pub fn set_queue_depth(partition: &str, depth: usize) {
    gauge!(
        "bridge_router_queue_depth",
        "partition" => partition.to_string()
    )
    .set(depth as f64);
}

/// Set backpressure level (0 = Normal, 1 = Warn, 2 = Throttle, 3 = Saturated)
pub fn set_backpressure_level(partition: &str, level: u8) {
    gauge!(
        "bridge_router_backpressure_level",
        "partition" => partition.to_string()
    )
    .set(level as f64);
}

/// Record an item handed to a consumer
pub fn record_delivery(partition: &str) {
    counter!(
        "bridge_router_delivered_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKERS
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker state change (0 = Closed, 1 = HalfOpen, 2 = Open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "bridge_router_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "bridge_router_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNTHESIS & CONSCIOUSNESS
// ═══════════════════════════════════════════════════════════════════════════

/// Record one synthesis cycle and how many patterns it produced
pub fn record_synthesis_cycle(synthesized: usize, duration: Duration) {
    counter!("bridge_router_synthesis_cycles_total").increment(1);
    counter!("bridge_router_synthesized_patterns_total").increment(synthesized as u64);
    histogram!("bridge_router_synthesis_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a comparator error or out-of-range score
pub fn record_comparator_failure() {
    counter!("bridge_router_comparator_failures_total").increment(1);
}

/// Set aggregate emergence score (0.0 - 1.0)
pub fn set_emergence_score(score: f64) {
    gauge!("bridge_router_emergence_score").set(score);
}

/// Record a balanced dialogue window
pub fn record_balanced_dialogue() {
    counter!("bridge_router_balanced_dialogue_events_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PERSISTENCE & LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a failed event store operation
pub fn record_persistence_error(backend: &str) {
    counter!(
        "bridge_router_persistence_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Set whether the event log has fallen back to memory
pub fn set_persistence_degraded(degraded: bool) {
    gauge!("bridge_router_persistence_degraded").set(if degraded { 1.0 } else { 0.0 });
}

/// Set router state (for dashboards). Only the current state's gauge reads
/// 1; the previous one drops back to 0 and the transition is counted.
pub fn set_bridge_state(previous: Option<&str>, state: &str) {
    if let Some(previous) = previous {
        gauge!(
            "bridge_router_state",
            "state" => previous.to_string()
        )
        .set(0.0);
        counter!(
            "bridge_router_state_transitions_total",
            "state" => state.to_string()
        )
        .increment(1);
    }
    gauge!(
        "bridge_router_state",
        "state" => state.to_string()
    )
    .set(1.0);
}

/// Record a retried operation
pub fn record_retry(operation: &str) {
    counter!(
        "bridge_router_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
