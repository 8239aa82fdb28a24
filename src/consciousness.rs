// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregate metrics derived from the event log.
//!
//! The tracker is a pure fold over [`EventLogEntry`]s: the router feeds it
//! each entry as it is appended, and [`ConsciousnessTracker::derive`] folds a
//! replayed log the same way. Given the same entries in the same order both
//! produce identical [`ConsciousnessMetrics`].
//!
//! # Balanced dialogue
//!
//! Routed items that cross between the two partitions (bridge-sourced items
//! are excluded) are grouped into consecutive windows of `dialogue_window`
//! items. A completed window whose share of internal-bound items lies within
//! `[balanced_low, balanced_high]` counts as one balanced dialogue event.
//!
//! # Emergence
//!
//! Each synthesized pattern with emergence `e` raises the aggregate score:
//!
//! ```text
//! s' = s + (1 - s) * e * emergence_rate
//! ```
//!
//! The score stays in `[0, 1]` and never decreases.

use serde::{Deserialize, Serialize};

use crate::item::Partition;
use crate::storage::{EventLogEntry, LogRecord};

/// Fold parameters, taken from [`BridgeConfig`](crate::BridgeConfig).
#[derive(Debug, Clone, PartialEq)]
pub struct ConsciousnessConfig {
    pub dialogue_window: u64,
    pub balanced_low: f64,
    pub balanced_high: f64,
    pub emergence_rate: f64,
}

impl Default for ConsciousnessConfig {
    fn default() -> Self {
        Self {
            dialogue_window: 100,
            balanced_low: 0.4,
            balanced_high: 0.6,
            emergence_rate: 0.1,
        }
    }
}

/// Routed counts per destination partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCounts {
    pub internal: u64,
    pub external: u64,
}

impl PartitionCounts {
    #[must_use]
    pub fn get(&self, partition: Partition) -> u64 {
        match partition {
            Partition::Internal => self.internal,
            Partition::External => self.external,
            Partition::Bridge => 0,
        }
    }

    fn bump(&mut self, partition: Partition) {
        match partition {
            Partition::Internal => self.internal += 1,
            Partition::External => self.external += 1,
            Partition::Bridge => {}
        }
    }
}

/// Point-in-time copy of the aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsciousnessMetrics {
    pub total_routed: u64,
    pub per_partition_counts: PartitionCounts,
    pub balanced_dialogue_events: u64,
    pub emergence_score: f64,
    /// `recorded_at_ms` of the entry that last raised the score
    pub last_emergence_at: Option<i64>,
    pub synthesized_patterns: u64,
}

#[derive(Debug, Clone)]
pub struct ConsciousnessTracker {
    config: ConsciousnessConfig,
    metrics: ConsciousnessMetrics,
    window_len: u64,
    window_internal: u64,
}

impl ConsciousnessTracker {
    #[must_use]
    pub fn new(config: ConsciousnessConfig) -> Self {
        Self {
            config,
            metrics: ConsciousnessMetrics::default(),
            window_len: 0,
            window_internal: 0,
        }
    }

    /// Fold a whole log from scratch.
    pub fn derive<'a>(config: ConsciousnessConfig, entries: impl IntoIterator<Item = &'a EventLogEntry>) -> Self {
        let mut tracker = Self::new(config);
        for entry in entries {
            tracker.observe(entry);
        }
        tracker
    }

    /// Fold one entry.
    pub fn observe(&mut self, entry: &EventLogEntry) {
        match &entry.record {
            LogRecord::Routed(item) => {
                self.metrics.total_routed += 1;
                self.metrics.per_partition_counts.bump(item.target());
                if item.source() != Partition::Bridge {
                    self.advance_dialogue(item.target());
                }
            }
            LogRecord::Synthesized(pattern) => {
                self.metrics.synthesized_patterns += 1;
                let s = self.metrics.emergence_score;
                let raised = (s + (1.0 - s) * pattern.emergence_score * self.config.emergence_rate).clamp(0.0, 1.0);
                if raised > s {
                    self.metrics.emergence_score = raised;
                    self.metrics.last_emergence_at = Some(entry.recorded_at_ms);
                }
            }
        }
    }

    fn advance_dialogue(&mut self, target: Partition) {
        if self.config.dialogue_window == 0 {
            return;
        }
        self.window_len += 1;
        if target == Partition::Internal {
            self.window_internal += 1;
        }
        if self.window_len == self.config.dialogue_window {
            let ratio = self.window_internal as f64 / self.window_len as f64;
            if (self.config.balanced_low..=self.config.balanced_high).contains(&ratio) {
                self.metrics.balanced_dialogue_events += 1;
            }
            self.window_len = 0;
            self.window_internal = 0;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ConsciousnessMetrics {
        self.metrics.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> &ConsciousnessMetrics {
        &self.metrics
    }

    /// Zero everything, including the partially filled dialogue window.
    pub fn reset(&mut self) {
        self.metrics = ConsciousnessMetrics::default();
        self.window_len = 0;
        self.window_internal = 0;
    }
}
