// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-partition pattern synthesis.
//!
//! Each partition contributes [`Pattern`]s (from routed `PatternShare` items or
//! supplied directly). The [`SynthesisEngine`] periodically pairs the recent
//! patterns of both partitions, scores each pair with an injected
//! [`PatternComparator`], and turns pairs above the threshold into
//! [`SynthesizedPattern`]s.
//!
//! ```text
//!   Internal window (W)        External window (W)
//!   ┌───┬───┬───┐              ┌───┬───┬───┐
//!   │ a │ b │ c │   ×  pairs × │ x │ y │ z │
//!   └───┴───┴───┘              └───┴───┴───┘
//!            │ comparator(a.descriptor, x.descriptor)
//!            ▼
//!   similarity > threshold  ──► SynthesizedPattern ──► event log
//!                                                 └──► PatternShare to both sides
//! ```

mod comparator;
mod engine;

pub use comparator::{ComparatorError, CosineComparator, PatternComparator};
pub use engine::{SynthesisConfig, SynthesisEngine, SynthesisReport};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::item::Partition;

/// Pattern identifier, supplied by whoever produced the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternId(pub String);

impl From<&str> for PatternId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternOrigin {
    Partition(Partition),
    Synthesized,
}

/// A comparable observation from one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub origin: PatternOrigin,
    /// Opaque to the router; only the comparator reads it
    pub descriptor: Vec<f32>,
    /// Externally supplied quality score in `[0, 1]`
    pub entropy_reduction: f64,
    pub occurrence_count: u64,
}

impl Pattern {
    /// Build a partition pattern. `entropy_reduction` is clamped to `[0, 1]`.
    pub fn new(
        id: impl Into<PatternId>,
        origin: Partition,
        descriptor: Vec<f32>,
        entropy_reduction: f64,
    ) -> Self {
        Self {
            id: id.into(),
            origin: PatternOrigin::Partition(origin),
            descriptor,
            entropy_reduction: clamp_unit(entropy_reduction),
            occurrence_count: 1,
        }
    }

    /// The partition this pattern was observed on, if not synthesized.
    #[must_use]
    pub fn partition(&self) -> Option<Partition> {
        match self.origin {
            PatternOrigin::Partition(p) => Some(p),
            PatternOrigin::Synthesized => None,
        }
    }
}

impl From<String> for PatternId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A correspondence between one internal and one external pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedPattern {
    pub internal: Pattern,
    pub external: Pattern,
    pub similarity_score: f64,
    pub emergence_score: f64,
}

impl SynthesizedPattern {
    pub fn new(internal: Pattern, external: Pattern, similarity_score: f64, synergy_multiplier: f64) -> Self {
        let emergence_score =
            ((internal.entropy_reduction + external.entropy_reduction) * synergy_multiplier).clamp(0.0, 1.0);
        Self {
            internal,
            external,
            similarity_score: clamp_unit(similarity_score),
            emergence_score,
        }
    }

    /// `(internal id, external id)`, unique per synthesis.
    #[must_use]
    pub fn pair_key(&self) -> (PatternId, PatternId) {
        (self.internal.id.clone(), self.external.id.clone())
    }

    /// The pattern shared back to both partitions.
    #[must_use]
    pub fn to_shared_pattern(&self) -> Pattern {
        let a = &self.internal.descriptor;
        let b = &self.external.descriptor;
        let descriptor = if a.len() == b.len() {
            a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect()
        } else {
            a.clone()
        };
        Pattern {
            id: PatternId(format!("syn:{}+{}", self.internal.id, self.external.id)),
            origin: PatternOrigin::Synthesized,
            descriptor,
            entropy_reduction: self.emergence_score,
            occurrence_count: 1,
        }
    }
}

/// Most recent `W` patterns per routable partition.
pub struct PatternWindow {
    size: usize,
    lanes: [RwLock<VecDeque<Pattern>>; 2],
}

impl PatternWindow {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            lanes: [
                RwLock::new(VecDeque::with_capacity(size)),
                RwLock::new(VecDeque::with_capacity(size)),
            ],
        }
    }

    /// Record a pattern seen on `partition`. A pattern already in the window
    /// has its occurrence count bumped and becomes the most recent entry.
    /// Synthesized patterns and the bridge partition are ignored.
    pub fn observe(&self, partition: Partition, pattern: Pattern) -> bool {
        if pattern.origin == PatternOrigin::Synthesized {
            return false;
        }
        let Some(lane) = partition.lane_index().and_then(|i| self.lanes.get(i)) else {
            return false;
        };
        if self.size == 0 {
            return false;
        }

        let mut window = lane.write();
        let pattern = match window.iter().position(|p| p.id == pattern.id) {
            Some(pos) => match window.remove(pos) {
                Some(existing) => Pattern {
                    occurrence_count: existing.occurrence_count.saturating_add(pattern.occurrence_count),
                    ..pattern
                },
                None => pattern,
            },
            None => pattern,
        };
        while window.len() >= self.size {
            window.pop_front();
        }
        window.push_back(pattern);
        true
    }

    /// Read-only copy of one partition's window, oldest first.
    #[must_use]
    pub fn snapshot(&self, partition: Partition) -> Vec<Pattern> {
        partition
            .lane_index()
            .and_then(|i| self.lanes.get(i))
            .map(|lane| lane.read().iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
