// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pairwise scoring of partition windows.
//!
//! The engine only decides *what* to synthesize. Writing the results to the
//! event log and routing them back to the partitions is the router's job
//! (see `BridgeRouter::synthesize_now`), so the engine never touches a queue.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ComparatorError, Pattern, PatternComparator, PatternId, SynthesizedPattern};

/// Synthesis tuning, taken from [`BridgeConfig`](crate::BridgeConfig).
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    /// Patterns kept per partition (W)
    pub window_size: usize,
    /// Pairs must score strictly above this
    pub synthesis_threshold: f64,
    pub synergy_multiplier: f64,
    /// Run a cycle at least this often
    pub interval: Duration,
    /// ... or after this many routed items, whichever comes first
    pub item_trigger: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            window_size: 32,
            synthesis_threshold: 0.85,
            synergy_multiplier: 1.2,
            interval: Duration::from_secs(5),
            item_trigger: 500,
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default)]
pub struct SynthesisReport {
    pub pairs_compared: usize,
    /// Pairs skipped because they were synthesized in an earlier cycle
    pub pairs_skipped: usize,
    pub comparator_failures: usize,
    pub synthesized: Vec<SynthesizedPattern>,
}

pub struct SynthesisEngine {
    config: SynthesisConfig,
    comparator: Arc<dyn PatternComparator>,
    synthesized_pairs: Mutex<HashSet<(PatternId, PatternId)>>,
    cycles: AtomicU64,
    comparator_failures: AtomicU64,
}

impl SynthesisEngine {
    pub fn new(config: SynthesisConfig, comparator: Arc<dyn PatternComparator>) -> Self {
        Self {
            config,
            comparator,
            synthesized_pairs: Mutex::new(HashSet::new()),
            cycles: AtomicU64::new(0),
            comparator_failures: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Score every `(internal, external)` pair and return the new syntheses.
    /// A pair is synthesized at most once over the engine's lifetime.
    pub fn evaluate(&self, internal: &[Pattern], external: &[Pattern]) -> SynthesisReport {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let mut report = SynthesisReport::default();
        let mut seen = self.synthesized_pairs.lock();

        for p_int in internal {
            for p_ext in external {
                let key = (p_int.id.clone(), p_ext.id.clone());
                if seen.contains(&key) {
                    report.pairs_skipped += 1;
                    continue;
                }
                report.pairs_compared += 1;

                let score = match self.score(p_int, p_ext) {
                    Ok(score) => score,
                    Err(e) => {
                        report.comparator_failures += 1;
                        self.comparator_failures.fetch_add(1, Ordering::Relaxed);
                        crate::metrics::record_comparator_failure();
                        warn!(internal = %p_int.id, external = %p_ext.id, error = %e, "Comparator failed, skipping pair");
                        continue;
                    }
                };

                if score > self.config.synthesis_threshold {
                    let synthesized = SynthesizedPattern::new(
                        p_int.clone(),
                        p_ext.clone(),
                        score,
                        self.config.synergy_multiplier,
                    );
                    debug!(
                        internal = %p_int.id,
                        external = %p_ext.id,
                        similarity = score,
                        emergence = synthesized.emergence_score,
                        "Cross-partition correspondence found"
                    );
                    seen.insert(key);
                    report.synthesized.push(synthesized);
                }
            }
        }
        report
    }

    /// Mark a pair as already synthesized, e.g. one recovered from a replayed
    /// log, so a restarted router does not emit it again.
    pub fn remember(&self, pair: (PatternId, PatternId)) {
        self.synthesized_pairs.lock().insert(pair);
    }

    #[must_use]
    pub fn synthesized_pair_count(&self) -> usize {
        self.synthesized_pairs.lock().len()
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn comparator_failures(&self) -> u64 {
        self.comparator_failures.load(Ordering::Relaxed)
    }

    fn score(&self, a: &Pattern, b: &Pattern) -> Result<f64, ComparatorError> {
        let score = self.comparator.similarity(&a.descriptor, &b.descriptor)?;
        if !(0.0..=1.0).contains(&score) {
            return Err(ComparatorError::OutOfRange(score));
        }
        Ok(score)
    }
}
