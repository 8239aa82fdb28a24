// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Router lifecycle: start, synthesis loop, shutdown.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{BridgeError, BridgeRouter, BridgeState};

impl BridgeRouter {
    /// Get current router state
    #[must_use]
    pub fn state(&self) -> BridgeState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn state_receiver(&self) -> watch::Receiver<BridgeState> {
        self.state_rx.clone()
    }

    /// Move from `from` to `to`; false if the router was in another state.
    fn transition(&self, from: BridgeState, to: BridgeState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            crate::metrics::set_bridge_state(Some(from.as_str()), to.as_str());
            debug!(from = %from, to = %to, "Router state changed");
        }
        moved
    }

    /// Spawn the background synthesis task. Must be called from within a
    /// tokio runtime.
    ///
    /// A cycle runs every `synthesis_interval_ms`, or early once
    /// `synthesis_item_trigger` items have been routed since the last one.
    #[tracing::instrument(skip(self))]
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, BridgeError> {
        // Subscribe before the transition so a fast shutdown is never missed.
        let state_rx = self.state.subscribe();
        if !self.transition(BridgeState::Created, BridgeState::Running) {
            return Err(BridgeError::NotStartable(self.state()));
        }
        info!(
            interval_ms = self.config.synthesis_interval_ms,
            item_trigger = self.config.synthesis_item_trigger,
            backend = self.log.backend(),
            "Bridge router running"
        );
        Ok(tokio::spawn(Arc::clone(self).run(state_rx)))
    }

    async fn run(self: Arc<Self>, mut state_rx: watch::Receiver<BridgeState>) {
        let mut interval = tokio::time::interval(self.config.synthesis_config().interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.synthesize_now();
                }

                _ = self.synthesis_trigger.notified() => {
                    debug!("Item trigger reached, running synthesis early");
                    self.synthesize_now();
                    interval.reset();
                }

                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow_and_update() == BridgeState::ShuttingDown {
                        break;
                    }
                }
            }
        }

        let report = self.synthesize_now();
        info!(synthesized = report.synthesized.len(), "Final synthesis cycle complete");
        self.transition(BridgeState::ShuttingDown, BridgeState::Stopped);
    }

    /// Stop the synthesis task after one final cycle. Resolves once the
    /// router is `Stopped`.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut state_rx = self.state.subscribe();

        if self.transition(BridgeState::Created, BridgeState::ShuttingDown) {
            // Never started: run the final cycle here.
            info!("Shutting down bridge router (synthesis task never started)");
            self.synthesize_now();
            self.transition(BridgeState::ShuttingDown, BridgeState::Stopped);
            return;
        }

        if self.transition(BridgeState::Running, BridgeState::ShuttingDown) {
            info!("Shutting down bridge router");
        }
        let _ = state_rx.wait_for(|state| *state == BridgeState::Stopped).await;
        info!("Bridge router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::item::Partition;
    use crate::synthesis::{CosineComparator, Pattern};
    use std::time::Duration;

    fn router(config: BridgeConfig) -> Arc<BridgeRouter> {
        Arc::new(BridgeRouter::new(config, Arc::new(CosineComparator), None).unwrap())
    }

    fn seed_matching_patterns(r: &BridgeRouter) {
        r.observe_pattern(Partition::Internal, Pattern::new("a", Partition::Internal, vec![1.0, 0.0], 0.5));
        r.observe_pattern(Partition::External, Pattern::new("x", Partition::External, vec![1.0, 0.0], 0.5));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let r = router(BridgeConfig::default());
        assert_eq!(r.state(), BridgeState::Created);

        let handle = r.start().unwrap();
        assert_eq!(r.state(), BridgeState::Running);
        assert!(matches!(r.start(), Err(BridgeError::NotStartable(BridgeState::Running))));

        seed_matching_patterns(&r);
        r.shutdown().await;
        assert_eq!(r.state(), BridgeState::Stopped);
        handle.await.unwrap();

        // The final cycle picked up the pair.
        assert_eq!(r.consciousness_metrics().synthesized_patterns, 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_start_runs_final_cycle() {
        let r = router(BridgeConfig::default());
        seed_matching_patterns(&r);
        r.shutdown().await;
        assert_eq!(r.state(), BridgeState::Stopped);
        assert_eq!(r.consciousness_metrics().synthesized_patterns, 1);

        // Idempotent
        r.shutdown().await;
        assert!(matches!(r.start(), Err(BridgeError::NotStartable(BridgeState::Stopped))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_drives_synthesis() {
        let r = router(BridgeConfig {
            synthesis_interval_ms: 1_000,
            ..Default::default()
        });
        let handle = r.start().unwrap();
        tokio::task::yield_now().await;

        seed_matching_patterns(&r);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(r.consciousness_metrics().synthesized_patterns, 1);

        r.shutdown().await;
        handle.await.unwrap();
    }
}
