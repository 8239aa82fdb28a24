// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the bridge router.
//!
//! # Example
//!
//! ```
//! use bridge_router::BridgeConfig;
//!
//! // Minimal config (uses defaults)
//! let config = BridgeConfig::default();
//! assert_eq!(config.internal_queue_capacity, 1024);
//! assert!(config.validate().is_ok());
//!
//! // Tuned config
//! let config = BridgeConfig {
//!     external_queue_capacity: 64,
//!     failure_threshold: 3,
//!     synthesis_threshold: 0.9,
//!     event_log_path: Some("/var/lib/bridge/events.jsonl".into()),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::consciousness::ConsciousnessConfig;
use crate::item::Partition;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::synthesis::SynthesisConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("balanced_low ({low}) exceeds balanced_high ({high})")]
    InvertedBand { low: f64, high: f64 },
    #[error("synergy_multiplier must be positive, got {0}")]
    NonPositiveSynergy(f64),
    #[error("emergence_rate must be within (0, 1], got {0}")]
    EmergenceRate(f64),
}

/// Configuration for the bridge router.
///
/// All fields have sensible defaults. Set `event_log_path` to keep the
/// event log across restarts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeConfig {
    /// Queue capacities per destination partition
    #[serde(default = "default_queue_capacity")]
    pub internal_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub external_queue_capacity: usize,

    /// Circuit breaker: consecutive failures before opening
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Circuit breaker: time spent Open before trials are allowed
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Circuit breaker: trials in HalfOpen, all must succeed to close
    #[serde(default = "default_half_open_trial_budget")]
    pub half_open_trial_budget: u32,

    /// Synthesis: recent patterns kept per partition
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_synthesis_threshold")]
    pub synthesis_threshold: f64,
    #[serde(default = "default_synergy_multiplier")]
    pub synergy_multiplier: f64,
    /// How strongly each synthesis raises the aggregate emergence score
    #[serde(default = "default_emergence_rate")]
    pub emergence_rate: f64,
    #[serde(default = "default_synthesis_interval_ms")]
    pub synthesis_interval_ms: u64,
    /// Run synthesis early after this many routed items
    #[serde(default = "default_synthesis_item_trigger")]
    pub synthesis_item_trigger: u64,

    /// Credit granted to each new subscription
    #[serde(default = "default_credit")]
    pub default_credit: u32,

    /// Balanced dialogue: items per window and accepted internal share
    #[serde(default = "default_dialogue_window_size")]
    pub dialogue_window_size: u64,
    #[serde(default = "default_balanced_low")]
    pub balanced_low: f64,
    #[serde(default = "default_balanced_high")]
    pub balanced_high: f64,

    /// JSON-lines event log file. In-memory only when unset.
    #[serde(default)]
    pub event_log_path: Option<String>,
    /// fsync the event log file after every append
    #[serde(default)]
    pub event_log_fsync: bool,
}

fn default_queue_capacity() -> usize { 1024 }
fn default_failure_threshold() -> u32 { 5 }
fn default_recovery_timeout_ms() -> u64 { 30_000 }
fn default_half_open_trial_budget() -> u32 { 2 }
fn default_window_size() -> usize { 32 }
fn default_synthesis_threshold() -> f64 { 0.85 }
fn default_synergy_multiplier() -> f64 { 1.2 }
fn default_emergence_rate() -> f64 { 0.1 }
fn default_synthesis_interval_ms() -> u64 { 5_000 }
fn default_synthesis_item_trigger() -> u64 { 500 }
fn default_credit() -> u32 { 64 }
fn default_dialogue_window_size() -> u64 { 100 }
fn default_balanced_low() -> f64 { 0.4 }
fn default_balanced_high() -> f64 { 0.6 }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            internal_queue_capacity: default_queue_capacity(),
            external_queue_capacity: default_queue_capacity(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            half_open_trial_budget: default_half_open_trial_budget(),
            window_size: default_window_size(),
            synthesis_threshold: default_synthesis_threshold(),
            synergy_multiplier: default_synergy_multiplier(),
            emergence_rate: default_emergence_rate(),
            synthesis_interval_ms: default_synthesis_interval_ms(),
            synthesis_item_trigger: default_synthesis_item_trigger(),
            default_credit: default_credit(),
            dialogue_window_size: default_dialogue_window_size(),
            balanced_low: default_balanced_low(),
            balanced_high: default_balanced_high(),
            event_log_path: None,
            event_log_fsync: false,
        }
    }
}

impl BridgeConfig {
    /// Reject configurations the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero: [(&'static str, u64); 9] = [
            ("internal_queue_capacity", self.internal_queue_capacity as u64),
            ("external_queue_capacity", self.external_queue_capacity as u64),
            ("failure_threshold", u64::from(self.failure_threshold)),
            ("half_open_trial_budget", u64::from(self.half_open_trial_budget)),
            ("window_size", self.window_size as u64),
            ("synthesis_interval_ms", self.synthesis_interval_ms),
            ("synthesis_item_trigger", self.synthesis_item_trigger),
            ("default_credit", u64::from(self.default_credit)),
            ("dialogue_window_size", self.dialogue_window_size),
        ];
        if let Some((field, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }

        for (field, value) in [
            ("synthesis_threshold", self.synthesis_threshold),
            ("balanced_low", self.balanced_low),
            ("balanced_high", self.balanced_high),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        if self.balanced_low > self.balanced_high {
            return Err(ConfigError::InvertedBand {
                low: self.balanced_low,
                high: self.balanced_high,
            });
        }
        if !(self.synergy_multiplier > 0.0 && self.synergy_multiplier.is_finite()) {
            return Err(ConfigError::NonPositiveSynergy(self.synergy_multiplier));
        }
        if !(self.emergence_rate > 0.0 && self.emergence_rate <= 1.0) {
            return Err(ConfigError::EmergenceRate(self.emergence_rate));
        }
        Ok(())
    }

    #[must_use]
    pub fn queue_capacity(&self, partition: Partition) -> usize {
        match partition {
            Partition::Internal => self.internal_queue_capacity,
            Partition::External => self.external_queue_capacity,
            Partition::Bridge => 0,
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            half_open_trial_budget: self.half_open_trial_budget,
        }
    }

    #[must_use]
    pub fn synthesis_config(&self) -> SynthesisConfig {
        SynthesisConfig {
            window_size: self.window_size,
            synthesis_threshold: self.synthesis_threshold,
            synergy_multiplier: self.synergy_multiplier,
            interval: Duration::from_millis(self.synthesis_interval_ms),
            item_trigger: self.synthesis_item_trigger,
        }
    }

    #[must_use]
    pub fn consciousness_config(&self) -> ConsciousnessConfig {
        ConsciousnessConfig {
            dialogue_window: self.dialogue_window_size,
            balanced_low: self.balanced_low,
            balanced_high: self.balanced_high,
            emergence_rate: self.emergence_rate,
        }
    }
}
