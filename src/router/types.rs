// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the bridge router.

use serde::Serialize;
use thiserror::Error;

use crate::backpressure::StreamError;
use crate::config::ConfigError;
use crate::item::Partition;
use crate::resilience::circuit_breaker::CircuitState;
use crate::storage::{PersistenceError, SequenceNo};

/// Router lifecycle state.
///
/// Use [`super::BridgeRouter::state()`] to check current state or
/// [`super::BridgeRouter::state_receiver()`] to watch for changes.
/// Routing works in every state; the lifecycle only governs the background
/// synthesis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Just created, synthesis task not running
    Created,
    /// Synthesis task running
    Running,
    /// Final synthesis cycle in progress
    ShuttingDown,
    /// Synthesis task finished
    Stopped,
}

impl BridgeState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::ShuttingDown => "ShuttingDown",
            Self::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why `route` refused an item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("target circuit open")]
    CircuitOpen,
    #[error("target queue full")]
    QueueFull,
    /// Only reachable with items that bypassed `Item::new`, e.g. deserialized ones
    #[error("target partition has no queue")]
    InvalidTarget,
}

impl RejectReason {
    /// Metric label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::QueueFull => "queue_full",
            Self::InvalidTarget => "invalid_target",
        }
    }
}

/// Result of [`super::BridgeRouter::route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum RouteOutcome {
    /// Enqueued and logged at this sequence
    Routed(SequenceNo),
    Rejected(RejectReason),
}

impl RouteOutcome {
    #[must_use]
    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Routed(_))
    }

    #[must_use]
    pub fn sequence(&self) -> Option<SequenceNo> {
        match self {
            Self::Routed(seq) => Some(*seq),
            Self::Rejected(_) => None,
        }
    }

    pub fn into_result(self) -> Result<SequenceNo, RejectReason> {
        match self {
            Self::Routed(seq) => Ok(seq),
            Self::Rejected(reason) => Err(reason),
        }
    }
}

/// Counters for one destination partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub routed: u64,
    pub depth: usize,
    pub peak_depth: usize,
    pub delivered: u64,
    pub rejected_queue_full: u64,
    pub rejected_circuit_open: u64,
    pub circuit_state: CircuitState,
}

/// Point-in-time copy of the router's counters since process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    pub total_routed: u64,
    pub internal: PartitionStats,
    pub external: PartitionStats,
    /// Highest depth any queue has reached
    pub peak_depth: usize,
    /// Every rejection, for any reason
    pub lost: u64,
    pub comparator_failures: u64,
    pub persistence_failures: u64,
    pub persistence_degraded: bool,
}

impl MessageStats {
    #[must_use]
    pub fn partition(&self, partition: Partition) -> Option<&PartitionStats> {
        match partition {
            Partition::Internal => Some(&self.internal),
            Partition::External => Some(&self.external),
            Partition::Bridge => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("event log: {0}")]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("partition '{0}' has no queue")]
    NoQueue(Partition),
    #[error("router cannot start from state {0}")]
    NotStartable(BridgeState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_state_display() {
        assert_eq!(format!("{}", BridgeState::Created), "Created");
        assert_eq!(format!("{}", BridgeState::ShuttingDown), "ShuttingDown");
        assert_eq!(format!("{}", BridgeState::Stopped), "Stopped");
    }

    #[test]
    fn test_route_outcome_accessors() {
        let ok = RouteOutcome::Routed(SequenceNo(7));
        assert!(ok.is_routed());
        assert_eq!(ok.sequence(), Some(SequenceNo(7)));
        assert_eq!(ok.into_result(), Ok(SequenceNo(7)));

        let full = RouteOutcome::Rejected(RejectReason::QueueFull);
        assert!(!full.is_routed());
        assert_eq!(full.sequence(), None);
        assert_eq!(full.into_result(), Err(RejectReason::QueueFull));
        assert_eq!(RejectReason::CircuitOpen.as_str(), "circuit_open");
    }
}
