// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backpressure between producers, partition queues and consumers.
//!
//! Two independent mechanisms:
//! - **Capacity** governs producer admission. A full queue rejects the push.
//! - **Credit** governs consumer pull rate. A [`BackpressureStream`] only
//!   delivers to a subscription that has outstanding credit.
//!
//! [`BackpressureLevel`] is an advisory signal derived from queue fill ratio
//! that producers can use to slow down before they hit `QueueFull`.
//!
//! # Example
//!
//! ```
//! use bridge_router::BackpressureLevel;
//!
//! let level = BackpressureLevel::from_pressure(0.5);
//! assert_eq!(level, BackpressureLevel::Normal);
//! assert!(level.retry_after().is_none());
//!
//! // Nearly full - back off before pushing
//! let level = BackpressureLevel::from_pressure(0.9);
//! assert_eq!(level, BackpressureLevel::Throttle);
//! assert!(level.retry_after().is_some());
//! ```

mod stream;

pub use stream::{BackpressureStream, StreamError, SubscriptionHandle, SubscriptionId};

use std::time::Duration;

/// Queue pressure level for one partition.
///
/// - **Normal** (< 70%): push freely
/// - **Warn** (70-85%): consumers are falling behind
/// - **Throttle** (85-95%): producers should slow down
/// - **Saturated** (>= 95%): pushes are about to fail with `QueueFull`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    Normal = 0,
    Warn = 1,
    Throttle = 2,
    Saturated = 3,
}

impl BackpressureLevel {
    /// Calculate backpressure level from pressure ratio (0.0 → 1.0)
    #[must_use]
    pub fn from_pressure(pressure: f64) -> Self {
        match pressure {
            p if p < 0.70 => Self::Normal,
            p if p < 0.85 => Self::Warn,
            p if p < 0.95 => Self::Throttle,
            _ => Self::Saturated,
        }
    }

    /// Suggested pause before the next push
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Normal | Self::Warn => None,
            Self::Throttle => Some(Duration::from_millis(5)),
            Self::Saturated => Some(Duration::from_millis(25)),
        }
    }
}

impl std::fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_level_thresholds() {
        assert_eq!(BackpressureLevel::from_pressure(0.0), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.69), BackpressureLevel::Normal);
        assert_eq!(BackpressureLevel::from_pressure(0.70), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.84), BackpressureLevel::Warn);
        assert_eq!(BackpressureLevel::from_pressure(0.85), BackpressureLevel::Throttle);
        assert_eq!(BackpressureLevel::from_pressure(0.94), BackpressureLevel::Throttle);
        assert_eq!(BackpressureLevel::from_pressure(0.95), BackpressureLevel::Saturated);
        assert_eq!(BackpressureLevel::from_pressure(1.0), BackpressureLevel::Saturated);
    }

    #[test]
    fn test_retry_after_increases_with_severity() {
        assert_eq!(BackpressureLevel::Normal.retry_after(), None);
        assert_eq!(BackpressureLevel::Warn.retry_after(), None);
        assert!(BackpressureLevel::Saturated.retry_after() > BackpressureLevel::Throttle.retry_after());
    }

    #[test]
    fn test_level_ordering() {
        assert!(BackpressureLevel::Normal < BackpressureLevel::Warn);
        assert!(BackpressureLevel::Warn < BackpressureLevel::Throttle);
        assert!(BackpressureLevel::Throttle < BackpressureLevel::Saturated);
    }
}
