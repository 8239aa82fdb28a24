// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::Item;
use crate::synthesis::SynthesizedPattern;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    #[error("event store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event encoding error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("out-of-order append: sequence {got} after {last}")]
    OutOfOrder { last: SequenceNo, got: SequenceNo },
}

/// Position in the event log. Dense, starts at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNo(pub u64);

impl SequenceNo {
    pub const ZERO: SequenceNo = SequenceNo(0);

    #[must_use]
    pub fn next(self) -> SequenceNo {
        SequenceNo(self.0 + 1)
    }
}

impl std::fmt::Display for SequenceNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LogRecord {
    Routed(Item),
    Synthesized(SynthesizedPattern),
}

/// One immutable log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub sequence: SequenceNo,
    /// Wall-clock time of the append (epoch millis)
    pub recorded_at_ms: i64,
    pub record: LogRecord,
}

pub type EventIter<'a> = Box<dyn Iterator<Item = EventLogEntry> + Send + 'a>;

/// Persistence contract for the event log.
///
/// Stores must keep entries in append order and never modify or drop them.
/// Retention and truncation are someone else's concern.
pub trait EventStore: Send + Sync {
    /// Append one entry. Its sequence must be greater than any stored one.
    fn append(&self, entry: &EventLogEntry) -> Result<SequenceNo, PersistenceError>;

    /// Entries with `sequence >= since`, in order.
    fn replay(&self, since: SequenceNo) -> Result<EventIter<'_>, PersistenceError>;

    /// Highest stored sequence, if any.
    fn last_sequence(&self) -> Result<Option<SequenceNo>, PersistenceError>;

    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;
}
