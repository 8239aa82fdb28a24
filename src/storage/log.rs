// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The router's event log: sequence assignment plus graceful degradation.
//!
//! Appends go to the primary [`EventStore`] while it works. The first failed
//! append marks the log degraded and every later entry goes to an in-memory
//! fallback instead; routing never fails because persistence did. Replay
//! merges both sources by sequence.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

use super::memory::InMemoryEventStore;
use super::traits::{EventLogEntry, EventStore, LogRecord, PersistenceError, SequenceNo};

pub struct EventLog {
    primary: Option<Arc<dyn EventStore>>,
    fallback: InMemoryEventStore,
    /// Next sequence to assign. Held for the whole append.
    next: Mutex<SequenceNo>,
    degraded: AtomicBool,
    failures: AtomicU64,
}

impl EventLog {
    /// Log with no durable store. Never degraded.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            primary: None,
            fallback: InMemoryEventStore::new(),
            next: Mutex::new(SequenceNo::ZERO),
            degraded: AtomicBool::new(false),
            failures: AtomicU64::new(0),
        }
    }

    /// Log backed by `store`, continuing after whatever it already holds.
    pub fn with_primary(store: Arc<dyn EventStore>) -> Result<Self, PersistenceError> {
        let next = store.last_sequence()?.map_or(SequenceNo::ZERO, SequenceNo::next);
        info!(backend = store.name(), next = %next, "Event log attached to store");
        Ok(Self {
            primary: Some(store),
            fallback: InMemoryEventStore::new(),
            next: Mutex::new(next),
            degraded: AtomicBool::new(false),
            failures: AtomicU64::new(0),
        })
    }

    /// Append a record, assigning its sequence and timestamp. Infallible.
    pub fn append(&self, record: LogRecord) -> EventLogEntry {
        let mut next = self.next.lock();
        let entry = EventLogEntry {
            sequence: *next,
            recorded_at_ms: now_ms(),
            record,
        };

        let stored_primary = match &self.primary {
            Some(store) if !self.is_degraded() => match store.append(&entry) {
                Ok(_) => true,
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    self.degraded.store(true, Ordering::Release);
                    crate::metrics::record_persistence_error(store.name());
                    crate::metrics::set_persistence_degraded(true);
                    warn!(
                        backend = store.name(),
                        sequence = %entry.sequence,
                        error = %e,
                        "Event store append failed, falling back to in-memory log"
                    );
                    false
                }
            },
            _ => false,
        };

        if !stored_primary {
            if let Err(e) = self.fallback.append(&entry) {
                error!(sequence = %entry.sequence, error = %e, "In-memory event log rejected entry");
            }
        }

        *next = entry.sequence.next();
        entry
    }

    /// Every entry with `sequence >= since`, merged from both stores.
    ///
    /// A primary that cannot be read is logged and skipped; whatever the
    /// fallback holds is still returned.
    pub fn replay(&self, since: SequenceNo) -> Vec<EventLogEntry> {
        let mut entries: Vec<EventLogEntry> = Vec::new();

        if let Some(store) = &self.primary {
            match store.replay(since) {
                Ok(iter) => entries.extend(iter),
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_persistence_error(store.name());
                    warn!(backend = store.name(), error = %e, "Event store replay failed");
                }
            }
        }

        let primary_count = entries.len();
        if let Ok(iter) = self.fallback.replay(since) {
            entries.extend(iter);
        }
        if entries.len() != primary_count && primary_count > 0 {
            entries.sort_by_key(|e| e.sequence);
            entries.dedup_by_key(|e| e.sequence);
        }
        entries
    }

    /// Sequence the next append will get.
    #[must_use]
    pub fn next_sequence(&self) -> SequenceNo {
        *self.next.lock()
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Failed primary appends and replays since startup
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.primary.as_ref().map_or("memory", |s| s.name())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
