// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use parking_lot::RwLock;

use super::traits::{EventIter, EventLogEntry, EventStore, PersistenceError, SequenceNo};

/// Volatile event store. Same contract as a durable one; entries are lost on
/// restart.
pub struct InMemoryEventStore {
    entries: RwLock<Vec<EventLogEntry>>,
}

impl InMemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Get current entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, entry: &EventLogEntry) -> Result<SequenceNo, PersistenceError> {
        let mut entries = self.entries.write();
        if let Some(last) = entries.last() {
            if entry.sequence <= last.sequence {
                return Err(PersistenceError::OutOfOrder {
                    last: last.sequence,
                    got: entry.sequence,
                });
            }
        }
        entries.push(entry.clone());
        Ok(entry.sequence)
    }

    fn replay(&self, since: SequenceNo) -> Result<EventIter<'_>, PersistenceError> {
        let entries = self.entries.read();
        let start = entries.partition_point(|e| e.sequence < since);
        let tail: Vec<EventLogEntry> = entries[start..].to_vec();
        Ok(Box::new(tail.into_iter()))
    }

    fn last_sequence(&self) -> Result<Option<SequenceNo>, PersistenceError> {
        Ok(self.entries.read().last().map(|e| e.sequence))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemKind, Partition, Priority};
    use crate::storage::traits::LogRecord;
    use std::sync::Arc;

    fn entry(seq: u64) -> EventLogEntry {
        let item = Item::new(Partition::Internal, Partition::External, ItemKind::Request, Priority::LOWEST).unwrap();
        EventLogEntry {
            sequence: SequenceNo(seq),
            recorded_at_ms: 1_700_000_000_000 + seq as i64,
            record: LogRecord::Routed(item),
        }
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = InMemoryEventStore::new();
        assert!(store.is_empty());
        assert_eq!(store.last_sequence().unwrap(), None);
    }

    #[test]
    fn test_append_and_replay_from_zero() {
        let store = InMemoryEventStore::new();
        for seq in 0..5 {
            assert_eq!(store.append(&entry(seq)).unwrap(), SequenceNo(seq));
        }

        let seqs: Vec<u64> = store.replay(SequenceNo::ZERO).unwrap().map(|e| e.sequence.0).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert_eq!(store.last_sequence().unwrap(), Some(SequenceNo(4)));
    }

    #[test]
    fn test_replay_since_is_inclusive() {
        let store = InMemoryEventStore::new();
        for seq in 0..5 {
            store.append(&entry(seq)).unwrap();
        }
        let seqs: Vec<u64> = store.replay(SequenceNo(3)).unwrap().map(|e| e.sequence.0).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(store.replay(SequenceNo(10)).unwrap().count(), 0);
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let store = InMemoryEventStore::new();
        store.append(&entry(3)).unwrap();

        let err = store.append(&entry(3)).unwrap_err();
        assert!(matches!(err, PersistenceError::OutOfOrder { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_readers_during_appends() {
        let store = Arc::new(InMemoryEventStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for seq in 0..200 {
                    store.append(&entry(seq)).unwrap();
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let seqs: Vec<u64> = store.replay(SequenceNo::ZERO).unwrap().map(|e| e.sequence.0).collect();
                    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(), 200);
    }
}
