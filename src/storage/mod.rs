// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event log persistence.
//!
//! [`EventStore`] is the backend contract; [`InMemoryEventStore`] and
//! [`JsonlEventStore`] implement it. [`EventLog`] sits on top, assigns
//! sequence numbers, and degrades to memory when the backend fails.

pub mod jsonl;
pub mod log;
pub mod memory;
pub mod traits;

pub use jsonl::JsonlEventStore;
pub use log::EventLog;
pub use memory::InMemoryEventStore;
pub use traits::{EventIter, EventLogEntry, EventStore, LogRecord, PersistenceError, SequenceNo};
