// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routed item data structure.
//!
//! The [`Item`] is the unit that flows through the bridge. Producers build one
//! with [`Item::new`], which enforces the routing invariants up front, and the
//! router stamps the id and enqueue time at admission.
//!
//! # Example
//!
//! ```
//! use bridge_router::{Item, ItemKind, Partition, Priority};
//!
//! let item = Item::new(
//!     Partition::Internal,
//!     Partition::External,
//!     ItemKind::Request,
//!     Priority::new(7).unwrap(),
//! )
//! .unwrap();
//!
//! assert_eq!(item.target(), Partition::External);
//! assert!(item.id().is_unassigned());
//!
//! // Same-partition traffic is only allowed for heartbeats
//! assert!(Item::new(Partition::Internal, Partition::Internal, ItemKind::Request, Priority::LOWEST).is_err());
//! assert!(Item::new(Partition::Internal, Partition::Internal, ItemKind::Heartbeat, Priority::LOWEST).is_ok());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::synthesis::Pattern;

/// One side of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Internal,
    External,
    /// Router-internal pseudo partition. Valid as a source, never as a target.
    Bridge,
}

impl Partition {
    /// Partitions that own a queue.
    pub const ROUTABLE: [Partition; 2] = [Partition::Internal, Partition::External];

    /// Lane index for routable partitions.
    #[must_use]
    pub fn lane_index(self) -> Option<usize> {
        match self {
            Self::Internal => Some(0),
            Self::External => Some(1),
            Self::Bridge => None,
        }
    }

    /// The other routable side, if any.
    #[must_use]
    pub fn opposite(self) -> Option<Partition> {
        match self {
            Self::Internal => Some(Self::External),
            Self::External => Some(Self::Internal),
            Self::Bridge => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Bridge => "bridge",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Observation,
    Request,
    Result,
    PatternShare,
    Synchronization,
    Heartbeat,
}

/// Errors raised when building an [`Item`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("priority {0} out of range (max {max})", max = Priority::MAX)]
    PriorityOutOfRange(u8),
    #[error("partition '{0}' cannot be a routing target")]
    InvalidTarget(Partition),
    #[error("{kind:?} item cannot be routed from '{partition}' to itself")]
    SamePartition { partition: Partition, kind: ItemKind },
}

/// Routing priority, `0..=9`. Higher is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MAX: u8 = 9;
    pub const LOWEST: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGHEST: Priority = Priority(Self::MAX);

    pub fn new(value: u8) -> Result<Self, ItemError> {
        if value > Self::MAX {
            return Err(ItemError::PriorityOutOfRange(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = ItemError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

/// Opaque item id, assigned monotonically by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl ItemId {
    pub const UNASSIGNED: ItemId = ItemId(0);

    #[must_use]
    pub fn is_unassigned(self) -> bool {
        self == Self::UNASSIGNED
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// Handle to a payload held elsewhere. The router never looks inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub handle: String,
    pub size_bytes: u64,
}

impl PayloadRef {
    pub fn new(handle: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            handle: handle.into(),
            size_bytes,
        }
    }
}

/// The unit routed between partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    id: ItemId,
    source: Partition,
    target: Partition,
    priority: Priority,
    /// Nanoseconds since the admitting router started
    enqueued_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<ItemId>,
    #[serde(default)]
    payload_ref: PayloadRef,
    kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<Pattern>,
}

impl Item {
    /// Build an item, checking the routing invariants.
    pub fn new(
        source: Partition,
        target: Partition,
        kind: ItemKind,
        priority: Priority,
    ) -> Result<Self, ItemError> {
        if target == Partition::Bridge {
            return Err(ItemError::InvalidTarget(target));
        }
        if source == target && kind != ItemKind::Heartbeat {
            return Err(ItemError::SamePartition { partition: source, kind });
        }
        Ok(Self {
            id: ItemId::UNASSIGNED,
            source,
            target,
            priority,
            enqueued_at: 0,
            correlation_id: None,
            payload_ref: PayloadRef::default(),
            kind,
            pattern: None,
        })
    }

    /// Link this item to the request it answers.
    #[must_use]
    pub fn with_correlation(mut self, id: ItemId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: PayloadRef) -> Self {
        self.payload_ref = payload;
        self
    }

    /// Attach a pattern. Only `PatternShare` items feed the synthesis windows.
    #[must_use]
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Stamp router-owned fields at admission.
    pub(crate) fn admit(mut self, id: ItemId, enqueued_at: u64) -> Self {
        self.id = id;
        self.enqueued_at = enqueued_at;
        self
    }

    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[must_use]
    pub fn source(&self) -> Partition {
        self.source
    }

    #[must_use]
    pub fn target(&self) -> Partition {
        self.target
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<ItemId> {
        self.correlation_id
    }

    #[must_use]
    pub fn payload_ref(&self) -> &PayloadRef {
        &self.payload_ref
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }
}
