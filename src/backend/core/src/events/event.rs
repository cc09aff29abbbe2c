//! Event definitions and the replicated log record.
//!
//! This module provides:
//! - `ReplicaId` and `Bid`, the identities and values events talk about
//! - `AuctionEvent`, the facts a replica persists
//! - `EventEnvelope`, the unit of replication: an event tagged with its
//!   origin replica, per-origin sequence number and logical timestamp

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of one replica of the aggregate.
///
/// Ordering is lexicographic on the identifier; the conflict resolver relies
/// on it as the final tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Bid
// =============================================================================

/// A candidate value: an offer made by a bidder, accepted at some replica.
///
/// `timestamp` is assigned by the accepting replica's logical clock, never
/// by the bidder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: String,
    pub offer: u64,
    pub timestamp: DateTime<Utc>,
    pub origin_replica: ReplicaId,
}

impl Bid {
    pub fn new(
        bidder: impl Into<String>,
        offer: u64,
        timestamp: DateTime<Utc>,
        origin_replica: ReplicaId,
    ) -> Self {
        Self {
            bidder: bidder.into(),
            offer,
            timestamp,
            origin_replica,
        }
    }
}

// =============================================================================
// Domain Events
// =============================================================================

/// Facts persisted by a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    /// A bid was accepted at its origin replica.
    BidRegistered { bid: Bid },

    /// A replica stopped accepting bids.
    AuctionFinished { at_replica: ReplicaId },

    /// The replica responsible for closing fixed the outcome.
    WinnerDecided {
        at_replica: ReplicaId,
        winning_bid: Bid,
        amount: u64,
    },
}

impl AuctionEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            AuctionEvent::BidRegistered { .. } => "BidRegistered",
            AuctionEvent::AuctionFinished { .. } => "AuctionFinished",
            AuctionEvent::WinnerDecided { .. } => "WinnerDecided",
        }
    }
}

// =============================================================================
// Event Envelope
// =============================================================================

/// An event wrapped with its replication metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier
    pub event_id: EventId,

    /// Replica whose log this event was appended to
    pub origin: ReplicaId,

    /// Position in the origin's log, starting at 1 with no gaps
    pub sequence: u64,

    /// Logical time at the origin when the event was appended
    pub recorded_at: DateTime<Utc>,

    /// The event data
    pub event: AuctionEvent,
}

impl EventEnvelope {
    /// Create a new envelope for an event.
    pub fn new(
        origin: ReplicaId,
        sequence: u64,
        recorded_at: DateTime<Utc>,
        event: AuctionEvent,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            origin,
            sequence,
            recorded_at,
            event,
        }
    }

    /// Get the event type.
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}
