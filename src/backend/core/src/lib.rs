//! # Gavel Core
//!
//! A replicated, event-sourced auction engine.
//!
//! ## Architecture
//!
//! - **Events**: Auction events, the bid conflict resolver and the state projector
//! - **Journal**: Per-replica append-only logs (in-memory and JSON-lines files)
//! - **Replica**: Command handling, the per-replica control loop, recovery and
//!   replication of remote events
//! - **Telemetry**: Structured logging and metrics
//!
//! Every replica accepts bids independently and persists them to its own log.
//! Replicas read each other's logs and fold all events into the same state;
//! the conflict resolver ranks bids deterministically, so every replica
//! converges on the same winner regardless of arrival order.

pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod replica;
pub mod telemetry;

pub use error::{ErrorCode, ErrorSeverity, GavelError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, CoordinatorConfig, JournalConfig, JournalKind, ReplicaConfig};
    pub use crate::error::{ErrorCode, ErrorSeverity, GavelError, Result};
    pub use crate::events::{
        compare_bids, is_higher_bid, Aggregate, AuctionEvent, AuctionPhase, AuctionState, Bid,
        EventEnvelope, EventId, ReplicaId,
    };
    pub use crate::journal::{EventJournal, FileJournal, InMemoryCluster, InMemoryJournal};
    pub use crate::replica::{
        BackoffStrategy, Clock, Command, ManualClock, Replica, ReplicaHandle, Response,
        RetryPolicy, SystemClock,
    };
}
