//! Aggregate trait and the auction state projector.
//!
//! Aggregates are domain objects rebuilt from a stream of events. The
//! auction aggregate is folded from events of every replica, in whatever
//! order they arrive, so `apply` must commute across origins: bids are
//! ranked by the conflict resolver, finished replicas form a grow-only set
//! and `WinnerDecided` is an absorbing terminal marker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::event::{AuctionEvent, Bid, ReplicaId};
use super::resolver::is_higher_bid;

// =============================================================================
// Aggregate Trait
// =============================================================================

/// Trait for aggregates that can be reconstructed from a sequence of events.
///
/// Implementations must be pure functions of `(self, event) -> self'`. They
/// must not perform I/O or fail; every persisted event is valid by definition.
pub trait Aggregate {
    type Event;

    /// Apply a single event to mutate state.
    fn apply(&mut self, event: &Self::Event);

    /// Consume the aggregate and return it with `event` applied.
    fn applied(mut self, event: &Self::Event) -> Self
    where
        Self: Sized,
    {
        self.apply(event);
        self
    }
}

// =============================================================================
// Auction Phase
// =============================================================================

/// Lifecycle of an auction as seen by one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionPhase {
    /// Accepting bids.
    Running,
    /// At least one replica has finished; waiting for the others.
    Finishing,
    /// A winner has been decided. Terminal.
    Closed,
}

impl std::fmt::Display for AuctionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuctionPhase::Running => "running",
            AuctionPhase::Finishing => "finishing",
            AuctionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Auction State
// =============================================================================

/// State of an auction derived from its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionState {
    phase: AuctionPhase,
    highest_bid: Bid,
    /// Highest offer among the bids other than the current highest (the
    /// second price the winner pays).
    highest_counter_offer: u64,
    finished_at: BTreeSet<ReplicaId>,
}

impl AuctionState {
    /// The state before any event: running, with the seed bid leading.
    pub fn new(initial_bid: Bid) -> Self {
        Self {
            phase: AuctionPhase::Running,
            highest_counter_offer: initial_bid.offer,
            highest_bid: initial_bid,
            finished_at: BTreeSet::new(),
        }
    }

    /// Fold a sequence of events into the state seeded with `initial_bid`.
    pub fn replay<'a, I>(initial_bid: Bid, events: I) -> Self
    where
        I: IntoIterator<Item = &'a AuctionEvent>,
    {
        events
            .into_iter()
            .fold(Self::new(initial_bid), |state, event| state.applied(event))
    }

    pub fn phase(&self) -> AuctionPhase {
        self.phase
    }

    pub fn highest_bid(&self) -> &Bid {
        &self.highest_bid
    }

    pub fn highest_counter_offer(&self) -> u64 {
        self.highest_counter_offer
    }

    pub fn finished_at(&self) -> &BTreeSet<ReplicaId> {
        &self.finished_at
    }

    /// Still accepting bids.
    pub fn is_running(&self) -> bool {
        self.phase == AuctionPhase::Running
    }

    /// A winner has been decided.
    pub fn is_closed(&self) -> bool {
        self.phase == AuctionPhase::Closed
    }

    /// Whether every replica in `replicas` has reported finished.
    pub fn all_finished<'a, I>(&self, replicas: I) -> bool
    where
        I: IntoIterator<Item = &'a ReplicaId>,
    {
        replicas.into_iter().all(|r| self.finished_at.contains(r))
    }

    fn register_bid(&mut self, bid: &Bid) {
        if is_higher_bid(bid, &self.highest_bid) {
            self.highest_counter_offer = self.highest_bid.offer;
            self.highest_bid = bid.clone();
        } else {
            self.highest_counter_offer = self.highest_counter_offer.max(bid.offer);
        }
    }
}

impl Aggregate for AuctionState {
    type Event = AuctionEvent;

    fn apply(&mut self, event: &AuctionEvent) {
        // The decided outcome already accounts for every bid and finish
        if self.is_closed() {
            return;
        }

        match event {
            // Bids accepted before their origin finished may reach us after we
            // finished; they still count.
            AuctionEvent::BidRegistered { bid } => self.register_bid(bid),
            AuctionEvent::AuctionFinished { at_replica } => {
                self.finished_at.insert(at_replica.clone());
                self.phase = AuctionPhase::Finishing;
            }
            AuctionEvent::WinnerDecided {
                winning_bid,
                amount,
                ..
            } => {
                self.highest_bid = winning_bid.clone();
                self.highest_counter_offer = *amount;
                self.finished_at.clear();
                self.phase = AuctionPhase::Closed;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
