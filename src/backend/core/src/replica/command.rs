//! Commands, effects and responses.

use serde::{Deserialize, Serialize};

use crate::events::{AuctionEvent, AuctionPhase, AuctionState, Bid};

/// Requests a replica can be asked to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Place a bid. The replica assigns the timestamp.
    OfferBid { bidder: String, offer: u64 },
    /// Stop accepting bids at this replica.
    Finish,
    /// Current highest bid.
    GetHighestBid,
    /// Whether the winner has been decided.
    IsClosed,
    /// Decide the winner. Sent by the replica to itself.
    Close,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::OfferBid { .. } => "offer_bid",
            Command::Finish => "finish",
            Command::GetHighestBid => "get_highest_bid",
            Command::IsClosed => "is_closed",
            Command::Close => "close",
        }
    }
}

/// Read-only answers produced without persisting anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    HighestBid(Bid),
    Closed(bool),
}

/// What the handler decided to do with a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Durably append this event, then fold it.
    Persist(AuctionEvent),
    /// Answer without touching the log.
    Reply(Reply),
    /// The command is not valid in the current mode.
    Unhandled,
}

/// The answer a caller receives for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The command's event was persisted and applied.
    Accepted,
    /// The command is not valid for the auction's current phase.
    Rejected {
        command: String,
        phase: AuctionPhase,
    },
    HighestBid(Bid),
    Closed { closed: bool },
}

impl Response {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Response::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Response::Rejected { .. })
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::HighestBid(bid) => Response::HighestBid(bid),
            Reply::Closed(closed) => Response::Closed { closed },
        }
    }
}

/// The two behaviours a replica switches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bids are accepted.
    Active,
    /// This replica or another has finished; no more bids.
    Finished,
}

impl Mode {
    pub fn of(state: &AuctionState) -> Self {
        if state.is_running() {
            Mode::Active
        } else {
            Mode::Finished
        }
    }
}
