//! Command handler.
//!
//! A pure function from the current state and a command to an `Effect`. The
//! coordinator performs the effect; nothing here touches the journal.

use chrono::{DateTime, Utc};

use super::command::{Command, Effect, Mode, Reply};
use crate::events::{AuctionEvent, AuctionState, Bid, ReplicaId};

/// What the handler needs to know about the replica running it.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    /// The local replica, origin of every event the handler emits
    pub replica_id: &'a ReplicaId,
    /// Logical-clock time at which the command was accepted
    pub accepted_at: DateTime<Utc>,
}

/// Decide what `command` does in `state`.
pub fn handle_command(state: &AuctionState, command: &Command, ctx: &CommandContext<'_>) -> Effect {
    match (Mode::of(state), command) {
        (Mode::Active, Command::OfferBid { bidder, offer }) => {
            Effect::Persist(AuctionEvent::BidRegistered {
                bid: Bid::new(bidder.clone(), *offer, ctx.accepted_at, ctx.replica_id.clone()),
            })
        }
        (Mode::Finished, Command::OfferBid { .. }) => Effect::Unhandled,

        (_, Command::GetHighestBid) => Effect::Reply(Reply::HighestBid(state.highest_bid().clone())),

        // Re-finishing is harmless; the finished set is grow-only
        (_, Command::Finish) => Effect::Persist(AuctionEvent::AuctionFinished {
            at_replica: ctx.replica_id.clone(),
        }),

        (Mode::Active, Command::Close) => Effect::Unhandled,
        (Mode::Finished, Command::Close) => Effect::Persist(AuctionEvent::WinnerDecided {
            at_replica: ctx.replica_id.clone(),
            winning_bid: state.highest_bid().clone(),
            amount: state.highest_counter_offer(),
        }),

        (Mode::Active, Command::IsClosed) => Effect::Reply(Reply::Closed(false)),
        (Mode::Finished, Command::IsClosed) => Effect::Reply(Reply::Closed(state.is_closed())),
    }
}
