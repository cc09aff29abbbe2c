//! Property tests for the state projector.
//!
//! Replicas observe the same events in different orders. Whatever the order,
//! and however often remote events are redelivered, every replica must end
//! up with the same highest bid and counter offer.
//!
//! ## Properties Verified
//!
//! - Events from different origins commute
//! - Folding the same `AuctionFinished` twice changes nothing
//! - Any interleaving of per-origin logs yields the same state
//! - Redelivery through the remote cursors applies each event once

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use proptest::sample::Index;

use gavel_core::events::{
    highest_of, Aggregate, AuctionEvent, AuctionState, Bid, EventEnvelope, ReplicaId,
};
use gavel_core::replica::{Ingest, RemoteCursors};

const ORIGINS: [&str; 3] = ["R1", "R2", "R3"];

// ============================================================================
// Helpers
// ============================================================================

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn seed() -> Bid {
    Bid::new("chbatey", 12, at(0), ReplicaId::from("R1"))
}

/// Bidders are tied to the accepting replica, so bids that rank equal are equal.
fn bid_at(origin: &ReplicaId, offer: u64, millis: i64) -> Bid {
    Bid::new(format!("bidder@{}", origin), offer, at(millis), origin.clone())
}

fn bids_of(events: &[EventEnvelope]) -> impl Iterator<Item = &Bid> {
    events.iter().filter_map(|e| match &e.event {
        AuctionEvent::BidRegistered { bid } => Some(bid),
        _ => None,
    })
}

/// Merge per-origin logs, keeping each log's order, taking the next event
/// from the origin `picks` chooses.
fn interleave(logs: &[Vec<EventEnvelope>], picks: &[Index]) -> Vec<EventEnvelope> {
    let mut positions = vec![0usize; logs.len()];
    let total: usize = logs.iter().map(Vec::len).sum();
    let mut picks = picks.iter().cycle();
    let mut out = Vec::with_capacity(total);

    while out.len() < total {
        let candidates: Vec<usize> = (0..logs.len())
            .filter(|&i| positions[i] < logs[i].len())
            .collect();
        let chosen = match picks.next() {
            Some(index) => candidates[index.index(candidates.len())],
            None => candidates[0],
        };
        out.push(logs[chosen][positions[chosen]].clone());
        positions[chosen] += 1;
    }
    out
}

// ============================================================================
// Strategies
// ============================================================================

fn arb_origin() -> impl Strategy<Value = ReplicaId> {
    prop::sample::select(ORIGINS.to_vec()).prop_map(ReplicaId::from)
}

fn arb_bid() -> impl Strategy<Value = Bid> {
    (arb_origin(), 0u64..500, 1i64..50)
        .prop_map(|(origin, offer, millis)| bid_at(&origin, offer, millis))
}

/// An event as it could appear in the log of `origin`. Only R1 decides winners.
fn arb_event_from(origin: ReplicaId) -> BoxedStrategy<AuctionEvent> {
    let bid = {
        let origin = origin.clone();
        (0u64..500, 1i64..50)
            .prop_map(move |(offer, millis)| AuctionEvent::BidRegistered {
                bid: bid_at(&origin, offer, millis),
            })
    };
    let finished = Just(AuctionEvent::AuctionFinished {
        at_replica: origin.clone(),
    });

    if origin.as_str() != "R1" {
        return prop_oneof![4 => bid, 1 => finished].boxed();
    }

    let decided = arb_bid()
        .prop_flat_map(|winning_bid| {
            let offer = winning_bid.offer;
            (Just(winning_bid), 0..=offer)
        })
        .prop_map(|(winning_bid, amount)| AuctionEvent::WinnerDecided {
            at_replica: ReplicaId::from("R1"),
            winning_bid,
            amount,
        });
    prop_oneof![4 => bid, 1 => finished, 1 => decided].boxed()
}

fn arb_event() -> impl Strategy<Value = AuctionEvent> {
    arb_origin().prop_flat_map(arb_event_from)
}

/// Any state reachable by folding events into the seeded auction.
fn arb_state() -> impl Strategy<Value = AuctionState> {
    prop::collection::vec(arb_event(), 0..12).prop_map(|events| AuctionState::replay(seed(), &events))
}

/// Two events stored by two different replicas.
fn arb_events_from_distinct_origins() -> impl Strategy<Value = (AuctionEvent, AuctionEvent)> {
    prop::sample::subsequence(ORIGINS.to_vec(), 2).prop_flat_map(|pair| {
        (
            arb_event_from(ReplicaId::from(pair[0])),
            arb_event_from(ReplicaId::from(pair[1])),
        )
    })
}

/// The log of one replica: bids with strictly increasing timestamps,
/// optionally ending with the replica finishing.
fn arb_log(origin: &'static str) -> impl Strategy<Value = Vec<EventEnvelope>> {
    (prop::collection::vec((0u64..500, 1i64..5), 0..15), any::<bool>()).prop_map(
        move |(bids, finishes)| {
            let origin = ReplicaId::from(origin);
            let mut millis = 0;
            let mut events: Vec<AuctionEvent> = bids
                .into_iter()
                .map(|(offer, gap)| {
                    millis += gap;
                    AuctionEvent::BidRegistered {
                        bid: bid_at(&origin, offer, millis),
                    }
                })
                .collect();
            if finishes {
                events.push(AuctionEvent::AuctionFinished {
                    at_replica: origin.clone(),
                });
            }

            events
                .into_iter()
                .enumerate()
                .map(|(i, event)| EventEnvelope::new(origin.clone(), i as u64 + 1, at(i as i64), event))
                .collect()
        },
    )
}

fn arb_picks() -> impl Strategy<Value = Vec<Index>> {
    prop::collection::vec(any::<Index>(), 0..64)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: events stored by different replicas commute
    #[test]
    fn prop_events_from_different_origins_commute(
        state in arb_state(),
        (first, second) in arb_events_from_distinct_origins()
    ) {
        let left = state.clone().applied(&first).applied(&second);
        let right = state.applied(&second).applied(&first);

        prop_assert_eq!(left, right, "events from different origins must commute");
    }

    /// Property: a replica finishing is recorded once however often it is folded
    #[test]
    fn prop_finished_is_idempotent(state in arb_state(), origin in arb_origin()) {
        let finished = AuctionEvent::AuctionFinished { at_replica: origin };
        let once = state.applied(&finished);
        let twice = once.clone().applied(&finished);

        prop_assert_eq!(once, twice);
    }

    /// Property: any interleaving of the replicas' logs converges
    #[test]
    fn prop_interleavings_converge(
        logs in (arb_log("R1"), arb_log("R2"), arb_log("R3")),
        picks in arb_picks()
    ) {
        let logs = vec![logs.0, logs.1, logs.2];
        let in_log_order = AuctionState::replay(seed(), logs.iter().flatten().map(|e| &e.event));

        let interleaved = interleave(&logs, &picks);
        let state = AuctionState::replay(seed(), interleaved.iter().map(|e| &e.event));
        prop_assert_eq!(&state, &in_log_order);

        let all: Vec<EventEnvelope> = logs.into_iter().flatten().collect();
        let opening = seed();
        let expected = highest_of(bids_of(&all).chain(std::iter::once(&opening)));
        prop_assert_eq!(Some(state.highest_bid()), expected);
        prop_assert!(state.highest_counter_offer() <= state.highest_bid().offer);
    }

    /// Property: every ordering of a decided auction's events ends closed on the decision
    #[test]
    fn prop_decided_auction_closes_in_any_order(
        events in Just(vec![
            AuctionEvent::BidRegistered { bid: bid_at(&ReplicaId::from("R1"), 100, 1) },
            AuctionEvent::BidRegistered { bid: bid_at(&ReplicaId::from("R2"), 70, 2) },
            AuctionEvent::AuctionFinished { at_replica: ReplicaId::from("R1") },
            AuctionEvent::AuctionFinished { at_replica: ReplicaId::from("R2") },
            AuctionEvent::WinnerDecided {
                at_replica: ReplicaId::from("R1"),
                winning_bid: bid_at(&ReplicaId::from("R1"), 100, 1),
                amount: 70,
            },
        ]).prop_shuffle()
    ) {
        let state = AuctionState::replay(seed(), &events);

        prop_assert!(state.is_closed());
        prop_assert_eq!(state.highest_bid(), &bid_at(&ReplicaId::from("R1"), 100, 1));
        prop_assert_eq!(state.highest_counter_offer(), 70);
    }

    /// Property: duplicated and reordered deliveries apply each event exactly once
    #[test]
    fn prop_redelivery_through_cursors_converges(log in arb_log("R2"), picks in arb_picks()) {
        let expected = AuctionState::replay(seed(), log.iter().map(|e| &e.event));

        let deliveries: Vec<usize> = if log.is_empty() {
            Vec::new()
        } else {
            picks
                .iter()
                .map(|index| index.index(log.len()))
                .chain(0..log.len())
                .collect()
        };

        let mut cursors = RemoteCursors::new();
        let mut state = AuctionState::new(seed());
        for index in deliveries {
            if let Ingest::Ready(events) = cursors.accept(log[index].clone()) {
                for envelope in &events {
                    state.apply(&envelope.event);
                }
            }
        }

        prop_assert_eq!(state, expected);
        prop_assert_eq!(cursors.last_applied(&ReplicaId::from("R2")), log.len() as u64);
        prop_assert_eq!(cursors.pending_len(), 0);
    }
}
