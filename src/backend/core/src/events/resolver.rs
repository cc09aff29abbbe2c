//! Deterministic conflict resolution between concurrent bids.
//!
//! Replicas accept bids independently, so two replicas may observe the same
//! set of bids in different orders. Every replica must still pick the same
//! winner, which requires a strict total order that depends only on the
//! fields of the bids being compared:
//!
//! 1. higher `offer` wins
//! 2. on equal offers, the earlier `timestamp` wins
//! 3. on equal timestamps, the lexicographically lower origin replica wins

use std::cmp::Ordering;

use super::event::Bid;

/// Compare two bids by priority. `Ordering::Greater` means `a` outranks `b`.
pub fn compare_bids(a: &Bid, b: &Bid) -> Ordering {
    a.offer
        .cmp(&b.offer)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.origin_replica.cmp(&a.origin_replica))
}

/// Whether `first` takes precedence over `second`.
///
/// Two bids that agree on offer, timestamp and origin are the same bid as far
/// as ranking goes, and neither is higher.
pub fn is_higher_bid(first: &Bid, second: &Bid) -> bool {
    compare_bids(first, second) == Ordering::Greater
}

/// The highest-priority bid of a collection, if any.
pub fn highest_of<'a, I>(bids: I) -> Option<&'a Bid>
where
    I: IntoIterator<Item = &'a Bid>,
{
    bids.into_iter().max_by(|a, b| compare_bids(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::ReplicaId;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn bid(offer: u64, millis: i64, origin: &str) -> Bid {
        Bid::new("bidder", offer, at(millis), ReplicaId::from(origin))
    }

    #[test]
    fn test_higher_offer_wins() {
        let high = bid(200, 10, "R2");
        let low = bid(100, 1, "R1");
        assert!(is_higher_bid(&high, &low));
        assert!(!is_higher_bid(&low, &high));
    }

    #[test]
    fn test_earlier_timestamp_wins_on_equal_offer() {
        let early = bid(100, 1, "R2");
        let late = bid(100, 2, "R1");
        assert!(is_higher_bid(&early, &late));
        assert!(!is_higher_bid(&late, &early));
    }

    #[test]
    fn test_lower_replica_wins_on_equal_offer_and_timestamp() {
        let r1 = bid(100, 5, "R1");
        let r2 = bid(100, 5, "R2");
        assert!(is_higher_bid(&r1, &r2));
        assert!(!is_higher_bid(&r2, &r1));
    }

    #[test]
    fn test_identical_bids_do_not_outrank_each_other() {
        let a = bid(100, 5, "R1");
        assert!(!is_higher_bid(&a, &a.clone()));
    }

    #[test]
    fn test_highest_of_is_order_independent() {
        let bids = vec![bid(5, 3, "R2"), bid(7, 9, "R1"), bid(7, 4, "R3"), bid(1, 0, "R1")];
        let mut reversed = bids.clone();
        reversed.reverse();

        let forward = highest_of(&bids).unwrap();
        let backward = highest_of(&reversed).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.offer, 7);
        assert_eq!(forward.timestamp, at(4));
    }

    // Small ranges so equal offers and timestamps come up often
    fn arb_bid() -> impl Strategy<Value = Bid> {
        (0u64..8, 0i64..4, prop::sample::select(vec!["R1", "R2", "R3"]))
            .prop_map(|(offer, millis, origin)| bid(offer, millis, origin))
    }

    proptest! {
        #[test]
        fn prop_exactly_one_of_two_distinct_bids_wins(a in arb_bid(), b in arb_bid()) {
            prop_assume!(a != b);
            prop_assert!(is_higher_bid(&a, &b) ^ is_higher_bid(&b, &a));
        }

        #[test]
        fn prop_ranking_is_transitive(a in arb_bid(), b in arb_bid(), c in arb_bid()) {
            if is_higher_bid(&a, &b) && is_higher_bid(&b, &c) {
                prop_assert!(is_higher_bid(&a, &c));
            }
        }

        #[test]
        fn prop_highest_of_outranks_every_other_bid(bids in prop::collection::vec(arb_bid(), 1..10)) {
            let highest = highest_of(&bids).unwrap();
            prop_assert!(bids.iter().all(|b| b == highest || is_higher_bid(highest, b)));
        }
    }
}
