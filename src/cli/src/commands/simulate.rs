//! Simulate a replicated auction in one process.
//!
//! Starts N replicas on a shared in-memory cluster, routes bids to the
//! replicas they name, finishes the auction and prints every replica's
//! final view.

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Args;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use gavel_core::config::{CoordinatorConfig, ReplicaConfig};
use gavel_core::events::{Bid, ReplicaId};
use gavel_core::journal::InMemoryCluster;
use gavel_core::replica::{Replica, ReplicaHandle, Response, SystemClock};

use crate::output::{self, EventRow, OutputFormat, StateRow};

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of replicas (named R1, R2, ...); R1 decides the winner
    #[arg(short, long, default_value = "3")]
    replicas: usize,

    /// Bid to place, as REPLICA:BIDDER:OFFER (repeatable)
    #[arg(short, long = "bid")]
    bids: Vec<BidSpec>,

    /// Replica that finishes the auction
    #[arg(long, default_value = "R1")]
    finish_at: String,

    /// Opening offer of the auction
    #[arg(long, default_value = "0")]
    opening_offer: u64,

    /// Milliseconds to wait for the replicas to converge
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Also print every replica's event log
    #[arg(long)]
    show_events: bool,
}

/// A bid routed to a named replica.
#[derive(Debug, Clone)]
pub struct BidSpec {
    replica: String,
    bidder: String,
    offer: u64,
}

impl FromStr for BidSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(replica), Some(bidder), Some(offer)) if !replica.is_empty() && !bidder.is_empty() => {
                let offer = offer
                    .parse()
                    .map_err(|_| format!("invalid offer '{}' in '{}'", offer, s))?;
                Ok(Self {
                    replica: replica.to_string(),
                    bidder: bidder.to_string(),
                    offer,
                })
            }
            _ => Err(format!("expected REPLICA:BIDDER:OFFER, got '{}'", s)),
        }
    }
}

pub async fn execute(args: SimulateArgs, format: OutputFormat) -> Result<()> {
    if args.replicas == 0 {
        bail!("at least one replica is required");
    }

    let ids: Vec<ReplicaId> = (1..=args.replicas)
        .map(|i| ReplicaId::new(format!("R{}", i)))
        .collect();
    let timeout = Duration::from_millis(args.timeout_ms);
    let cluster = InMemoryCluster::new();
    let opening = Bid::new("opening", args.opening_offer, Utc::now(), ids[0].clone());

    let mut handles = Vec::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        let config = ReplicaConfig {
            auction_name: "simulation".to_string(),
            replica_id: id.clone(),
            all_replicas: ids.iter().cloned().collect(),
            responsible_for_closing: index == 0,
            closing_at: Utc::now() + ChronoDuration::hours(1),
            initial_bid: opening.clone(),
        };
        let handle = Replica::spawn(
            config,
            CoordinatorConfig::default(),
            Arc::new(cluster.journal(id.clone())),
            Arc::new(SystemClock),
        )
        .await
        .with_context(|| format!("failed to start replica {}", id))?;
        handles.push(handle);
    }

    let result = run(&args, &ids, &handles, timeout).await;

    if result.is_ok() {
        let rows: Vec<StateRow> = handles
            .iter()
            .map(|h| StateRow::new(h.replica_id(), &h.state()))
            .collect();
        output::print_list(&rows, format)?;

        if args.show_events {
            for id in &ids {
                output::print_header(&format!("Log of {}", id));
                let events: Vec<EventRow> = cluster.events(id).iter().map(EventRow::new).collect();
                output::print_list(&events, format)?;
            }
        }
    }

    for handle in &handles {
        handle.shutdown().await;
    }
    result
}

async fn run(
    args: &SimulateArgs,
    ids: &[ReplicaId],
    handles: &[ReplicaHandle],
    timeout: Duration,
) -> Result<()> {
    for spec in &args.bids {
        let replica = find(ids, handles, &spec.replica)?;
        match replica.offer_bid(spec.bidder.clone(), spec.offer).await? {
            Response::Accepted => {}
            other => output::print_info(&format!(
                "{} bid {} at {}: {:?}",
                spec.bidder, spec.offer, spec.replica, other
            )),
        }
    }

    find(ids, handles, &args.finish_at)?.finish().await?;

    for handle in handles {
        handle
            .wait_until(|s| s.is_closed(), timeout)
            .await
            .with_context(|| format!("replica {} did not close", handle.replica_id()))?;
    }

    output::print_success(&format!("All {} replicas closed", handles.len()));
    Ok(())
}

fn find<'a>(ids: &[ReplicaId], handles: &'a [ReplicaHandle], name: &str) -> Result<&'a ReplicaHandle> {
    ids.iter()
        .position(|id| id.as_str() == name)
        .map(|i| &handles[i])
        .with_context(|| format!("unknown replica '{}'", name))
}
