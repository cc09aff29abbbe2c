//! Fold a file journal directory and show what a replica would recover.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::Args;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gavel_core::config::ReplicaConfig;
use gavel_core::events::{Bid, ReplicaId};
use gavel_core::journal::{EventJournal, FileJournal};
use gavel_core::replica::recover;

use crate::output::{self, EventRow, OutputFormat, StateRow};

#[derive(Args)]
pub struct ReplayArgs {
    /// Directory holding the replicas' `.jsonl` logs
    #[arg(short, long)]
    dir: PathBuf,

    /// Replica whose view to rebuild
    #[arg(short, long)]
    replica: String,

    /// All replicas of the auction (default: every log in the directory)
    #[arg(long, value_delimiter = ',')]
    replicas: Vec<String>,

    /// Opening offer the auction was started with
    #[arg(long, default_value = "0")]
    opening_offer: u64,

    /// Also print the replayed events
    #[arg(long)]
    show_events: bool,
}

pub async fn execute(args: ReplayArgs, format: OutputFormat) -> Result<()> {
    if !args.dir.is_dir() {
        bail!("{} is not a directory", args.dir.display());
    }

    let local = ReplicaId::new(args.replica.clone());
    let mut all_replicas: BTreeSet<ReplicaId> = if args.replicas.is_empty() {
        discover_replicas(&args.dir)?
    } else {
        args.replicas.iter().map(|r| ReplicaId::new(r.clone())).collect()
    };
    all_replicas.insert(local.clone());

    let first = all_replicas.iter().next().cloned().unwrap_or_else(|| local.clone());
    let opening_time = Utc.timestamp_millis_opt(0).single().unwrap_or_else(Utc::now);
    let config = ReplicaConfig {
        auction_name: "replay".to_string(),
        replica_id: local.clone(),
        all_replicas: all_replicas.clone(),
        responsible_for_closing: false,
        closing_at: Utc::now(),
        initial_bid: Bid::new("opening", args.opening_offer, opening_time, first),
    };

    let journal = FileJournal::open(&args.dir, local.clone(), Duration::from_millis(100)).await?;
    let recovered = recover(&journal, &config)
        .await
        .with_context(|| format!("failed to replay {}", args.dir.display()))?;

    output::print_list(&[StateRow::new(&local, &recovered.state)], format)?;

    if args.show_events {
        let mut rows = Vec::new();
        for replica in &all_replicas {
            let events = if *replica == local {
                journal.replay_local().await?
            } else {
                journal.replay_remote(replica).await?
            };
            rows.extend(events.iter().map(EventRow::new));
        }
        output::print_header("Events");
        output::print_list(&rows, format)?;
    }

    Ok(())
}

/// Replica ids from the `<id>.jsonl` files in `dir`.
fn discover_replicas(dir: &Path) -> Result<BTreeSet<ReplicaId>> {
    let mut replicas = BTreeSet::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            replicas.insert(ReplicaId::from(stem));
        }
    }
    Ok(replicas)
}
