//! Run one replica from a configuration file.
//!
//! Replicas in separate processes share a file journal directory; each
//! process runs one replica and follows the others' logs.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use gavel_core::config::{Config, JournalKind};
use gavel_core::journal::{EventJournal, FileJournal, InMemoryCluster};
use gavel_core::replica::{Replica, SystemClock};
use gavel_core::telemetry::init_telemetry;

use crate::output::{self, OutputFormat, StateRow};

#[derive(Args)]
pub struct RunArgs {
    /// Configuration file (TOML, YAML or JSON); environment only if omitted
    #[arg(short, long, env = "GAVEL_CONFIG")]
    config: Option<PathBuf>,

    /// Bid to place on startup, as BIDDER:OFFER (repeatable)
    #[arg(short, long = "bid")]
    bids: Vec<String>,

    /// Stop once the winner has been decided
    #[arg(long)]
    exit_on_close: bool,
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            let path = path.to_str().context("configuration path is not valid UTF-8")?;
            Config::from_file(path)?
        }
        None => Config::load()?,
    };

    init_telemetry(&config.telemetry)?;

    let replica_id = config.replica.replica_id.clone();
    let journal: Arc<dyn EventJournal> = match config.journal.kind {
        JournalKind::Memory => Arc::new(InMemoryCluster::new().journal(replica_id.clone())),
        JournalKind::File => {
            let directory = config
                .journal
                .directory
                .clone()
                .context("journal.directory is required for the file journal")?;
            Arc::new(FileJournal::open(directory, replica_id.clone(), config.journal.poll_interval).await?)
        }
    };

    let handle = Replica::spawn(config.replica, config.coordinator, journal, Arc::new(SystemClock)).await?;
    output::print_success(&format!("Replica {} running", replica_id));

    for bid in &args.bids {
        let (bidder, offer) = bid
            .rsplit_once(':')
            .with_context(|| format!("expected BIDDER:OFFER, got '{}'", bid))?;
        let offer: u64 = offer
            .parse()
            .with_context(|| format!("invalid offer in '{}'", bid))?;
        let response = handle.offer_bid(bidder, offer).await?;
        output::print_info(&format!("{} offers {}: {:?}", bidder, offer, response));
    }

    let mut states = handle.subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                tracing::info!(
                    phase = %state.phase(),
                    highest_offer = state.highest_bid().offer,
                    price = state.highest_counter_offer(),
                    "State changed"
                );
                if args.exit_on_close && state.is_closed() {
                    break;
                }
            }
        }
    }

    output::print_list(&[StateRow::new(&replica_id, &handle.state())], format)?;
    handle.shutdown().await;
    Ok(())
}
