//! Output formatting utilities for the Gavel CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use gavel_core::events::{AuctionState, ReplicaId};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

/// Print a success message to stdout.
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print an informational message to stdout.
pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print a list of items in the requested format.
///
/// For table output, items must implement `Tabled`. For JSON/YAML, items must
/// implement `Serialize`.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return Ok(());
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(items)?),
    }
    Ok(())
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

// ── Rows ────────────────────────────────────────────────────────────────────

/// One replica's view of the auction.
#[derive(Debug, Serialize, Tabled)]
pub struct StateRow {
    #[tabled(rename = "Replica")]
    pub replica: String,
    #[tabled(rename = "Phase")]
    pub phase: String,
    #[tabled(rename = "Leader")]
    pub bidder: String,
    #[tabled(rename = "Offer")]
    pub offer: u64,
    #[tabled(rename = "Price")]
    pub price: u64,
    #[tabled(rename = "Finished At")]
    pub finished_at: String,
}

impl StateRow {
    pub fn new(replica: &ReplicaId, state: &AuctionState) -> Self {
        Self {
            replica: replica.to_string(),
            phase: state.phase().to_string(),
            bidder: state.highest_bid().bidder.clone(),
            offer: state.highest_bid().offer,
            price: state.highest_counter_offer(),
            finished_at: state
                .finished_at()
                .iter()
                .map(ReplicaId::as_str)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// One persisted event.
#[derive(Debug, Serialize, Tabled)]
pub struct EventRow {
    #[tabled(rename = "Origin")]
    pub origin: String,
    #[tabled(rename = "Seq")]
    pub sequence: u64,
    #[tabled(rename = "Recorded At")]
    pub recorded_at: String,
    #[tabled(rename = "Event")]
    pub event_type: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
}

impl EventRow {
    pub fn new(envelope: &gavel_core::events::EventEnvelope) -> Self {
        use gavel_core::events::AuctionEvent;

        let detail = match &envelope.event {
            AuctionEvent::BidRegistered { bid } => format!("{} offers {}", bid.bidder, bid.offer),
            AuctionEvent::AuctionFinished { at_replica } => format!("finished at {}", at_replica),
            AuctionEvent::WinnerDecided {
                winning_bid,
                amount,
                ..
            } => format!("{} wins, pays {}", winning_bid.bidder, amount),
        };

        Self {
            origin: envelope.origin.to_string(),
            sequence: envelope.sequence,
            recorded_at: envelope.recorded_at.to_rfc3339(),
            event_type: envelope.event_type().to_string(),
            detail,
        }
    }
}
