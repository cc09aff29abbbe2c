//! Configuration management.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GavelError, Result};
use crate::events::{Bid, ReplicaId};
use crate::replica::RetryPolicy;
use crate::telemetry::TelemetryConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The replica this process runs
    pub replica: ReplicaConfig,

    /// Control loop tuning
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Where events are stored
    #[serde(default)]
    pub journal: JournalConfig,

    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Identity and auction parameters of one replica.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaConfig {
    /// Name of the auction (the replicated entity)
    #[serde(default = "default_auction_name")]
    pub auction_name: String,

    /// This replica
    pub replica_id: ReplicaId,

    /// Every replica of the auction, including this one
    pub all_replicas: BTreeSet<ReplicaId>,

    /// Exactly one replica should decide the winner
    #[serde(default)]
    pub responsible_for_closing: bool,

    /// When this replica stops accepting bids
    pub closing_at: DateTime<Utc>,

    /// Seed bid the auction starts from
    pub initial_bid: Bid,
}

impl ReplicaConfig {
    /// Check the replica set is usable.
    pub fn validate(&self) -> Result<()> {
        if self.all_replicas.is_empty() {
            return Err(GavelError::configuration("all_replicas must not be empty"));
        }
        if !self.all_replicas.contains(&self.replica_id) {
            return Err(GavelError::configuration(format!(
                "replica {} is not listed in all_replicas",
                self.replica_id
            )));
        }
        Ok(())
    }

    /// Replicas other than this one.
    pub fn remote_replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.all_replicas
            .iter()
            .filter(move |r| **r != self.replica_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Bounded mailbox size for commands and replicated events
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Upper bound on a single journal append
    #[serde(default = "default_append_timeout", with = "humantime_serde")]
    pub append_timeout: Duration,

    /// Delay before re-subscribing to a remote feed that ended
    #[serde(default = "default_resubscribe_delay", with = "humantime_serde")]
    pub resubscribe_delay: Duration,

    /// Retry policy for failed appends
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            append_timeout: default_append_timeout(),
            resubscribe_delay: default_resubscribe_delay(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(GavelError::configuration("mailbox_capacity must be positive"));
        }
        if self.append_timeout.is_zero() {
            return Err(GavelError::configuration("append_timeout must be positive"));
        }
        Ok(())
    }
}

/// Storage backend for the event journal.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalKind {
    /// Process-local, lost on exit
    #[default]
    Memory,
    /// JSON-lines files in a shared directory
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub kind: JournalKind,

    /// Directory holding one log file per replica (file journal only)
    pub directory: Option<PathBuf>,

    /// How often remote log files are polled for new events
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            kind: JournalKind::default(),
            directory: None,
            poll_interval: default_poll_interval(),
        }
    }
}

/// `GAVEL__SECTION__KEY` variables; `replica.all_replicas` is a comma-separated list.
fn environment() -> config::Environment {
    config::Environment::with_prefix("GAVEL")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("replica.all_replicas")
        .try_parsing(true)
}

// Default value functions
fn default_auction_name() -> String { "auction".to_string() }
fn default_mailbox_capacity() -> usize { 256 }
fn default_append_timeout() -> Duration { Duration::from_secs(5) }
fn default_resubscribe_delay() -> Duration { Duration::from_millis(200) }
fn default_poll_interval() -> Duration { Duration::from_millis(100) }

impl Config {
    /// Load configuration from the environment (`GAVEL__REPLICA__REPLICA_ID`, ...).
    pub fn load() -> Result<Self> {
        Self::build(None, environment())
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::build(Some(path), environment())
    }

    fn build(path: Option<&str>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder.add_source(env).build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.replica.validate()?;
        self.coordinator.validate()?;
        if self.journal.kind == JournalKind::File && self.journal.directory.is_none() {
            return Err(GavelError::configuration(
                "journal.directory is required for the file journal",
            ));
        }
        Ok(())
    }
}
