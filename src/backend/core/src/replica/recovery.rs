//! Recovery driver.
//!
//! Rebuilds a replica's state on startup from its own log and from whatever
//! the remote logs already hold. No triggers fire while replaying; the
//! termination condition is checked once at the end instead.

use chrono::{DateTime, Utc};
use tracing::instrument;

use super::cursor::{Ingest, RemoteCursors};
use crate::config::ReplicaConfig;
use crate::error::{GavelError, Result};
use crate::events::{Aggregate, AuctionState, EventEnvelope};
use crate::journal::EventJournal;

/// Everything the coordinator needs to resume where the replica left off.
#[derive(Debug)]
pub struct Recovered {
    pub state: AuctionState,
    /// Last sequence of the local log
    pub local_sequence: u64,
    /// Last applied sequence per remote origin
    pub cursors: RemoteCursors,
    /// Latest logical timestamp the local replica issued before the restart
    pub last_local_timestamp: Option<DateTime<Utc>>,
    /// The termination condition held once replay finished
    pub should_close: bool,
}

/// Whether `config`'s replica should decide the winner in `state`.
pub fn should_close(state: &AuctionState, config: &ReplicaConfig) -> bool {
    config.responsible_for_closing
        && !state.is_closed()
        && state.all_finished(&config.all_replicas)
}

#[instrument(skip(journal, config), fields(replica = %config.replica_id))]
pub async fn recover(journal: &dyn EventJournal, config: &ReplicaConfig) -> Result<Recovered> {
    let mut state = AuctionState::new(config.initial_bid.clone());

    let local = journal.replay_local().await?;
    verify_local_log(&local, config)?;

    let local_sequence = local.last().map(|e| e.sequence).unwrap_or(0);
    let last_local_timestamp = local.iter().map(|e| e.recorded_at).max();
    for envelope in &local {
        state.apply(&envelope.event);
    }

    let mut cursors = RemoteCursors::new();
    let mut remote_applied = 0usize;
    for origin in config.remote_replicas() {
        for envelope in journal.replay_remote(origin).await? {
            if envelope.origin != *origin {
                return Err(GavelError::malformed_event(
                    format!("{}#{}", origin, envelope.sequence),
                    format!("event originates at {}", envelope.origin),
                ));
            }
            if let Ingest::Ready(events) = cursors.accept(envelope) {
                for event in &events {
                    state.apply(&event.event);
                }
                remote_applied += events.len();
            }
        }
    }

    let should_close = should_close(&state, config);

    tracing::info!(
        local_events = local.len(),
        remote_events = remote_applied,
        phase = %state.phase(),
        highest_offer = state.highest_bid().offer,
        should_close,
        "Recovery completed"
    );

    Ok(Recovered {
        state,
        local_sequence,
        cursors,
        last_local_timestamp,
        should_close,
    })
}

/// The local log must hold only local events, numbered 1, 2, 3, ...
fn verify_local_log(events: &[EventEnvelope], config: &ReplicaConfig) -> Result<()> {
    for (index, envelope) in events.iter().enumerate() {
        let expected = index as u64 + 1;
        if envelope.origin != config.replica_id {
            return Err(GavelError::malformed_event(
                format!("{}#{}", config.replica_id, envelope.sequence),
                format!("local log holds an event of {}", envelope.origin),
            ));
        }
        if envelope.sequence != expected {
            return Err(GavelError::malformed_event(
                format!("{}#{}", config.replica_id, envelope.sequence),
                format!("expected sequence {}", expected),
            ));
        }
    }
    Ok(())
}
