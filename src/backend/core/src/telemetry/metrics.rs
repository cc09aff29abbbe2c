//! Metric names and recording helpers.
//!
//! Gavel records through the `metrics` facade only; installing an exporter
//! (Prometheus, StatsD, ...) is left to the host process.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::events::{AuctionEvent, ReplicaId};

/// Events folded into a replica's state, labelled by origin and kind.
pub const EVENTS_APPLIED_TOTAL: &str = "gavel_events_applied_total";
/// Commands handled by a replica, labelled by command and outcome.
pub const COMMANDS_TOTAL: &str = "gavel_commands_total";
/// Append attempts that failed and were retried.
pub const APPEND_RETRIES_TOTAL: &str = "gavel_append_retries_total";
/// Remote envelopes dropped as duplicates.
pub const DUPLICATES_DROPPED_TOTAL: &str = "gavel_remote_duplicates_total";
/// Remote envelopes currently buffered waiting for a sequence gap to close.
pub const PENDING_REMOTE_EVENTS: &str = "gavel_remote_pending_events";
/// Errors constructed, labelled by code.
pub const ERRORS_TOTAL: &str = "gavel_errors_total";

/// Register descriptions for all Gavel metrics with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(EVENTS_APPLIED_TOTAL, "Events folded into replica state");
    describe_counter!(COMMANDS_TOTAL, "Commands handled by replicas");
    describe_counter!(APPEND_RETRIES_TOTAL, "Journal appends that were retried");
    describe_counter!(
        DUPLICATES_DROPPED_TOTAL,
        "Replicated events dropped as already applied"
    );
    describe_gauge!(
        PENDING_REMOTE_EVENTS,
        "Replicated events buffered behind a sequence gap"
    );
    describe_counter!(ERRORS_TOTAL, "Errors raised by the engine");
}

pub(crate) fn record_event_applied(replica: &ReplicaId, origin: &ReplicaId, event: &AuctionEvent) {
    counter!(
        EVENTS_APPLIED_TOTAL,
        "replica" => replica.to_string(),
        "origin" => origin.to_string(),
        "event_type" => event.event_type(),
    )
    .increment(1);
}

pub(crate) fn record_command(replica: &ReplicaId, command: &'static str, outcome: &'static str) {
    counter!(
        COMMANDS_TOTAL,
        "replica" => replica.to_string(),
        "command" => command,
        "outcome" => outcome,
    )
    .increment(1);
}

pub(crate) fn record_append_retry(replica: &ReplicaId) {
    counter!(APPEND_RETRIES_TOTAL, "replica" => replica.to_string()).increment(1);
}

pub(crate) fn record_duplicate(replica: &ReplicaId, origin: &ReplicaId) {
    counter!(
        DUPLICATES_DROPPED_TOTAL,
        "replica" => replica.to_string(),
        "origin" => origin.to_string(),
    )
    .increment(1);
}

pub(crate) fn set_pending_remote(replica: &ReplicaId, pending: usize) {
    gauge!(PENDING_REMOTE_EVENTS, "replica" => replica.to_string()).set(pending as f64);
}
