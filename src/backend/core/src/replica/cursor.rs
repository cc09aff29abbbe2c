//! Per-origin delivery cursors for replicated events.
//!
//! Remote feeds are at-least-once and may deliver out of order. Events of one
//! origin must still be folded in the order they were appended there, so each
//! origin has a cursor (last applied sequence) and a buffer of events that
//! arrived ahead of a gap.

use std::collections::{BTreeMap, HashMap};

use crate::events::{EventEnvelope, ReplicaId};

/// Outcome of offering one remote event to the cursors.
#[derive(Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Already applied.
    Duplicate,
    /// Held back until the missing earlier events arrive.
    Buffered,
    /// These events, in order, are now contiguous and must be applied.
    Ready(Vec<EventEnvelope>),
}

#[derive(Debug, Default)]
pub struct RemoteCursors {
    applied: HashMap<ReplicaId, u64>,
    pending: HashMap<ReplicaId, BTreeMap<u64, EventEnvelope>>,
}

impl RemoteCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last applied sequence of `origin` (0 if none).
    pub fn last_applied(&self, origin: &ReplicaId) -> u64 {
        self.applied.get(origin).copied().unwrap_or(0)
    }

    /// Snapshot of every origin's cursor.
    pub fn positions(&self) -> HashMap<ReplicaId, u64> {
        self.applied.clone()
    }

    /// Number of buffered events across all origins.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    pub fn accept(&mut self, envelope: EventEnvelope) -> Ingest {
        let origin = envelope.origin.clone();
        let last = self.last_applied(&origin);

        if envelope.sequence <= last {
            return Ingest::Duplicate;
        }

        let pending = self.pending.entry(origin.clone()).or_default();
        if envelope.sequence > last + 1 {
            if pending.contains_key(&envelope.sequence) {
                return Ingest::Duplicate;
            }
            pending.insert(envelope.sequence, envelope);
            return Ingest::Buffered;
        }

        let mut ready = vec![envelope];
        let mut next = last + 2;
        while let Some(buffered) = pending.remove(&next) {
            ready.push(buffered);
            next += 1;
        }
        if pending.is_empty() {
            self.pending.remove(&origin);
        }

        self.applied.insert(origin, next - 1);
        Ingest::Ready(ready)
    }
}
