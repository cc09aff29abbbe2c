//! Event journals.
//!
//! Every replica owns one append-only log. A replica writes only to its own
//! log and reads the logs of the other replicas, either by replaying them
//! from the start or by following a live feed of newly appended events.
//!
//! - **`memory`**: Process-local logs shared through an `InMemoryCluster`.
//! - **`file`**: JSON-lines files, one per replica, in a shared directory.

pub mod file;
pub mod memory;

pub use file::FileJournal;
pub use memory::{InMemoryCluster, InMemoryJournal};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::events::{EventEnvelope, ReplicaId};

/// Durable, per-replica event log.
///
/// A journal handle is bound to one local replica. `append` writes to that
/// replica's log; the `*_remote` methods read the logs of other replicas.
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// The replica whose log `append` writes to.
    fn replica_id(&self) -> &ReplicaId;

    /// Durably append an event to the local log.
    ///
    /// The envelope's sequence must be exactly one past the last stored
    /// sequence; anything else is a `SequenceConflict`. Appending the envelope
    /// that is already the last stored record succeeds without storing it
    /// again, so an attempt that timed out after reaching storage can be
    /// retried.
    async fn append(&self, envelope: &EventEnvelope) -> Result<()>;

    /// Every event of the local log, in sequence order.
    async fn replay_local(&self) -> Result<Vec<EventEnvelope>>;

    /// Every event currently stored in the log of `origin`, in sequence order.
    async fn replay_remote(&self, origin: &ReplicaId) -> Result<Vec<EventEnvelope>>;

    /// Live feed of events appended to the log of `origin` with a sequence
    /// greater than `after`, starting with whatever is already stored.
    ///
    /// The stream may end (for example when the feed lags too far behind);
    /// callers re-subscribe from the last sequence they saw.
    fn subscribe_remote(&self, origin: &ReplicaId, after: u64) -> BoxStream<'static, EventEnvelope>;
}
