//! In-memory journals.
//!
//! An `InMemoryCluster` holds the logs of every replica in one process. Each
//! replica gets an `InMemoryJournal` handle from the cluster; appends go to
//! that replica's segment and are broadcast to anyone following it.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::instrument;

use super::EventJournal;
use crate::error::{GavelError, Result};
use crate::events::{EventEnvelope, ReplicaId};

/// Live feed buffer per replica; slower followers are dropped and re-subscribe.
const DEFAULT_FEED_CAPACITY: usize = 1024;

/// One replica's log.
struct Segment {
    events: RwLock<Vec<EventEnvelope>>,
    feed: broadcast::Sender<EventEnvelope>,
}

impl Segment {
    fn new(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        Self {
            events: RwLock::new(Vec::new()),
            feed,
        }
    }
}

/// The logs of every replica of a process-local cluster.
#[derive(Clone)]
pub struct InMemoryCluster {
    segments: Arc<DashMap<ReplicaId, Arc<Segment>>>,
    feed_capacity: usize,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(feed_capacity: usize) -> Self {
        Self {
            segments: Arc::new(DashMap::new()),
            feed_capacity: feed_capacity.max(1),
        }
    }

    /// A journal handle writing to the log of `replica`.
    pub fn journal(&self, replica: ReplicaId) -> InMemoryJournal {
        InMemoryJournal {
            replica,
            cluster: self.clone(),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Snapshot of the log of `replica`.
    pub fn events(&self, replica: &ReplicaId) -> Vec<EventEnvelope> {
        self.segment(replica).events.read().clone()
    }

    fn segment(&self, replica: &ReplicaId) -> Arc<Segment> {
        self.segments
            .entry(replica.clone())
            .or_insert_with(|| Arc::new(Segment::new(self.feed_capacity)))
            .clone()
    }
}

/// Injected append failures, shared by clones of a journal handle.
#[derive(Default)]
struct Faults {
    failing_appends: AtomicU32,
    append_delay: Mutex<Option<Duration>>,
}

/// Journal handle bound to one replica of an `InMemoryCluster`.
#[derive(Clone)]
pub struct InMemoryJournal {
    replica: ReplicaId,
    cluster: InMemoryCluster,
    faults: Arc<Faults>,
}

impl InMemoryJournal {
    /// Make the next `count` appends fail with a retryable error.
    pub fn fail_next_appends(&self, count: u32) {
        self.faults.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Delay every subsequent append by `delay`; `None` removes the delay.
    pub fn delay_appends(&self, delay: Option<Duration>) {
        *self.faults.append_delay.lock() = delay;
    }

    fn take_failure(&self) -> bool {
        self.faults
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventJournal for InMemoryJournal {
    fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    #[instrument(skip(self, envelope), fields(replica = %self.replica, sequence = envelope.sequence))]
    async fn append(&self, envelope: &EventEnvelope) -> Result<()> {
        let delay = *self.faults.append_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure() {
            return Err(GavelError::append_failed(format!(
                "injected failure appending to {}",
                self.replica
            )));
        }

        if envelope.origin != self.replica {
            return Err(GavelError::internal(format!(
                "journal of {} cannot append an event originating at {}",
                self.replica, envelope.origin
            )));
        }

        let segment = self.cluster.segment(&self.replica);
        let mut events = segment.events.write();
        if events.last().map(|e| e.event_id) == Some(envelope.event_id)
            && envelope.sequence == events.len() as u64
        {
            tracing::debug!("Event already stored");
            return Ok(());
        }

        let expected = events.len() as u64 + 1;
        if envelope.sequence != expected {
            return Err(GavelError::sequence_conflict(
                &self.replica,
                expected,
                envelope.sequence,
            ));
        }

        events.push(envelope.clone());
        // No followers is fine
        let _ = segment.feed.send(envelope.clone());

        tracing::debug!(event_type = envelope.event_type(), "Event appended");
        Ok(())
    }

    async fn replay_local(&self) -> Result<Vec<EventEnvelope>> {
        Ok(self.cluster.events(&self.replica))
    }

    async fn replay_remote(&self, origin: &ReplicaId) -> Result<Vec<EventEnvelope>> {
        Ok(self.cluster.events(origin))
    }

    fn subscribe_remote(&self, origin: &ReplicaId, after: u64) -> BoxStream<'static, EventEnvelope> {
        let segment = self.cluster.segment(origin);

        // Subscribe before taking the backlog so nothing falls in between
        let receiver = segment.feed.subscribe();
        let backlog: Vec<EventEnvelope> = segment
            .events
            .read()
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect();
        let last_in_backlog = backlog.last().map(|e| e.sequence).unwrap_or(after);

        let live = BroadcastStream::new(receiver)
            .take_while(|item| future::ready(item.is_ok()))
            .filter_map(move |item| {
                future::ready(item.ok().filter(|e| e.sequence > last_in_backlog))
            });

        stream::iter(backlog).chain(live).boxed()
    }
}
