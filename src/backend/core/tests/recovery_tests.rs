//! Recovery and durable journal tests.
//!
//! Tests cover:
//! - Restarting a replica from its own log
//! - Closing on recovery when every replica already finished
//! - Catching up on remote events written while a replica was down
//! - Replicas running on the file journal
//! - Refusing to start on a corrupt log
//! - Retrying an append that reached disk before timing out

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::stream::BoxStream;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gavel_core::config::{CoordinatorConfig, ReplicaConfig};
use gavel_core::error::{ErrorCode, Result};
use gavel_core::events::{AuctionEvent, Bid, EventEnvelope, ReplicaId};
use gavel_core::journal::{EventJournal, FileJournal, InMemoryCluster};
use gavel_core::replica::{Replica, ReplicaHandle, Response, RetryPolicy, SystemClock};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

fn r(id: &str) -> ReplicaId {
    ReplicaId::from(id)
}

fn epoch(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn replica_config(local: &str, all: &[&str]) -> ReplicaConfig {
    ReplicaConfig {
        auction_name: "old-skis".to_string(),
        replica_id: r(local),
        all_replicas: all.iter().map(|id| r(id)).collect(),
        responsible_for_closing: local == all[0],
        closing_at: Utc::now() + ChronoDuration::hours(1),
        initial_bid: Bid::new("chbatey", 12, epoch(0), r(all[0])),
    }
}

fn settings() -> CoordinatorConfig {
    CoordinatorConfig {
        resubscribe_delay: Duration::from_millis(10),
        retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
        ..Default::default()
    }
}

async fn spawn_on(journal: Arc<dyn EventJournal>, local: &str, all: &[&str]) -> ReplicaHandle {
    Replica::spawn(replica_config(local, all), settings(), journal, Arc::new(SystemClock))
        .await
        .unwrap()
}

fn finished(origin: &str, sequence: u64) -> EventEnvelope {
    EventEnvelope::new(
        r(origin),
        sequence,
        epoch(1_000),
        AuctionEvent::AuctionFinished { at_replica: r(origin) },
    )
}

fn bid(origin: &str, sequence: u64, offer: u64) -> EventEnvelope {
    EventEnvelope::new(
        r(origin),
        sequence,
        epoch(500 + sequence as i64),
        AuctionEvent::BidRegistered {
            bid: Bid::new("bob", offer, epoch(500 + sequence as i64), r(origin)),
        },
    )
}

// ============================================================================
// In-memory recovery
// ============================================================================

#[tokio::test]
async fn test_restart_resumes_from_local_log() {
    let cluster = InMemoryCluster::new();
    let journal = Arc::new(cluster.journal(r("R1")));

    let first = spawn_on(journal.clone(), "R1", &["R1", "R2"]).await;
    first.offer_bid("alice", 100).await.unwrap();
    first.offer_bid("alice", 150).await.unwrap();
    let before = first.state();
    first.shutdown().await;

    let second = spawn_on(journal.clone(), "R1", &["R1", "R2"]).await;
    assert_eq!(second.state(), before);

    // New events continue the sequence and sort after replayed ones
    second.offer_bid("bob", 150).await.unwrap();
    let log = journal.replay_local().await.unwrap();
    assert_eq!(log.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(log[2].recorded_at > log[1].recorded_at);

    // Equal offer, later timestamp: the earlier bid keeps the lead
    let highest = second.highest_bid().await.unwrap();
    assert_eq!(highest.bidder, "alice");
    assert_eq!(second.state().highest_counter_offer(), 150);

    second.shutdown().await;
}

#[tokio::test]
async fn test_recovery_closes_when_all_finished() {
    let cluster = InMemoryCluster::new();
    let r1 = cluster.journal(r("R1"));
    let r2 = cluster.journal(r("R2"));
    r1.append(&bid("R1", 1, 80)).await.unwrap();
    r1.append(&finished("R1", 2)).await.unwrap();
    r2.append(&finished("R2", 1)).await.unwrap();

    let replica = spawn_on(Arc::new(r1.clone()), "R1", &["R1", "R2"]).await;
    let state = replica.wait_until(|s| s.is_closed(), WAIT).await.unwrap();
    assert_eq!(state.highest_bid().offer, 80);

    let log = r1.replay_local().await.unwrap();
    assert_eq!(log.last().map(|e| e.event_type()), Some("WinnerDecided"));

    replica.shutdown().await;
}

#[tokio::test]
async fn test_recovery_does_not_close_twice() {
    let cluster = InMemoryCluster::new();
    let r1 = cluster.journal(r("R1"));
    let r2 = cluster.journal(r("R2"));
    r1.append(&finished("R1", 1)).await.unwrap();
    r2.append(&finished("R2", 1)).await.unwrap();

    let replica = spawn_on(Arc::new(r1.clone()), "R1", &["R1", "R2"]).await;
    replica.wait_until(|s| s.is_closed(), WAIT).await.unwrap();
    replica.shutdown().await;

    let restarted = spawn_on(Arc::new(r1.clone()), "R1", &["R1", "R2"]).await;
    assert!(restarted.is_closed().await.unwrap());
    restarted.shutdown().await;

    let decisions = r1
        .replay_local()
        .await
        .unwrap()
        .iter()
        .filter(|e| e.event_type() == "WinnerDecided")
        .count();
    assert_eq!(decisions, 1);
}

#[tokio::test]
async fn test_restarting_closed_replica_appends_nothing() {
    let cluster = InMemoryCluster::new();
    let journal = cluster.journal(r("R1"));
    let mut config = replica_config("R1", &["R1"]);
    config.closing_at = Utc::now() - ChronoDuration::hours(1);

    let replica = Replica::spawn(config.clone(), settings(), Arc::new(journal.clone()), Arc::new(SystemClock))
        .await
        .unwrap();
    replica.wait_until(|s| s.is_closed(), WAIT).await.unwrap();
    replica.shutdown().await;
    let before = journal.replay_local().await.unwrap().len();

    let restarted = Replica::spawn(config, settings(), Arc::new(journal.clone()), Arc::new(SystemClock))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(restarted.is_closed().await.unwrap());
    restarted.shutdown().await;

    assert_eq!(journal.replay_local().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_remote_events_written_while_down_are_caught_up() {
    let cluster = InMemoryCluster::new();
    let r2 = cluster.journal(r("R2"));
    r2.append(&bid("R2", 1, 40)).await.unwrap();
    r2.append(&bid("R2", 2, 90)).await.unwrap();

    let replica = spawn_on(Arc::new(cluster.journal(r("R1"))), "R1", &["R1", "R2"]).await;
    assert_eq!(replica.state().highest_bid().offer, 90);

    // Live events continue after the recovered cursor without duplicates
    r2.append(&bid("R2", 3, 60)).await.unwrap();
    let state = replica
        .wait_until(|s| s.highest_counter_offer() == 60, WAIT)
        .await
        .unwrap();
    assert_eq!(state.highest_bid().offer, 90);

    replica.shutdown().await;
}

// ============================================================================
// File journal
// ============================================================================

async fn file_journal(dir: &std::path::Path, replica: &str) -> Arc<FileJournal> {
    Arc::new(
        FileJournal::open(dir, r(replica), Duration::from_millis(10))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_replicas_converge_over_file_journal() {
    let dir = tempfile::tempdir().unwrap();
    let all = ["R1", "R2"];

    let r1 = spawn_on(file_journal(dir.path(), "R1").await, "R1", &all).await;
    let r2 = spawn_on(file_journal(dir.path(), "R2").await, "R2", &all).await;

    r1.offer_bid("alice", 100).await.unwrap();
    r2.offer_bid("bob", 120).await.unwrap();
    r2.finish().await.unwrap();

    for replica in [&r1, &r2] {
        let state = replica.wait_until(|s| s.is_closed(), WAIT).await.unwrap();
        assert_eq!(state.highest_bid().bidder, "bob");
        assert_eq!(state.highest_counter_offer(), 100);
    }

    r1.shutdown().await;
    r2.shutdown().await;

    // A restarted replica reads the same outcome back from disk
    let restarted = spawn_on(file_journal(dir.path(), "R2").await, "R2", &all).await;
    assert!(restarted.is_closed().await.unwrap());
    assert_eq!(restarted.highest_bid().await.unwrap().offer, 120);
    assert!(restarted.offer_bid("carol", 500).await.unwrap().is_rejected());
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_local_log_prevents_start() {
    let dir = tempfile::tempdir().unwrap();
    let journal = file_journal(dir.path(), "R1").await;
    journal.append(&bid("R1", 1, 40)).await.unwrap();

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(journal.log_path(&r("R1")))
        .unwrap();
    writeln!(file, "this is not json").unwrap();

    let result = Replica::spawn(
        replica_config("R1", &["R1"]),
        settings(),
        journal,
        Arc::new(SystemClock),
    )
    .await;

    assert_eq!(result.err().map(|e| e.code()), Some(ErrorCode::MalformedEvent));
}

/// File journal whose first appends hang after the record is on disk.
struct StallAfterWrite {
    inner: Arc<FileJournal>,
    stalls: AtomicU32,
    stall: Duration,
}

#[async_trait]
impl EventJournal for StallAfterWrite {
    fn replica_id(&self) -> &ReplicaId {
        self.inner.replica_id()
    }

    async fn append(&self, envelope: &EventEnvelope) -> Result<()> {
        self.inner.append(envelope).await?;
        if self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tokio::time::sleep(self.stall).await;
        }
        Ok(())
    }

    async fn replay_local(&self) -> Result<Vec<EventEnvelope>> {
        self.inner.replay_local().await
    }

    async fn replay_remote(&self, origin: &ReplicaId) -> Result<Vec<EventEnvelope>> {
        self.inner.replay_remote(origin).await
    }

    fn subscribe_remote(&self, origin: &ReplicaId, after: u64) -> BoxStream<'static, EventEnvelope> {
        self.inner.subscribe_remote(origin, after)
    }
}

#[tokio::test]
async fn test_timed_out_append_that_reached_disk_is_not_duplicated() {
    let dir = tempfile::tempdir().unwrap();
    let journal = file_journal(dir.path(), "R1").await;
    let stalling = Arc::new(StallAfterWrite {
        inner: journal.clone(),
        stalls: AtomicU32::new(1),
        stall: Duration::from_millis(500),
    });
    let settings = CoordinatorConfig {
        append_timeout: Duration::from_millis(50),
        ..settings()
    };

    let replica = Replica::spawn(replica_config("R1", &["R1"]), settings, stalling, Arc::new(SystemClock))
        .await
        .unwrap();
    assert_eq!(replica.offer_bid("alice", 30).await.unwrap(), Response::Accepted);
    assert_eq!(replica.offer_bid("bob", 40).await.unwrap(), Response::Accepted);
    replica.shutdown().await;

    let log = journal.replay_local().await.unwrap();
    assert_eq!(log.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);

    let restarted = spawn_on(file_journal(dir.path(), "R1").await, "R1", &["R1"]).await;
    assert_eq!(restarted.highest_bid().await.unwrap().offer, 40);
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_finish_response_is_accepted_on_file_journal() {
    let dir = tempfile::tempdir().unwrap();
    let replica = spawn_on(file_journal(dir.path(), "R1").await, "R1", &["R1"]).await;

    assert_eq!(replica.finish().await.unwrap(), Response::Accepted);
    replica.wait_until(|s| s.is_closed(), WAIT).await.unwrap();

    replica.shutdown().await;
}
