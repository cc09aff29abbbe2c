//! Remote feed tailers.
//!
//! One task per remote origin follows that origin's log and forwards every
//! event to the coordinator's mailbox. When a feed ends the tailer waits and
//! re-subscribes from the last sequence it forwarded; duplicates this may
//! cause are dropped by the coordinator's cursors.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::coordinator::Message;
use crate::events::ReplicaId;
use crate::journal::EventJournal;

/// Settings shared by every tailer of one replica.
#[derive(Clone)]
pub struct TailerContext {
    pub journal: Arc<dyn EventJournal>,
    pub mailbox: mpsc::Sender<Message>,
    pub resubscribe_delay: Duration,
    pub shutdown: watch::Receiver<bool>,
}

/// Start following `origin` from just after sequence `after`.
pub fn spawn_tailer(ctx: TailerContext, origin: ReplicaId, after: u64) -> JoinHandle<()> {
    let span = tracing::info_span!(
        "tailer",
        replica = %ctx.journal.replica_id(),
        origin = %origin
    );
    tokio::spawn(run_tailer(ctx, origin, after).instrument(span))
}

async fn run_tailer(mut ctx: TailerContext, origin: ReplicaId, mut after: u64) {
    tracing::debug!(after, "Tailer started");

    loop {
        let mut feed = ctx.journal.subscribe_remote(&origin, after);

        loop {
            tokio::select! {
                _ = ctx.shutdown.changed() => {
                    tracing::debug!("Tailer stopping");
                    return;
                }
                next = feed.next() => match next {
                    Some(envelope) => {
                        let sequence = envelope.sequence;
                        if ctx.mailbox.send(Message::Replicated(envelope)).await.is_err() {
                            tracing::debug!("Mailbox closed, tailer stopping");
                            return;
                        }
                        after = after.max(sequence);
                    }
                    None => break,
                }
            }
        }

        tracing::debug!(after, "Remote feed ended, re-subscribing");
        tokio::select! {
            _ = ctx.shutdown.changed() => return,
            _ = tokio::time::sleep(ctx.resubscribe_delay) => {}
        }
    }
}
