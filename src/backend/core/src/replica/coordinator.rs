//! Replica coordinator.
//!
//! Each replica runs one control loop that owns its `AuctionState`. Commands
//! from callers, events from remote replicas and timer firings all arrive on
//! one bounded mailbox and are processed strictly one at a time:
//!
//! 1. the handler decides the command's effect
//! 2. a persisted effect is appended to the local journal (with retry and a
//!    per-attempt timeout) before anything else happens
//! 3. the event is folded into the state and the new state is published
//! 4. the caller is answered
//!
//! After folding an `AuctionFinished` the coordinator may queue follow-up
//! commands for itself (`Finish` to propagate finishing, `Close` to decide
//! the winner). Follow-ups run before the next mailbox message.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn, Instrument};

use super::clock::{Clock, LogicalClock};
use super::command::{Command, Effect, Response};
use super::cursor::{Ingest, RemoteCursors};
use super::handler::{handle_command, CommandContext};
use super::recovery::{recover, should_close};
use super::replication::{spawn_tailer, TailerContext};
use super::timer::{TimerScheduler, FINISH_TIMER};
use crate::config::{CoordinatorConfig, ReplicaConfig};
use crate::error::{GavelError, Result};
use crate::events::{Aggregate, AuctionEvent, AuctionState, Bid, EventEnvelope, ReplicaId};
use crate::journal::EventJournal;
use crate::telemetry::metrics;

// =============================================================================
// Mailbox
// =============================================================================

/// Reply channel for one command.
pub type ReplyTo = oneshot::Sender<Result<Response>>;

/// Everything a replica's control loop reacts to.
pub enum Message {
    /// A command, with an optional channel for the answer.
    Command {
        command: Command,
        reply: Option<ReplyTo>,
    },
    /// An event read from a remote replica's log.
    Replicated(EventEnvelope),
}

// =============================================================================
// Replica
// =============================================================================

/// Entry point for running a replica.
pub struct Replica;

impl Replica {
    /// Recover the replica from its journal and start its control loop.
    ///
    /// Fails if the configuration is invalid or the local log cannot be
    /// replayed; no task is started in that case.
    #[instrument(skip_all, fields(replica = %replica.replica_id))]
    pub async fn spawn(
        replica: ReplicaConfig,
        settings: CoordinatorConfig,
        journal: Arc<dyn EventJournal>,
        clock: Arc<dyn Clock>,
    ) -> Result<ReplicaHandle> {
        replica.validate()?;
        settings.validate()?;
        if journal.replica_id() != &replica.replica_id {
            return Err(GavelError::configuration(format!(
                "journal belongs to {} but replica is {}",
                journal.replica_id(),
                replica.replica_id
            )));
        }

        let recovered = recover(journal.as_ref(), &replica).await.map_err(|e| {
            e.log();
            e
        })?;

        let mut logical_clock = LogicalClock::new(clock);
        if let Some(last) = recovered.last_local_timestamp {
            logical_clock.witness(last);
        }

        let (mailbox_tx, mailbox_rx) = mpsc::channel(settings.mailbox_capacity);
        let (state_tx, state_rx) = watch::channel(recovered.state.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut follow_ups = VecDeque::new();
        if recovered.should_close {
            info!("Termination condition holds after recovery, closing");
            follow_ups.push_back(Command::Close);
        }

        let mut timers = TimerScheduler::new(mailbox_tx.clone());
        if recovered.state.is_closed() || recovered.state.finished_at().contains(&replica.replica_id) {
            debug!(phase = %recovered.state.phase(), "Already finished locally, finish timer not armed");
        } else {
            let until_closing = (replica.closing_at - logical_clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            timers.schedule_once(
                FINISH_TIMER,
                until_closing,
                Message::Command {
                    command: Command::Finish,
                    reply: None,
                },
            );
        }

        let tailer_ctx = TailerContext {
            journal: journal.clone(),
            mailbox: mailbox_tx.clone(),
            resubscribe_delay: settings.resubscribe_delay,
            shutdown: shutdown_rx.clone(),
        };
        let tailers: Vec<JoinHandle<()>> = replica
            .remote_replicas()
            .map(|origin| {
                let after = recovered.cursors.last_applied(origin);
                spawn_tailer(tailer_ctx.clone(), origin.clone(), after)
            })
            .collect();

        let replica_id = replica.replica_id.clone();
        let coordinator = Coordinator {
            replica,
            settings,
            journal,
            clock: logical_clock,
            state: recovered.state,
            local_sequence: recovered.local_sequence,
            cursors: recovered.cursors,
            follow_ups,
            timers,
            state_tx,
        };

        let span = tracing::info_span!("replica", replica = %replica_id);
        let task = tokio::spawn(coordinator.run(mailbox_rx, shutdown_rx).instrument(span));

        Ok(ReplicaHandle {
            replica_id,
            mailbox: mailbox_tx,
            state: state_rx,
            lifecycle: Arc::new(Lifecycle {
                shutdown: shutdown_tx,
                tasks: Mutex::new(Some(Tasks {
                    coordinator: task,
                    tailers,
                })),
            }),
        })
    }
}

// =============================================================================
// Control Loop
// =============================================================================

struct Coordinator {
    replica: ReplicaConfig,
    settings: CoordinatorConfig,
    journal: Arc<dyn EventJournal>,
    clock: LogicalClock,
    state: AuctionState,
    local_sequence: u64,
    cursors: RemoteCursors,
    follow_ups: VecDeque<Command>,
    timers: TimerScheduler<Message>,
    state_tx: watch::Sender<AuctionState>,
}

impl Coordinator {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Message>, mut shutdown: watch::Receiver<bool>) {
        info!(
            phase = %self.state.phase(),
            local_sequence = self.local_sequence,
            "Replica started"
        );

        loop {
            while let Some(command) = self.follow_ups.pop_front() {
                debug!(command = command.name(), "Running follow-up command");
                self.process_command(command, None).await;
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                message = mailbox.recv() => match message {
                    Some(Message::Command { command, reply }) => {
                        self.process_command(command, reply).await;
                    }
                    Some(Message::Replicated(envelope)) => self.process_replicated(envelope),
                    None => break,
                }
            }
        }

        self.timers.cancel_all();
        info!("Replica stopped");
    }

    async fn process_command(&mut self, command: Command, reply: Option<ReplyTo>) {
        let accepted_at = self.clock.tick();
        let ctx = CommandContext {
            replica_id: &self.replica.replica_id,
            accepted_at,
        };

        let (outcome, result) = match handle_command(&self.state, &command, &ctx) {
            Effect::Reply(answer) => ("replied", Ok(Response::from(answer))),
            Effect::Unhandled => {
                debug!(
                    command = command.name(),
                    phase = %self.state.phase(),
                    "Command rejected"
                );
                (
                    "rejected",
                    Ok(Response::Rejected {
                        command: command.name().to_string(),
                        phase: self.state.phase(),
                    }),
                )
            }
            Effect::Persist(event) => match self.persist(event, accepted_at).await {
                Ok(()) => ("accepted", Ok(Response::Accepted)),
                Err(error) => ("failed", Err(error)),
            },
        };

        metrics::record_command(&self.replica.replica_id, command.name(), outcome);

        match reply {
            Some(reply) => {
                // The caller may have given up waiting
                let _ = reply.send(result);
            }
            None => {
                if let Err(error) = result {
                    warn!(command = command.name(), error = %error, "Internal command failed");
                }
            }
        }
    }

    /// Append a local event, then fold it.
    async fn persist(&mut self, event: AuctionEvent, recorded_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let envelope = EventEnvelope::new(
            self.replica.replica_id.clone(),
            self.local_sequence + 1,
            recorded_at,
            event,
        );

        self.append_with_retry(&envelope).await?;
        self.local_sequence = envelope.sequence;

        debug!(
            sequence = envelope.sequence,
            event_type = envelope.event_type(),
            "Event persisted"
        );
        self.apply(&envelope);
        Ok(())
    }

    async fn append_with_retry(&self, envelope: &EventEnvelope) -> Result<()> {
        let policy = &self.settings.retry;
        let timeout = self.settings.append_timeout;
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(timeout, self.journal.append(envelope)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GavelError::append_timeout(timeout)),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(error) if policy.should_retry(attempt, &error) => {
                    let delay = policy.next_retry_delay(attempt);
                    warn!(
                        sequence = envelope.sequence,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Append failed, retrying"
                    );
                    metrics::record_append_retry(&self.replica.replica_id);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) if error.is_retryable() => {
                    let exhausted = GavelError::retry_budget_exhausted(attempt + 1, error);
                    exhausted.log();
                    return Err(exhausted);
                }
                Err(error) => {
                    error.log();
                    return Err(error);
                }
            }
        }
    }

    fn process_replicated(&mut self, envelope: EventEnvelope) {
        if envelope.origin == self.replica.replica_id {
            debug!(sequence = envelope.sequence, "Ignoring own event from remote feed");
            return;
        }
        if !self.replica.all_replicas.contains(&envelope.origin) {
            warn!(origin = %envelope.origin, "Ignoring event from unknown replica");
            return;
        }

        let origin = envelope.origin.clone();
        match self.cursors.accept(envelope) {
            Ingest::Duplicate => metrics::record_duplicate(&self.replica.replica_id, &origin),
            Ingest::Buffered => {
                debug!(
                    origin = %origin,
                    applied = self.cursors.last_applied(&origin),
                    "Buffering out-of-order event"
                );
            }
            Ingest::Ready(events) => {
                for envelope in &events {
                    self.apply(envelope);
                }
            }
        }
        metrics::set_pending_remote(&self.replica.replica_id, self.cursors.pending_len());
    }

    /// Fold one event, publish the state and queue any follow-ups.
    fn apply(&mut self, envelope: &EventEnvelope) {
        let was_closed = self.state.is_closed();
        self.state.apply(&envelope.event);
        metrics::record_event_applied(&self.replica.replica_id, &envelope.origin, &envelope.event);
        self.state_tx.send_replace(self.state.clone());

        if let AuctionEvent::AuctionFinished { at_replica } = &envelope.event {
            if *at_replica == self.replica.replica_id && self.timers.cancel(FINISH_TIMER) {
                debug!("Finish timer cancelled");
            }
            if !was_closed {
                self.on_finished(at_replica);
            }
        }
    }

    fn on_finished(&mut self, at_replica: &ReplicaId) {
        let follow_up = if self.state.finished_at().contains(&self.replica.replica_id) {
            if !should_close(&self.state, &self.replica) {
                return;
            }
            info!(finished_at = %at_replica, "All replicas finished, closing");
            Command::Close
        } else {
            info!(finished_at = %at_replica, "Remote replica finished, finishing locally");
            Command::Finish
        };

        if !self.follow_ups.contains(&follow_up) {
            self.follow_ups.push_back(follow_up);
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

struct Tasks {
    coordinator: JoinHandle<()>,
    tailers: Vec<JoinHandle<()>>,
}

struct Lifecycle {
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Option<Tasks>>,
}

/// Command ingress and state view of a running replica.
#[derive(Clone)]
pub struct ReplicaHandle {
    replica_id: ReplicaId,
    mailbox: mpsc::Sender<Message>,
    state: watch::Receiver<AuctionState>,
    lifecycle: Arc<Lifecycle>,
}

impl ReplicaHandle {
    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    /// Send a command and wait for its response.
    pub async fn ask(&self, command: Command) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Message::Command {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| GavelError::replica_stopped(&self.replica_id))?;

        response
            .await
            .map_err(|_| GavelError::replica_stopped(&self.replica_id))?
    }

    /// Send a command without waiting for its outcome.
    pub async fn tell(&self, command: Command) -> Result<()> {
        self.mailbox
            .send(Message::Command {
                command,
                reply: None,
            })
            .await
            .map_err(|_| GavelError::replica_stopped(&self.replica_id))
    }

    pub async fn offer_bid(&self, bidder: impl Into<String>, offer: u64) -> Result<Response> {
        self.ask(Command::OfferBid {
            bidder: bidder.into(),
            offer,
        })
        .await
    }

    pub async fn finish(&self) -> Result<Response> {
        self.ask(Command::Finish).await
    }

    pub async fn highest_bid(&self) -> Result<Bid> {
        match self.ask(Command::GetHighestBid).await? {
            Response::HighestBid(bid) => Ok(bid),
            other => Err(GavelError::unexpected_reply("HighestBid", other)),
        }
    }

    pub async fn is_closed(&self) -> Result<bool> {
        match self.ask(Command::IsClosed).await? {
            Response::Closed { closed } => Ok(closed),
            other => Err(GavelError::unexpected_reply("Closed", other)),
        }
    }

    /// Latest published state.
    pub fn state(&self) -> AuctionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<AuctionState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_until<P>(&self, predicate: P, timeout: Duration) -> Result<AuctionState>
    where
        P: FnMut(&AuctionState) -> bool,
    {
        let mut receiver = self.state.clone();
        let result = match tokio::time::timeout(timeout, receiver.wait_for(predicate)).await {
            Ok(Ok(state)) => Ok(state.clone()),
            Ok(Err(_)) => Err(GavelError::replica_stopped(&self.replica_id)),
            Err(_) => Err(GavelError::wait_timeout(timeout)),
        };
        result
    }

    /// Stop the control loop and the remote tailers, and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.lifecycle.shutdown.send(true);

        let tasks = self.lifecycle.tasks.lock().take();
        if let Some(tasks) = tasks {
            for tailer in tasks.tailers {
                let _ = tailer.await;
            }
            if let Err(e) = tasks.coordinator.await {
                warn!(replica = %self.replica_id, error = %e, "Replica task ended abnormally");
            }
        }
    }
}
