//! JSON-lines file journal.
//!
//! A directory holds one `<replica>.jsonl` file per replica. Each line is a
//! serialized `EventEnvelope`. A replica appends to its own file and follows
//! the other files by polling them for new complete lines. A trailing line
//! without a newline is a write still in progress (or torn by a crash) and is
//! not read.
//!
//! Appends run on the blocking pool and finish even if the caller stops
//! waiting. The next append waits for them, and re-appending the record that
//! already ends the log succeeds without writing it twice.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use super::EventJournal;
use crate::error::{GavelError, Result};
use crate::events::{EventEnvelope, EventId, ReplicaId};

const FILE_EXTENSION: &str = "jsonl";

/// File-backed journal handle for one replica.
pub struct FileJournal {
    directory: PathBuf,
    replica: ReplicaId,
    poll_interval: Duration,
    /// End of the local file, loaded on first append and after a failed one.
    tail: Arc<Mutex<Option<LogEnd>>>,
}

/// The last complete record of the local file and where it ends.
#[derive(Debug, Clone, Copy)]
struct LogEnd {
    sequence: u64,
    event_id: Option<EventId>,
    len: u64,
}

impl FileJournal {
    /// Open the journal of `replica` inside `directory`, creating the directory if needed.
    pub async fn open(
        directory: impl Into<PathBuf>,
        replica: ReplicaId,
        poll_interval: Duration,
    ) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self {
            directory,
            replica,
            poll_interval,
            tail: Arc::new(Mutex::new(None)),
        })
    }

    /// Path of the log file of `replica`.
    pub fn log_path(&self, replica: &ReplicaId) -> PathBuf {
        log_path(&self.directory, replica)
    }
}

/// Read the end of the local log, truncating a torn trailing line.
fn load_log_end(path: &Path, file: &std::fs::File) -> Result<LogEnd> {
    let bytes = std::fs::read(path)?;
    let (events, consumed) = parse_complete_lines(path, &bytes, 0)?;

    if consumed < bytes.len() {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - consumed,
            "Truncating incomplete trailing record"
        );
        file.set_len(consumed as u64)?;
        file.sync_data()?;
    }

    let last = events.last();
    Ok(LogEnd {
        sequence: last.map_or(0, |e| e.sequence),
        event_id: last.map(|e| e.event_id),
        len: consumed as u64,
    })
}

/// Write one record behind the local log. Holds the writer lock until the
/// record is durable or rolled back.
fn append_blocking(
    mut tail: OwnedMutexGuard<Option<LogEnd>>,
    path: &Path,
    replica: &ReplicaId,
    envelope: &EventEnvelope,
    line: &[u8],
) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GavelError::append_failed(format!("open {}", path.display())).with_source(e))?;
    let len = file.metadata()?.len();

    let end = match *tail {
        Some(end) if end.len == len => end,
        _ => load_log_end(path, &file)?,
    };
    *tail = Some(end);

    if envelope.sequence == end.sequence && end.event_id == Some(envelope.event_id) {
        tracing::debug!("Event already stored");
        return Ok(());
    }
    if envelope.sequence != end.sequence + 1 {
        return Err(GavelError::sequence_conflict(
            replica,
            end.sequence + 1,
            envelope.sequence,
        ));
    }

    if let Err(error) = file.write_all(line).and_then(|_| file.sync_data()) {
        *tail = None;
        if let Err(rollback) = file.set_len(end.len) {
            tracing::warn!(path = %path.display(), error = %rollback, "Failed to roll back partial record");
        }
        return Err(GavelError::append_failed(format!("write {}", path.display())).with_source(error));
    }

    *tail = Some(LogEnd {
        sequence: envelope.sequence,
        event_id: Some(envelope.event_id),
        len: end.len + line.len() as u64,
    });
    tracing::debug!(event_type = envelope.event_type(), "Event appended");
    Ok(())
}

fn log_path(directory: &Path, replica: &ReplicaId) -> PathBuf {
    directory.join(format!("{}.{}", replica, FILE_EXTENSION))
}

async fn read_if_exists(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Parse every newline-terminated record in `bytes`.
///
/// Returns the events and the number of bytes consumed. `base_offset` is the
/// file position of `bytes[0]`, used to report where a bad record sits.
fn parse_complete_lines(
    path: &Path,
    bytes: &[u8],
    base_offset: u64,
) -> Result<(Vec<EventEnvelope>, usize)> {
    let mut events = Vec::new();
    let mut consumed = 0;

    while let Some(newline) = bytes[consumed..].iter().position(|b| *b == b'\n') {
        let line = &bytes[consumed..consumed + newline];
        let offset = base_offset + consumed as u64;
        consumed += newline + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let envelope: EventEnvelope = serde_json::from_slice(line).map_err(|e| {
            GavelError::malformed_event(format!("{}@{}", path.display(), offset), e.to_string())
        })?;
        events.push(envelope);
    }

    Ok((events, consumed))
}

/// Read the whole log at `path`, requiring every record to be well-formed.
async fn read_log(path: &Path) -> Result<Vec<EventEnvelope>> {
    let bytes = read_if_exists(path).await?;
    let (events, _) = parse_complete_lines(path, &bytes, 0)?;
    Ok(events)
}

#[async_trait]
impl EventJournal for FileJournal {
    fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    #[instrument(skip(self, envelope), fields(replica = %self.replica, sequence = envelope.sequence))]
    async fn append(&self, envelope: &EventEnvelope) -> Result<()> {
        if envelope.origin != self.replica {
            return Err(GavelError::internal(format!(
                "journal of {} cannot append an event originating at {}",
                self.replica, envelope.origin
            )));
        }

        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');

        let tail = self.tail.clone().lock_owned().await;
        let path = self.log_path(&self.replica);
        let replica = self.replica.clone();
        let envelope = envelope.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            span.in_scope(|| append_blocking(tail, &path, &replica, &envelope, &line))
        })
        .await
        .map_err(|e| GavelError::internal(format!("append task failed: {}", e)))?
    }

    async fn replay_local(&self) -> Result<Vec<EventEnvelope>> {
        read_log(&self.log_path(&self.replica)).await
    }

    async fn replay_remote(&self, origin: &ReplicaId) -> Result<Vec<EventEnvelope>> {
        read_log(&self.log_path(origin)).await
    }

    fn subscribe_remote(&self, origin: &ReplicaId, after: u64) -> BoxStream<'static, EventEnvelope> {
        let tail = Tail {
            path: self.log_path(origin),
            offset: 0,
            after,
            poll_interval: self.poll_interval,
            pending: VecDeque::new(),
            polled: false,
        };

        stream::unfold(tail, |mut tail| async move {
            match tail.next_event().await {
                Some(event) => Some((event, tail)),
                None => None,
            }
        })
        .boxed()
    }
}

// =============================================================================
// Tailing
// =============================================================================

/// Cursor over a remote log file that is still being written.
struct Tail {
    path: PathBuf,
    offset: u64,
    after: u64,
    poll_interval: Duration,
    pending: VecDeque<EventEnvelope>,
    polled: bool,
}

impl Tail {
    /// Next event past `after`, waiting for the file to grow. `None` ends the feed.
    async fn next_event(&mut self) -> Option<EventEnvelope> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                self.after = event.sequence;
                return Some(event);
            }

            if self.polled {
                tokio::time::sleep(self.poll_interval).await;
            }
            self.polled = true;

            match self.read_new_records().await {
                Ok(events) => self
                    .pending
                    .extend(events.into_iter().filter(|e| e.sequence > self.after)),
                Err(error) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %error,
                        "Stopping remote feed"
                    );
                    return None;
                }
            }
        }
    }

    async fn read_new_records(&mut self) -> Result<Vec<EventEnvelope>> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            // Replaced underneath us; read again from the start
            self.offset = 0;
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;

        let (events, consumed) = parse_complete_lines(&self.path, &bytes, self.offset)?;
        self.offset += consumed as u64;
        Ok(events)
    }
}
