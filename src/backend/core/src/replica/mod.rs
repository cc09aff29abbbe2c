//! Replica runtime.
//!
//! - **`command`** / **`handler`**: Commands and the pure function deciding
//!   what each one does in the current mode.
//! - **`coordinator`**: The per-replica control loop and the `ReplicaHandle`
//!   callers talk to.
//! - **`recovery`**: Rebuilding state from the journal on startup.
//! - **`replication`**: Tailers following the logs of the other replicas.
//! - **`cursor`**: Per-origin ordering and de-duplication of remote events.
//! - **`clock`**, **`timer`**, **`retry`**: Supporting machinery.

pub mod clock;
pub mod command;
pub mod coordinator;
pub mod cursor;
pub mod handler;
pub mod recovery;
pub mod replication;
pub mod retry;
pub mod timer;

pub use clock::{Clock, LogicalClock, ManualClock, SystemClock};
pub use command::{Command, Effect, Mode, Reply, Response};
pub use coordinator::{Message, Replica, ReplicaHandle};
pub use cursor::{Ingest, RemoteCursors};
pub use handler::{handle_command, CommandContext};
pub use recovery::{recover, should_close, Recovered};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use timer::{TimerScheduler, FINISH_TIMER};
