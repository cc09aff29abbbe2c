//! Clocks.
//!
//! Bids are timestamped by the accepting replica, never by the bidder. The
//! `LogicalClock` turns a wall clock into strictly increasing millisecond
//! ticks so that bids accepted by one replica are totally ordered by time.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Strictly monotone millisecond timestamps for one replica.
pub struct LogicalClock {
    clock: Arc<dyn Clock>,
    last: Option<DateTime<Utc>>,
}

impl LogicalClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, last: None }
    }

    /// Current wall-clock time, without advancing the logical clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Next timestamp, greater than every timestamp issued or witnessed so far.
    pub fn tick(&mut self) -> DateTime<Utc> {
        let now = truncate_to_millis(self.clock.now());
        let next = match self.last {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }

    /// Record a timestamp issued before a restart so later ticks sort after it.
    pub fn witness(&mut self, timestamp: DateTime<Utc>) {
        if self.last.map_or(true, |last| timestamp > last) {
            self.last = Some(timestamp);
        }
    }
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let sub_millis = at.timestamp_subsec_nanos() % 1_000_000;
    at - Duration::nanoseconds(sub_millis as i64)
}
