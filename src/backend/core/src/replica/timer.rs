//! Keyed one-shot timers delivering messages to a mailbox.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Key of the timer that finishes the auction at its closing time.
pub const FINISH_TIMER: &str = "finish";

/// Schedules messages to be sent to a mailbox after a delay.
///
/// At most one timer runs per key: scheduling a key again replaces the
/// pending timer. Pending timers are cancelled when the scheduler is dropped.
pub struct TimerScheduler<M> {
    mailbox: mpsc::Sender<M>,
    timers: HashMap<&'static str, JoinHandle<()>>,
}

impl<M: Send + 'static> TimerScheduler<M> {
    pub fn new(mailbox: mpsc::Sender<M>) -> Self {
        Self {
            mailbox,
            timers: HashMap::new(),
        }
    }

    /// Send `message` after `delay`, replacing any timer under `key`.
    pub fn schedule_once(&mut self, key: &'static str, delay: Duration, message: M) {
        self.cancel(key);

        let mailbox = self.mailbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if mailbox.send(message).await.is_err() {
                tracing::debug!(timer = key, "Timer fired after mailbox closed");
            }
        });

        tracing::debug!(timer = key, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        self.timers.insert(key, handle);
    }

    /// Cancel the timer under `key`, if any. Returns whether one was pending.
    pub fn cancel(&mut self, key: &'static str) -> bool {
        match self.timers.remove(key) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl<M> Drop for TimerScheduler<M> {
    fn drop(&mut self) {
        for handle in self.timers.values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_delivers_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerScheduler::new(tx);

        timers.schedule_once(FINISH_TIMER, Duration::from_secs(10), "finish");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some("finish"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerScheduler::new(tx);

        timers.schedule_once(FINISH_TIMER, Duration::from_secs(10), "first");
        timers.schedule_once(FINISH_TIMER, Duration::from_secs(20), "second");

        assert_eq!(rx.recv().await, Some("second"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel::<&str>(4);
        let mut timers = TimerScheduler::new(tx);

        timers.schedule_once(FINISH_TIMER, Duration::from_secs(1), "finish");
        assert!(timers.cancel(FINISH_TIMER));
        assert!(!timers.cancel(FINISH_TIMER));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
