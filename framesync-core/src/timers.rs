//! Cancelable timers for the event loop.
//!
//! Each armed timer is a spawned sleep that reports its expiry on a shared
//! channel. Every arm bumps a generation counter, so an expiry that was
//! already queued when its timer was re-armed or cancelled is recognized as
//! stale and dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Expiry notification for the timer registered under `key`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired<K> {
    pub key: K,
    generation: u64,
}

struct Armed {
    generation: u64,
    task: JoinHandle<()>,
}

/// Keyed one-shot timers. At most one timer per key is armed at a time.
pub struct Timers<K> {
    armed: HashMap<K, Armed>,
    next_generation: u64,
    expired_tx: mpsc::UnboundedSender<Expired<K>>,
}

impl<K> Timers<K>
where
    K: Copy + Eq + Hash + Send + 'static,
{
    /// Create the timer set and the receiver its expiries arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expired<K>>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let timers = Self {
            armed: HashMap::new(),
            next_generation: 0,
            expired_tx,
        };
        (timers, expired_rx)
    }

    /// Arm `key` to expire after `after`, replacing any pending timer
    pub fn arm(&mut self, key: K, after: Duration) {
        self.cancel(key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.expired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Expired { key, generation });
        });

        self.armed.insert(key, Armed { generation, task });
    }

    pub fn cancel(&mut self, key: K) {
        if let Some(armed) = self.armed.remove(&key) {
            armed.task.abort();
        }
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.armed.contains_key(&key)
    }

    /// Check an expiry against the current timers. Returns true and disarms
    /// the key if the expiry is current, false if it is stale.
    pub fn accept(&mut self, expired: &Expired<K>) -> bool {
        match self.armed.get(&expired.key) {
            Some(armed) if armed.generation == expired.generation => {
                self.armed.remove(&expired.key);
                true
            }
            _ => false,
        }
    }
}

impl<K> Drop for Timers<K> {
    fn drop(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Key {
        A,
        B,
    }

    fn assert_elapsed(start: tokio::time::Instant, millis: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(millis) && elapsed < Duration::from_millis(millis + 2),
            "elapsed {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (mut timers, mut rx) = Timers::new();
        let start = tokio::time::Instant::now();
        timers.arm(Key::A, Duration::from_millis(100));
        assert!(timers.is_armed(Key::A));

        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.key, Key::A);
        assert_elapsed(start, 100);
        assert!(timers.accept(&expired));
        assert!(!timers.is_armed(Key::A));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm(Key::A, Duration::from_millis(100));
        timers.arm(Key::B, Duration::from_millis(200));
        timers.cancel(Key::A);

        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.key, Key::B);
        assert!(timers.accept(&expired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_countdown() {
        let (mut timers, mut rx) = Timers::new();
        let start = tokio::time::Instant::now();
        timers.arm(Key::A, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(60)).await;
        timers.arm(Key::A, Duration::from_millis(100));

        let expired = rx.recv().await.unwrap();
        assert_elapsed(start, 160);
        assert!(timers.accept(&expired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_expiry_is_stale_after_rearm() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm(Key::A, Duration::from_millis(10));
        let stale = rx.recv().await.unwrap();

        // Re-armed before the loop got to the queued expiry
        timers.arm(Key::A, Duration::from_millis(10));
        assert!(!timers.accept(&stale));
        assert!(timers.is_armed(Key::A));

        let fresh = rx.recv().await.unwrap();
        assert!(timers.accept(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_expiry_is_stale_after_cancel() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm(Key::B, Duration::from_millis(10));
        let stale = rx.recv().await.unwrap();

        timers.cancel(Key::B);
        assert!(!timers.accept(&stale));
    }
}
