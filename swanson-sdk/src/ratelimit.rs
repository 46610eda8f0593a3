//! Token bucket rate limiting for outbound traffic.
//!
//! Twitch documents separate ceilings for channel messages and whispers, so
//! the engine keeps one [`TokenBucket`] per traffic class. A bucket starts
//! full and a background task adds one token per refill interval, saturating
//! at capacity.
//!
//! The refill task exits when [`TokenBucket::stop`] is called or when the
//! last handle to the bucket is dropped.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;

/// Capacity and refill period of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub capacity: u32,
    pub refill_interval: Duration,
}

impl RateLimit {
    /// 20 messages, one token back every 1.5s.
    pub const CHANNEL: RateLimit = RateLimit {
        capacity: 20,
        refill_interval: Duration::from_millis(1500),
    };

    /// 3 whispers, one token back every second.
    pub const WHISPER: RateLimit = RateLimit {
        capacity: 3,
        refill_interval: Duration::from_secs(1),
    };
}

/// A shared handle to a token bucket. Clones share the same counter.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: u32,
    refill_interval: Duration,
    tokens: Mutex<u32>,
    available: Notify,
    stop_tx: watch::Sender<bool>,
}

impl TokenBucket {
    /// Create a full bucket and spawn its refill task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(refill_interval: Duration, capacity: u32) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            capacity,
            refill_interval,
            tokens: Mutex::new(capacity),
            available: Notify::new(),
            stop_tx,
        });
        tokio::spawn(refill_loop(Arc::downgrade(&inner), refill_interval, stop_rx));
        Self { inner }
    }

    pub fn from_limit(limit: RateLimit) -> Self {
        Self::start(limit.refill_interval, limit.capacity)
    }

    /// Take one token, waiting for a refill if the bucket is empty.
    ///
    /// Once the bucket is stopped this returns immediately without taking a
    /// token, so callers blocked at shutdown are released.
    pub async fn acquire(&self) {
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_acquire() || self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Take one token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut tokens = self.inner.tokens.lock();
        if *tokens > 0 {
            *tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> u32 {
        *self.inner.tokens.lock()
    }

    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.inner.refill_interval
    }

    /// Stop the refill task. Idempotent.
    pub fn stop(&self) {
        if !self.inner.stop_tx.send_replace(true) {
            tracing::debug!(capacity = self.inner.capacity, "Token bucket stopped");
        }
        self.inner.available.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.inner.capacity)
            .field("tokens", &self.available())
            .field("refill_interval", &self.inner.refill_interval)
            .finish()
    }
}

impl Inner {
    fn refill(&self) {
        let mut tokens = self.tokens.lock();
        if *tokens < self.capacity {
            *tokens += 1;
            drop(tokens);
            self.available.notify_one();
        }
    }
}

async fn refill_loop(inner: Weak<Inner>, period: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the bucket already starts full.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            // Err means every handle (and so the sender) is gone.
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.refill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, sleep, timeout};

    const NEVER: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn full_bucket_does_not_block() {
        let bucket = TokenBucket::start(NEVER, 4);
        for _ in 0..4 {
            timeout(Duration::from_millis(50), bucket.acquire())
                .await
                .expect("acquire from a non-empty bucket must not wait");
        }
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test]
    async fn empty_bucket_waits_for_refill() {
        let bucket = TokenBucket::start(Duration::from_millis(100), 2);
        bucket.acquire().await;
        bucket.acquire().await;

        let started = Instant::now();
        assert!(timeout(Duration::from_millis(20), bucket.acquire()).await.is_err());
        timeout(Duration::from_secs(2), bucket.acquire())
            .await
            .expect("refill should release the waiter");
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn refill_saturates_at_capacity() {
        let bucket = TokenBucket::start(Duration::from_millis(5), 3);
        sleep(Duration::from_millis(60)).await;
        assert_eq!(bucket.available(), 3);

        assert!(bucket.try_acquire());
        sleep(Duration::from_millis(60)).await;
        assert_eq!(bucket.available(), 3);
    }

    #[tokio::test]
    async fn concurrent_acquires_never_over_withdraw() {
        let bucket = TokenBucket::start(NEVER, 5);
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let bucket = bucket.clone();
            tasks.push(tokio::spawn(async move {
                timeout(Duration::from_millis(100), bucket.acquire()).await.is_ok()
            }));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test]
    async fn stop_halts_refill_and_releases_waiters() {
        let bucket = TokenBucket::start(Duration::from_millis(10), 1);
        assert!(bucket.try_acquire());

        let waiter = {
            let bucket = bucket.clone();
            tokio::spawn(async move { bucket.acquire().await })
        };
        bucket.stop();
        bucket.stop();
        assert!(bucket.is_stopped());

        timeout(Duration::from_millis(200), waiter)
            .await
            .expect("stopped bucket releases waiters")
            .unwrap();

        let before = bucket.available();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(bucket.available(), before);
    }

    #[test]
    fn protocol_limits() {
        assert_eq!(RateLimit::CHANNEL.capacity, 20);
        assert_eq!(RateLimit::CHANNEL.refill_interval, Duration::from_millis(1500));
        assert_eq!(RateLimit::WHISPER.capacity, 3);
        assert_eq!(RateLimit::WHISPER.refill_interval, Duration::from_secs(1));
    }
}
