//! Sliding-window attempt limiter, keyed per staff member.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Allows `max_attempts` per `window` for each key.
#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    attempts: Arc<Mutex<HashMap<Uuid, VecDeque<Instant>>>>,
    max_attempts: usize,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            max_attempts,
            window,
        }
    }

    /// Record an attempt.
    ///
    /// Returns `Err(wait)` without recording when the key is over its
    /// limit, where `wait` is the time until the oldest attempt expires.
    pub async fn try_acquire(&self, key: Uuid) -> Result<(), Duration> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().await;

        // Prune every key; a key with no live attempts is removed
        attempts.retain(|_, entries| {
            while entries.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                entries.pop_front();
            }
            !entries.is_empty()
        });
        let entries = attempts.entry(key).or_default();

        if entries.len() >= self.max_attempts {
            let oldest = entries.front().copied().unwrap_or(now);
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            tracing::warn!(staff_id = %key, wait_secs = wait.as_secs(), "Attempt limit reached");
            return Err(wait);
        }

        entries.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.attempts.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_blocks_after_max_attempts() {
        let limiter = AttemptLimiter::new(3, Duration::from_secs(300));
        let staff = Uuid::new_v4();

        for _ in 0..3 {
            assert!(limiter.try_acquire(staff).await.is_ok());
        }

        let wait = limiter.try_acquire(staff).await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(300));

        // Other staff are unaffected
        assert!(limiter.try_acquire(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = AttemptLimiter::new(3, Duration::from_secs(300));
        let staff = Uuid::new_v4();

        limiter.try_acquire(staff).await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        limiter.try_acquire(staff).await.unwrap();
        limiter.try_acquire(staff).await.unwrap();

        let wait = limiter.try_acquire(staff).await.unwrap_err();
        assert_eq!(wait, Duration::from_secs(200));

        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(limiter.try_acquire(staff).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_keys_are_dropped() {
        let limiter = AttemptLimiter::new(3, Duration::from_secs(300));
        let idle = Uuid::new_v4();
        limiter.try_acquire(idle).await.unwrap();
        limiter.try_acquire(Uuid::new_v4()).await.unwrap();
        assert_eq!(limiter.tracked_keys().await, 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        limiter.try_acquire(Uuid::new_v4()).await.unwrap();

        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
