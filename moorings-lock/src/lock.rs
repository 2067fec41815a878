//! Distributed locks with bounded acquisition.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::store::LockStore;

/// Upper bound for the pause between two acquisition attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Distributed lock errors
#[derive(Debug, Error)]
pub enum LockError {
    /// The acquisition budget ran out while another holder kept the key.
    #[error("Lock timeout")]
    Timeout,

    /// Failure reported by a non-Redis [`LockStore`].
    #[error("Lock store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] moorings_redis::RedisError),
}

impl LockError {
    /// `true` when the lock was simply busy, as opposed to a store failure.
    pub fn is_not_acquired(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Distributed lock trait
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire within the lock's configured acquisition timeout.
    async fn acquire(&self) -> Result<LockGuard, LockError>;

    /// Try to acquire the lock once, without waiting.
    async fn try_acquire(&self) -> Result<Option<LockGuard>, LockError>;

    /// Acquire, retrying with backoff until `timeout` has elapsed.
    async fn acquire_timeout(&self, timeout: Duration) -> Result<LockGuard, LockError>;
}

/// Held lock. Release it with [`LockGuard::release`]; a guard dropped without
/// being released schedules the release on the current Tokio runtime.
pub struct LockGuard {
    key: String,
    token: String,
    store: Arc<dyn LockStore>,
    acquired_at: Instant,
    released: bool,
}

impl LockGuard {
    fn new(key: String, token: String, store: Arc<dyn LockStore>) -> Self {
        Self {
            key,
            token,
            store,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The owner token stored under the key.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// How long this guard has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release the lock.
    ///
    /// A lock that already expired (or was taken over after expiring) is not
    /// an error; only store failures are reported.
    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;

        if self.store.release_if_owner(&self.key, &self.token).await? {
            debug!(key = %self.key, held_ms = self.held_for().as_millis() as u64, "Released lock");
        } else {
            debug!(key = %self.key, "Lock expired before release");
        }

        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best effort release on drop
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Lock guard dropped outside a runtime; it will expire");
            return;
        };

        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        let store = Arc::clone(&self.store);

        handle.spawn(async move {
            if let Err(e) = store.release_if_owner(&key, &token).await {
                warn!(key = %key, error = %e, "Failed to release dropped lock");
            }
        });
    }
}

/// Lock on one key of a [`LockStore`].
pub struct KeyLock {
    key: String,
    hold_duration: Duration,
    acquisition_timeout: Duration,
    retry_delay: Duration,
    store: Arc<dyn LockStore>,
}

impl KeyLock {
    /// Create a lock with a 30 s hold duration and a 10 s acquisition budget.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use moorings_lock::{DistributedLock, KeyLock};
    /// use moorings_redis::{RedisConfig, RedisService};
    /// use std::sync::Arc;
    ///
    /// let redis = Arc::new(RedisService::new(RedisConfig::default()).await?);
    /// let lock = KeyLock::new("app/1234/lock", redis);
    /// let guard = lock.acquire().await?;
    /// // critical section
    /// guard.release().await?;
    /// ```
    pub fn new(key: impl Into<String>, store: Arc<dyn LockStore>) -> Self {
        LockBuilder::new(key).build(store)
    }

    /// Get the lock key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Server-side expiry of a claimed lock.
    pub fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    /// Budget used by [`DistributedLock::acquire`].
    pub fn acquisition_timeout(&self) -> Duration {
        self.acquisition_timeout
    }

    /// Pause before the next attempt: `delay` with up to half of it shaved off.
    fn jittered(delay: Duration) -> Duration {
        let ms = delay.as_millis().max(1) as u64;
        Duration::from_millis(rand::rng().random_range(ms.div_ceil(2)..=ms))
    }
}

#[async_trait]
impl DistributedLock for KeyLock {
    async fn acquire(&self) -> Result<LockGuard, LockError> {
        self.acquire_timeout(self.acquisition_timeout).await
    }

    async fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
        let token = Uuid::new_v4().to_string();

        if self
            .store
            .try_claim(&self.key, &token, self.hold_duration)
            .await?
        {
            trace!(key = %self.key, "Acquired lock");
            Ok(Some(LockGuard::new(
                self.key.clone(),
                token,
                Arc::clone(&self.store),
            )))
        } else {
            trace!(key = %self.key, "Lock already held");
            Ok(None)
        }
    }

    async fn acquire_timeout(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + timeout;
        let mut delay = self.retry_delay;
        let mut attempts = 1u32;

        loop {
            if let Some(guard) = self.try_acquire().await? {
                return Ok(guard);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(key = %self.key, attempts, "Gave up acquiring lock");
                return Err(LockError::Timeout);
            }

            let pause = Self::jittered(delay).min(deadline - now);
            tokio::time::sleep(pause).await;

            delay = (delay * 2).min(MAX_RETRY_DELAY);
            attempts += 1;
        }
    }
}

/// Distributed lock builder
pub struct LockBuilder {
    key: String,
    hold_duration: Duration,
    acquisition_timeout: Duration,
    retry_delay: Duration,
}

impl LockBuilder {
    /// Create new lock builder
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            hold_duration: Duration::from_secs(30),
            acquisition_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(10),
        }
    }

    /// Server-side expiry of the lock key. Must exceed the critical section.
    pub fn with_hold_duration(mut self, hold: Duration) -> Self {
        self.hold_duration = hold;
        self
    }

    /// How long [`DistributedLock::acquire`] keeps retrying.
    pub fn with_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = timeout;
        self
    }

    /// First pause between attempts; doubles up to 250 ms.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Build the lock
    pub fn build(self, store: Arc<dyn LockStore>) -> KeyLock {
        KeyLock {
            key: self.key,
            hold_duration: self.hold_duration,
            acquisition_timeout: self.acquisition_timeout,
            retry_delay: self.retry_delay.max(Duration::from_millis(1)),
            store,
        }
    }
}
