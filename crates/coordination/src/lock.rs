//! Advisory distributed lock.
//!
//! The lock only reduces wasted work under contention. Stock correctness never
//! depends on it, so when the backing store is unreachable acquisition
//! degrades to an unconditional grant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::ProductId;
use uuid::Uuid;

use crate::Result;

/// Store operations the lock is built on.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Sets `key` to `token` only if the key is absent, expiring after `ttl`.
    ///
    /// Returns true if the key was set.
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if it still holds `token`.
    ///
    /// Returns true if the key was deleted.
    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool>;
}

/// Lock key guarding the stock of one product.
pub fn product_lock_key(product_id: &ProductId) -> String {
    format!("lock:product:{product_id}")
}

/// Result of a lock acquisition attempt.
#[must_use]
pub enum LockOutcome {
    /// The lock was granted; it is held until the guard is released or dropped.
    Acquired(LockGuard),
    /// Another holder owns the key.
    Held,
    /// The store was unreachable and the caller may proceed without a lock.
    Degraded,
}

impl LockOutcome {
    /// Returns true unless another holder owns the key.
    pub fn is_granted(&self) -> bool {
        !matches!(self, LockOutcome::Held)
    }
}

impl std::fmt::Debug for LockOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockOutcome::Acquired(guard) => f.debug_tuple("Acquired").field(&guard.key).finish(),
            LockOutcome::Held => f.write_str("Held"),
            LockOutcome::Degraded => f.write_str("Degraded"),
        }
    }
}

/// Key-scoped mutual exclusion with a fixed TTL.
#[derive(Clone)]
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Attempts to take `key` once, without waiting.
    #[tracing::instrument(skip(self))]
    pub async fn try_acquire(&self, key: &str) -> LockOutcome {
        let token = Uuid::new_v4().to_string();

        match self.backend.try_set(key, &token, self.ttl).await {
            Ok(true) => LockOutcome::Acquired(LockGuard {
                backend: self.backend.clone(),
                key: key.to_string(),
                token,
                released: false,
            }),
            Ok(false) => {
                tracing::debug!(key, "lock held by another owner");
                LockOutcome::Held
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "lock store unreachable, granting in degraded mode");
                metrics::counter!("lock_degraded_total").increment(1);
                LockOutcome::Degraded
            }
        }
    }
}

/// Ownership of an acquired lock.
///
/// Dropping an unreleased guard spawns the release on the current tokio
/// runtime; the TTL covers the case where no runtime is available.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock if this guard still owns it.
    ///
    /// Returns false if the key had already expired or changed hands.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        self.backend.release_if_owner(&key, &token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let backend = self.backend.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.release_if_owner(&key, &token).await {
                        tracing::warn!(%key, error = %e, "failed to release dropped lock");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(%key, "no runtime to release dropped lock, leaving it to expire");
            }
        }
    }
}
