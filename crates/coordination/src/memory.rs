use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{CoordinationError, DelayQueue, DelayQueueEntry, LockBackend, Result, due_score};

#[derive(Debug, Default)]
struct State {
    locks: HashMap<String, (String, Instant)>,
    queue: HashMap<DelayQueueEntry, i64>,
}

/// In-process lock table and delay queue.
///
/// Mirrors the Redis semantics closely enough for tests and single-node
/// deployments, including TTL expiry. [`InMemoryCoordinator::set_available`]
/// simulates an unreachable store.
#[derive(Debug, Clone)]
pub struct InMemoryCoordinator {
    state: Arc<Mutex<State>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns true if `key` is currently locked.
    pub fn is_locked(&self, key: &str) -> bool {
        let state = self.lock_state();
        state
            .locks
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }

    /// Due time of a queued entry as stored, rounded up to whole seconds.
    pub fn due_at(&self, entry: &DelayQueueEntry) -> Option<DateTime<Utc>> {
        let score = *self.lock_state().queue.get(entry)?;
        DateTime::from_timestamp(score, 0)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinationError::Unavailable)
        }
    }
}

#[async_trait]
impl LockBackend for InMemoryCoordinator {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut state = self.lock_state();

        if let Some((_, expires_at)) = state.locks.get(key)
            && *expires_at > now
        {
            return Ok(false);
        }
        state
            .locks
            .insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool> {
        self.ensure_available()?;
        let mut state = self.lock_state();

        let owned = matches!(
            state.locks.get(key),
            Some((owner, expires_at)) if owner == token && *expires_at > Instant::now()
        );
        if owned {
            state.locks.remove(key);
        }
        Ok(owned)
    }
}

#[async_trait]
impl DelayQueue for InMemoryCoordinator {
    async fn enqueue(&self, entry: DelayQueueEntry, due_at: DateTime<Utc>) -> Result<()> {
        self.ensure_available()?;
        self.lock_state().queue.insert(entry, due_score(due_at));
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DelayQueueEntry>> {
        self.ensure_available()?;
        let cutoff = now.timestamp();
        let state = self.lock_state();

        let mut due: Vec<_> = state
            .queue
            .iter()
            .filter(|(_, score)| **score <= cutoff)
            .map(|(entry, score)| (*score, entry.member(), *entry))
            .collect();
        due.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, _, entry)| entry)
            .collect())
    }

    async fn claim(&self, entry: &DelayQueueEntry) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.lock_state().queue.remove(entry).is_some())
    }

    async fn len(&self) -> Result<u64> {
        self.ensure_available()?;
        Ok(self.lock_state().queue.len() as u64)
    }
}
