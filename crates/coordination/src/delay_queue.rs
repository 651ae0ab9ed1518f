//! Time-ordered queue of pending order timeouts.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{OrderId, UserId};

use crate::{CoordinationError, Result};

/// Sorted-set key holding all pending timeouts.
pub const DELAY_QUEUE_KEY: &str = "order:delay_queue";

/// A pending timeout, encoded as `"{order_id}:{user_id}"` in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayQueueEntry {
    pub order_id: OrderId,
    pub user_id: UserId,
}

impl DelayQueueEntry {
    pub fn new(order_id: OrderId, user_id: UserId) -> Self {
        Self { order_id, user_id }
    }

    /// Queue member representation.
    pub fn member(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for DelayQueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.order_id, self.user_id)
    }
}

impl FromStr for DelayQueueEntry {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoordinationError::InvalidEntry(s.to_string());
        let (order, user) = s.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            order_id: order.parse().map_err(|_| invalid())?,
            user_id: user.parse().map_err(|_| invalid())?,
        })
    }
}

/// Queue score for `due_at`: epoch seconds rounded up.
///
/// Readers compare scores against the floored current second, so an entry
/// never becomes due before its exact due time.
pub fn due_score(due_at: DateTime<Utc>) -> i64 {
    due_at.timestamp() + i64::from(due_at.timestamp_subsec_nanos() > 0)
}

/// Shared set of timeout tasks scored by due time.
///
/// Several schedulers may poll the same queue; [`DelayQueue::claim`] is the
/// single point where exactly one of them wins an entry.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    /// Adds an entry due at `due_at`, replacing the due time if already queued.
    async fn enqueue(&self, entry: DelayQueueEntry, due_at: DateTime<Utc>) -> Result<()>;

    /// Up to `limit` entries whose due time is at or before `now`, earliest
    /// first. Entries are not removed.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DelayQueueEntry>>;

    /// Removes `entry` if still present. True means the caller owns it.
    async fn claim(&self, entry: &DelayQueueEntry) -> Result<bool>;

    /// Number of queued entries.
    async fn len(&self) -> Result<u64>;
}
