use std::time::Duration;

use chrono::{DateTime, Utc};

/// Tunables of the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long an order may stay unpaid before it is cancelled.
    pub order_timeout: Duration,
    /// TTL of per-product locks taken during order creation.
    pub lock_ttl: Duration,
    /// Interval between delay queue polls.
    pub scheduler_tick: Duration,
    /// Maximum due entries handled per poll.
    pub scheduler_batch_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            order_timeout: Duration::from_secs(30 * 60),
            lock_ttl: Duration::from_secs(5),
            scheduler_tick: Duration::from_secs(1),
            scheduler_batch_size: 10,
        }
    }
}

impl LifecycleConfig {
    /// Time at which an order placed at `placed_at` times out.
    pub fn payment_deadline(&self, placed_at: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.order_timeout)
            .ok()
            .and_then(|timeout| placed_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
