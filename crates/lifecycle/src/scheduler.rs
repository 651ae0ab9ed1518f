//! Turns due delay queue entries into `timeout` events.

use std::sync::Arc;
use std::time::Duration;

use coordination::DelayQueue;
use domain::OrderEvent;
use event_bus::EventBus;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, SystemClock};
use crate::{LifecycleConfig, Result};

/// Polls the delay queue at a fixed interval.
///
/// Any number of schedulers may share one queue: an entry is published only
/// by the scheduler whose claim removed it. If the publish fails after a
/// successful claim the timeout is lost and only logged.
pub struct TimeoutScheduler<Q, B>
where
    Q: DelayQueue,
    B: EventBus,
{
    queue: Q,
    bus: B,
    clock: Arc<dyn Clock>,
    tick: Duration,
    batch_size: usize,
}

impl<Q, B> TimeoutScheduler<Q, B>
where
    Q: DelayQueue,
    B: EventBus,
{
    pub fn new(queue: Q, bus: B, config: &LifecycleConfig) -> Self {
        Self {
            queue,
            bus,
            clock: Arc::new(SystemClock),
            tick: config.scheduler_tick,
            batch_size: config.scheduler_batch_size,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Handles one batch of due entries.
    ///
    /// Returns the number of `timeout` events published.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.queue.due(now, self.batch_size).await?;
        let mut published = 0;

        for entry in due {
            match self.queue.claim(&entry).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(%entry, "timeout claimed by another scheduler");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%entry, error = %e, "failed to claim timeout");
                    continue;
                }
            }
            metrics::counter!("order_timeouts_claimed_total").increment(1);

            let event = OrderEvent::timeout(entry.order_id, entry.user_id);
            match self.bus.publish(event).await {
                Ok(()) => {
                    published += 1;
                    tracing::info!(order_id = %entry.order_id, "published order timeout");
                }
                Err(e) => {
                    metrics::counter!("event_publish_failures_total", "event_type" => "timeout")
                        .increment(1);
                    tracing::error!(
                        order_id = %entry.order_id,
                        error = %e,
                        "claimed timeout could not be published and is lost"
                    );
                }
            }
        }

        Ok(published)
    }

    /// Runs ticks until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick = ?self.tick, batch_size = self.batch_size, "timeout scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "timeout scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("timeout scheduler stopped");
    }
}
