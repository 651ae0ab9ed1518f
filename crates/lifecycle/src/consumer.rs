//! Cancels orders that are still unpaid when their timeout fires.

use domain::{Notification, OrderEvent, OrderId, OrderStatus};
use event_bus::{EventBus, Subscription};
use futures_util::StreamExt;
use order_store::{OrderBackend, OrderTransaction};
use tokio::sync::watch;

use crate::Result;

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The order was cancelled and its stock restored.
    Cancelled,
    /// The order had already left `pending_payment`.
    AlreadyResolved(OrderStatus),
    /// No such order.
    OrderMissing,
    /// Not a timeout event.
    Ignored,
}

/// Subscriber reacting to `timeout` events.
///
/// Cancellation is a guarded `pending_payment -> cancelled` update, so
/// redelivered or duplicated timeouts restore stock at most once.
pub struct TimeoutConsumer<S, B>
where
    S: OrderBackend,
    B: EventBus,
{
    store: S,
    bus: B,
}

impl<S, B> TimeoutConsumer<S, B>
where
    S: OrderBackend,
    B: EventBus,
{
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    /// Opens the subscription [`TimeoutConsumer::run`] reads from.
    pub async fn subscribe(&self) -> Result<Subscription> {
        Ok(self.bus.subscribe().await?)
    }

    #[tracing::instrument(skip(self), fields(event_type = event.event_type(), order_id = %event.order_id()))]
    pub async fn handle(&self, event: OrderEvent) -> Result<ConsumeOutcome> {
        match event {
            OrderEvent::Timeout { order_id, .. } => self.cancel_if_unpaid(order_id).await,
            OrderEvent::Created { .. } | OrderEvent::Cancelled { .. } => {
                tracing::debug!("observed order event");
                Ok(ConsumeOutcome::Ignored)
            }
        }
    }

    async fn cancel_if_unpaid(&self, order_id: OrderId) -> Result<ConsumeOutcome> {
        let Some(order) = self.store.get_order(order_id).await? else {
            tracing::warn!("timeout for unknown order");
            return Ok(ConsumeOutcome::OrderMissing);
        };
        if order.status != OrderStatus::PendingPayment {
            tracing::debug!(status = %order.status, "order no longer awaiting payment");
            return Ok(ConsumeOutcome::AlreadyResolved(order.status));
        }

        let mut tx = self.store.begin().await?;
        let cancelled = tx
            .transition_status(order_id, OrderStatus::PendingPayment, OrderStatus::Cancelled)
            .await?;
        if !cancelled {
            tx.rollback().await?;
            let current = self
                .store
                .get_order(order_id)
                .await?
                .map_or(OrderStatus::Cancelled, |o| o.status);
            tracing::debug!(status = %current, "order resolved concurrently");
            return Ok(ConsumeOutcome::AlreadyResolved(current));
        }

        for (product_id, quantity) in order.quantities_by_product() {
            if !tx.conditional_increment(&product_id, quantity).await? {
                tracing::warn!(%product_id, quantity, "product gone, stock not restored");
            }
        }
        tx.commit().await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(
            order_no = %order.order_no,
            restored_units = order.total_quantity(),
            "unpaid order cancelled"
        );

        if let Err(e) = self.store.notify(Notification::order_timed_out(&order)).await {
            tracing::warn!(error = %e, "failed to send cancellation notification");
        }
        if let Err(e) = self
            .bus
            .publish(OrderEvent::cancelled(order.id, order.user_id))
            .await
        {
            metrics::counter!("event_publish_failures_total", "event_type" => "cancelled")
                .increment(1);
            tracing::warn!(error = %e, "failed to publish cancelled event");
        }

        Ok(ConsumeOutcome::Cancelled)
    }

    /// Handles events one at a time until shutdown or the stream ends.
    pub async fn run(self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("timeout consumer started");

        loop {
            tokio::select! {
                next = subscription.next() => match next {
                    Some(Ok(event)) => {
                        if let Err(e) = self.handle(event).await {
                            tracing::error!(
                                order_id = %event.order_id(),
                                error = %e,
                                "failed to handle order event"
                            );
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "discarding undecodable event");
                    }
                    None => {
                        tracing::warn!("event subscription closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("timeout consumer stopped");
    }
}
