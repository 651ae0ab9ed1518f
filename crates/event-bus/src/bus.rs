use std::pin::Pin;

use async_trait::async_trait;
use domain::OrderEvent;
use futures_core::Stream;

use crate::Result;

/// Stream of events delivered to one subscriber, in publish order.
pub type Subscription = Pin<Box<dyn Stream<Item = Result<OrderEvent>> + Send>>;

/// Asynchronous publish/subscribe channel for order lifecycle events.
///
/// Delivery is at-most-once: a failed publish is reported to the caller and
/// never retried by the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an event to every current subscriber.
    async fn publish(&self, event: OrderEvent) -> Result<()>;

    /// Opens a new subscription. Only events published afterwards are seen.
    async fn subscribe(&self) -> Result<Subscription>;
}
