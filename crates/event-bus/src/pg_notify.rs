//! Cross-process event bus over PostgreSQL `LISTEN/NOTIFY`.
//!
//! Each event is sent as its JSON encoding on [`CHANNEL`]. Notifications are
//! not persisted: a listener that is disconnected when an event is published
//! never sees it.

use async_trait::async_trait;
use domain::OrderEvent;
use futures_util::StreamExt;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use crate::{EventBus, EventBusError, Result, Subscription};

/// Notification channel carrying order events.
pub const CHANNEL: &str = "order_events";

/// Event bus shared by every engine instance connected to the same database.
#[derive(Clone)]
pub struct PgNotifyEventBus {
    pool: PgPool,
}

impl PgNotifyEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventBus for PgNotifyEventBus {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANNEL)
            .bind(&payload)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            event_type = event.event_type(),
            order_id = %event.order_id(),
            "published event"
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANNEL).await?;

        let events = listener.into_stream().map(|notification| {
            let notification = notification.map_err(EventBusError::from)?;
            serde_json::from_str::<OrderEvent>(notification.payload()).map_err(EventBusError::from)
        });
        Ok(Box::pin(events))
    }
}
