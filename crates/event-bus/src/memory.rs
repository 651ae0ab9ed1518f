use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::OrderEvent;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::{EventBus, EventBusError, Result, Subscription};

#[derive(Debug, Default)]
struct State {
    subscribers: Vec<mpsc::UnboundedSender<OrderEvent>>,
    published: Vec<OrderEvent>,
}

/// In-process event bus.
///
/// Every subscriber gets its own unbounded channel. Published events are also
/// kept in a history for inspection in tests.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<State>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes publish and subscribe fail with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every event successfully published so far.
    pub fn published(&self) -> Vec<OrderEvent> {
        self.lock_state().published.clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock_state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventBusError::Unavailable)
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        self.ensure_available()?;

        let mut state = self.lock_state();
        state.subscribers.retain(|tx| tx.send(event).is_ok());
        state.published.push(event);

        tracing::debug!(
            event_type = event.event_type(),
            order_id = %event.order_id(),
            subscribers = state.subscribers.len(),
            "published event"
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        self.ensure_available()?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_state().subscribers.push(tx);

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        });
        Ok(Box::pin(events))
    }
}
