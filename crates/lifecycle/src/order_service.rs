//! Order creation and the guarded status transitions that follow it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use coordination::{
    CoordinationBackend, DelayQueueEntry, DistributedLock, LockOutcome, product_lock_key,
};
use domain::{
    AddressId, CartLine, Notification, Order, OrderEvent, OrderId, OrderItem, OrderStatus,
    ProductId, ProductSnapshot, UserId,
};
use event_bus::EventBus;
use order_store::{OrderBackend, OrderTransaction};

use crate::clock::{Clock, SystemClock};
use crate::{LifecycleConfig, LifecycleError, Result};

/// Converts carts into orders and drives orders through their statuses.
///
/// Stock is protected by conditional decrements inside the order
/// transaction. Per-product locks are taken first so that concurrent
/// checkouts of the same product fail fast with
/// [`LifecycleError::Conflict`] instead of queueing on row locks.
pub struct OrderService<S, C, B>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus,
{
    store: S,
    coordination: C,
    lock: DistributedLock,
    bus: B,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl<S, C, B> OrderService<S, C, B>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus,
{
    pub fn new(store: S, coordination: C, bus: B, config: LifecycleConfig) -> Self {
        let lock = DistributedLock::new(Arc::new(coordination.clone()), config.lock_ttl);
        Self {
            store,
            coordination,
            lock,
            bus,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the wall clock, used to schedule payment deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Creates an order from the user's selected cart lines.
    ///
    /// On success the order is committed in `pending_payment`, the consumed
    /// cart lines are gone and stock has been decremented. Publishing the
    /// `created` event, scheduling the payment timeout and notifying the user
    /// happen after commit and never fail the call.
    #[tracing::instrument(skip_all, fields(%user_id, %address_id))]
    pub async fn create_order(&self, user_id: UserId, address_id: AddressId) -> Result<Order> {
        let started = Instant::now();
        let result = self.place_order(user_id, address_id).await;

        match &result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                metrics::histogram!("order_create_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(
                    order_id = %order.id,
                    order_no = %order.order_no,
                    units = order.total_quantity(),
                    total = %order.total,
                    "order created"
                );
            }
            Err(e) => {
                metrics::counter!("orders_create_rejected_total", "reason" => e.reason())
                    .increment(1);
                tracing::info!(reason = e.reason(), error = %e, "order rejected");
            }
        }
        result
    }

    async fn place_order(&self, user_id: UserId, address_id: AddressId) -> Result<Order> {
        if !self.store.address_exists(user_id, address_id).await? {
            return Err(LifecycleError::AddressNotFound);
        }

        let mut tx = self.store.begin().await?;

        let lines = tx.selected_cart_lines(user_id).await?;
        if lines.is_empty() {
            return abort(tx, LifecycleError::EmptyCart).await;
        }

        let mut snapshots: HashMap<ProductId, ProductSnapshot> = HashMap::new();
        for line in &lines {
            if snapshots.contains_key(&line.product_id) {
                continue;
            }
            match tx.product_snapshot(&line.product_id).await? {
                Some(snapshot) => {
                    snapshots.insert(line.product_id.clone(), snapshot);
                }
                None => {
                    let missing = LifecycleError::ProductNotFound(line.product_id.clone());
                    return abort(tx, missing).await;
                }
            }
        }

        let mut by_product: BTreeMap<&ProductId, Vec<&CartLine>> = BTreeMap::new();
        for line in &lines {
            by_product.entry(&line.product_id).or_default().push(line);
        }

        for (product_id, product_lines) in by_product {
            let outcome = self.lock.try_acquire(&product_lock_key(product_id)).await;
            if !outcome.is_granted() {
                return abort(tx, LifecycleError::Conflict).await;
            }

            let mut shortfall = false;
            for line in product_lines {
                if !tx.conditional_decrement(product_id, line.quantity).await? {
                    shortfall = true;
                    break;
                }
            }

            if let LockOutcome::Acquired(guard) = outcome
                && let Err(e) = guard.release().await
            {
                tracing::warn!(%product_id, error = %e, "failed to release product lock");
            }

            if shortfall {
                let product_name = snapshots
                    .get(product_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| product_id.to_string());
                return abort(tx, LifecycleError::InsufficientStock { product_name }).await;
            }
        }

        let items: Vec<OrderItem> = lines
            .iter()
            .filter_map(|line| {
                snapshots
                    .get(&line.product_id)
                    .map(|snapshot| OrderItem::from_cart_line(line, snapshot))
            })
            .collect();
        let order = match Order::place(user_id, address_id, items, self.clock.now()) {
            Ok(order) => order,
            Err(e) => return abort(tx, e.into()).await,
        };

        tx.insert_order(&order).await?;
        let line_ids: Vec<_> = lines.iter().map(|l| l.id).collect();
        tx.remove_cart_lines(&line_ids).await?;
        tx.commit().await?;

        self.after_commit(&order).await;
        Ok(order)
    }

    /// Best-effort side effects of a committed order.
    async fn after_commit(&self, order: &Order) {
        if let Err(e) = self
            .bus
            .publish(OrderEvent::created(order.id, order.user_id))
            .await
        {
            metrics::counter!("event_publish_failures_total", "event_type" => "created")
                .increment(1);
            tracing::warn!(order_id = %order.id, error = %e, "failed to publish created event");
        }

        let entry = DelayQueueEntry::new(order.id, order.user_id);
        let due_at = self.config.payment_deadline(order.created_at);
        if let Err(e) = self.coordination.enqueue(entry, due_at).await {
            tracing::warn!(
                order_id = %order.id,
                error = %e,
                "failed to schedule payment timeout, order will not auto-cancel"
            );
        }

        if let Err(e) = self.store.notify(Notification::order_created(order)).await {
            tracing::warn!(order_id = %order.id, error = %e, "failed to send order notification");
        }
    }

    /// Returns one of the user's orders.
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(LifecycleError::OrderNotFound(order_id))
    }

    /// The user's orders, newest first.
    pub async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(user_id, status).await?)
    }

    /// Number of the user's orders in each status, zero-filled.
    pub async fn status_counts(&self, user_id: UserId) -> Result<BTreeMap<OrderStatus, u64>> {
        let counts = self.store.status_counts(user_id).await?;
        Ok(OrderStatus::ALL
            .iter()
            .map(|status| (*status, counts.get(status).copied().unwrap_or(0)))
            .collect())
    }

    /// Simulated payment: `pending_payment -> paid`.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.get_order(user_id, order_id).await?;
        self.transition(order, OrderStatus::Paid).await
    }

    /// Operator action: `paid -> shipped`.
    #[tracing::instrument(skip(self))]
    pub async fn ship_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(LifecycleError::OrderNotFound(order_id))?;
        self.transition(order, OrderStatus::Shipped).await
    }

    /// `shipped -> delivered`.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_receipt(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.get_order(user_id, order_id).await?;
        self.transition(order, OrderStatus::Delivered).await
    }

    /// Review step: `delivered -> completed`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.get_order(user_id, order_id).await?;
        self.transition(order, OrderStatus::Completed).await
    }

    /// `completed -> after_sales`.
    #[tracing::instrument(skip(self))]
    pub async fn apply_after_sales(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.get_order(user_id, order_id).await?;
        self.transition(order, OrderStatus::AfterSales).await
    }

    async fn transition(&self, order: Order, target: OrderStatus) -> Result<Order> {
        order.status.ensure_transition(target)?;

        let applied = self
            .store
            .transition_status(order.id, order.status, target)
            .await?;
        if !applied {
            return Err(LifecycleError::PreconditionFailed {
                order_id: order.id,
                expected: order.status,
                target,
            });
        }

        tracing::info!(order_id = %order.id, from = %order.status, to = %target, "order status changed");
        self.store
            .get_order(order.id)
            .await?
            .ok_or(LifecycleError::OrderNotFound(order.id))
    }
}

/// Rolls back `tx` and fails with `error`.
async fn abort<T, Tx: OrderTransaction>(tx: Tx, error: LifecycleError) -> Result<T> {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::InMemoryCoordinator;
    use domain::Money;
    use event_bus::InMemoryEventBus;
    use order_store::{CartStore, InMemoryStore, InventoryStore, OrderStore};

    struct Fixture {
        service: OrderService<InMemoryStore, InMemoryCoordinator, InMemoryEventBus>,
        store: InMemoryStore,
        coordinator: InMemoryCoordinator,
        bus: InMemoryEventBus,
        user: UserId,
        address: AddressId,
    }

    async fn fixture() -> Fixture {
        use order_store::AddressBook;

        let store = InMemoryStore::new();
        let coordinator = InMemoryCoordinator::new();
        let bus = InMemoryEventBus::new();
        let user = UserId::new();
        let address = AddressId::new();
        store.add_address(user, address).await.unwrap();
        store.seed_product("P1", "Keyboard", Money::from_cents(4_500), 10);
        store.seed_product("P2", "Mouse", Money::from_cents(2_000), 1);

        let service = OrderService::new(
            store.clone(),
            coordinator.clone(),
            bus.clone(),
            LifecycleConfig::default(),
        );
        Fixture {
            service,
            store,
            coordinator,
            bus,
            user,
            address,
        }
    }

    #[tokio::test]
    async fn create_order_snapshots_cart_and_schedules_timeout() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 2)).await.unwrap();
        f.store.add_line(CartLine::new(f.user, "P2", 1)).await.unwrap();

        let order = f.service.create_order(f.user, f.address).await.unwrap();

        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.total, Money::from_cents(11_000));
        assert_eq!(f.store.stock(&ProductId::new("P1")).await.unwrap(), Some(8));
        assert_eq!(f.store.stock(&ProductId::new("P2")).await.unwrap(), Some(0));
        assert_eq!(f.store.cart_line_count(f.user), 0);

        assert_eq!(
            f.bus.published(),
            vec![OrderEvent::created(order.id, f.user)]
        );
        let entry = DelayQueueEntry::new(order.id, f.user);
        let due_at = f.coordinator.due_at(&entry).unwrap();
        let deadline = order.created_at + chrono::Duration::minutes(30);
        assert_eq!(due_at.timestamp(), coordination::due_score(deadline));
        assert!(due_at >= deadline);
        assert_eq!(f.store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn unknown_address_is_rejected_before_touching_stock() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();

        let result = f.service.create_order(f.user, AddressId::new()).await;

        assert!(matches!(result, Err(LifecycleError::AddressNotFound)));
        assert_eq!(f.store.stock(&ProductId::new("P1")).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let f = fixture().await;
        f.store
            .add_line(CartLine::new(f.user, "P1", 1).unselected())
            .await
            .unwrap();

        let result = f.service.create_order(f.user, f.address).await;
        assert!(matches!(result, Err(LifecycleError::EmptyCart)));
    }

    #[tokio::test]
    async fn unknown_product_is_rejected() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        f.store.add_line(CartLine::new(f.user, "GONE", 1)).await.unwrap();

        let result = f.service.create_order(f.user, f.address).await;

        assert!(matches!(result, Err(LifecycleError::ProductNotFound(id)) if id.as_str() == "GONE"));
        assert_eq!(f.store.cart_line_count(f.user), 2);
    }

    #[tokio::test]
    async fn shortfall_rolls_back_earlier_decrements() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 3)).await.unwrap();
        f.store.add_line(CartLine::new(f.user, "P2", 2)).await.unwrap();

        let result = f.service.create_order(f.user, f.address).await;

        assert!(matches!(
            result,
            Err(LifecycleError::InsufficientStock { ref product_name }) if product_name == "Mouse"
        ));
        assert_eq!(f.store.stock(&ProductId::new("P1")).await.unwrap(), Some(10));
        assert_eq!(f.store.stock(&ProductId::new("P2")).await.unwrap(), Some(1));
        assert_eq!(f.store.order_count(), 0);
        assert!(f.bus.published().is_empty());
        assert!(!f.coordinator.is_locked("lock:product:P1"));
        assert!(!f.coordinator.is_locked("lock:product:P2"));
    }

    #[tokio::test]
    async fn lines_of_one_product_share_the_stock_guard() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P2", 1)).await.unwrap();
        f.store
            .add_line(CartLine::new(f.user, "P2", 1).with_sku("P2-BLACK"))
            .await
            .unwrap();

        let result = f.service.create_order(f.user, f.address).await;

        assert!(matches!(result, Err(LifecycleError::InsufficientStock { .. })));
        assert_eq!(f.store.stock(&ProductId::new("P2")).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn held_lock_fails_with_conflict() {
        use coordination::LockBackend;

        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        f.coordinator
            .try_set("lock:product:P1", "other-request", std::time::Duration::from_secs(5))
            .await
            .unwrap();

        let result = f.service.create_order(f.user, f.address).await;

        assert!(matches!(result, Err(LifecycleError::Conflict)));
        assert_eq!(f.store.stock(&ProductId::new("P1")).await.unwrap(), Some(10));
        assert_eq!(f.store.cart_line_count(f.user), 1);
    }

    #[tokio::test]
    async fn degraded_coordination_still_creates_order() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        f.coordinator.set_available(false);

        let order = f.service.create_order(f.user, f.address).await.unwrap();

        assert_eq!(f.store.stock(&ProductId::new("P1")).await.unwrap(), Some(9));
        assert!(f.store.get_order(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bus_outage_does_not_fail_committed_order() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        f.bus.set_available(false);

        let order = f.service.create_order(f.user, f.address).await.unwrap();

        assert!(f.bus.published().is_empty());
        assert!(f.coordinator.due_at(&DelayQueueEntry::new(order.id, f.user)).is_some());
    }

    #[tokio::test]
    async fn orders_are_scoped_to_their_owner() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        let order = f.service.create_order(f.user, f.address).await.unwrap();

        assert_eq!(f.service.get_order(f.user, order.id).await.unwrap().id, order.id);
        assert!(matches!(
            f.service.get_order(UserId::new(), order.id).await,
            Err(LifecycleError::OrderNotFound(_))
        ));
        assert!(matches!(
            f.service.pay_order(UserId::new(), order.id).await,
            Err(LifecycleError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn full_status_walk() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        let order = f.service.create_order(f.user, f.address).await.unwrap();

        let paid = f.service.pay_order(f.user, order.id).await.unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        let shipped = f.service.ship_order(order.id).await.unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        let delivered = f.service.confirm_receipt(f.user, order.id).await.unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        let completed = f.service.complete_order(f.user, order.id).await.unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        let after_sales = f.service.apply_after_sales(f.user, order.id).await.unwrap();
        assert_eq!(after_sales.status, OrderStatus::AfterSales);

        let counts = f.service.status_counts(f.user).await.unwrap();
        assert_eq!(counts[&OrderStatus::AfterSales], 1);
        assert_eq!(counts[&OrderStatus::PendingPayment], 0);
        assert_eq!(counts.len(), OrderStatus::ALL.len());
    }

    #[tokio::test]
    async fn skipping_a_status_is_an_invalid_transition() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        let order = f.service.create_order(f.user, f.address).await.unwrap();

        let result = f.service.ship_order(order.id).await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: OrderStatus::PendingPayment,
                to: OrderStatus::Shipped
            })
        ));
    }

    #[tokio::test]
    async fn paying_twice_is_rejected() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        let order = f.service.create_order(f.user, f.address).await.unwrap();
        f.service.pay_order(f.user, order.id).await.unwrap();

        let result = f.service.pay_order(f.user, order.id).await;
        assert!(matches!(result, Err(LifecycleError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn list_orders_filters_by_status() {
        let f = fixture().await;
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        let first = f.service.create_order(f.user, f.address).await.unwrap();
        f.store.add_line(CartLine::new(f.user, "P1", 1)).await.unwrap();
        f.service.create_order(f.user, f.address).await.unwrap();
        f.service.pay_order(f.user, first.id).await.unwrap();

        assert_eq!(f.service.list_orders(f.user, None).await.unwrap().len(), 2);
        let paid = f
            .service
            .list_orders(f.user, Some(OrderStatus::Paid))
            .await
            .unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].id, first.id);
    }
}
