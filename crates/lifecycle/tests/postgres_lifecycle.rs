//! Order lifecycle over PostgreSQL
//!
//! Drives the service and the timeout consumer against a real database so the
//! row locks and conditional updates are the ones production relies on.
//! Run with:
//!
//! ```bash
//! cargo test -p lifecycle --test postgres_lifecycle
//! ```

use std::sync::Arc;

use chrono::Utc;
use coordination::InMemoryCoordinator;
use domain::{
    AddressId, CartLine, Money, OrderEvent, OrderStatus, ProductId, ProductSnapshot, UserId,
};
use event_bus::InMemoryEventBus;
use futures_util::StreamExt;
use lifecycle::{
    ConsumeOutcome, LifecycleConfig, LifecycleError, ManualClock, OrderService, TimeoutConsumer,
    TimeoutScheduler,
};
use order_store::{
    AddressBook, CartStore, InventoryStore, OrderStore, PostgresStore, ProductCatalog,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_order_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

type Service = OrderService<PostgresStore, InMemoryCoordinator, InMemoryEventBus>;

struct Harness {
    store: PostgresStore,
    coordinator: InMemoryCoordinator,
    bus: InMemoryEventBus,
    clock: ManualClock,
    config: LifecycleConfig,
    service: Arc<Service>,
}

/// Fresh pool over cleared tables, with in-process coordination and bus.
async fn harness() -> Harness {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_items, orders, cart_lines, addresses, products, notifications",
    )
    .execute(&pool)
    .await
    .unwrap();

    let store = PostgresStore::new(pool);
    let coordinator = InMemoryCoordinator::new();
    let bus = InMemoryEventBus::new();
    let clock = ManualClock::new(Utc::now());
    let config = LifecycleConfig::default();
    let service = OrderService::new(
        store.clone(),
        coordinator.clone(),
        bus.clone(),
        config.clone(),
    )
    .with_clock(Arc::new(clock.clone()));

    Harness {
        store,
        coordinator,
        bus,
        clock,
        config,
        service: Arc::new(service),
    }
}

impl Harness {
    async fn seed_product(&self, id: &str, name: &str, price: i64, stock: u32) {
        let product_id = ProductId::new(id);
        self.store
            .upsert_product(
                &product_id,
                ProductSnapshot::new(name, Money::from_cents(price), format!("/images/{id}.png")),
            )
            .await
            .unwrap();
        assert!(self.store.set_stock(&product_id, stock).await.unwrap());
    }

    /// A user with a registered address and one selected cart line.
    async fn shopper(&self, product: &str, quantity: u32) -> (UserId, AddressId) {
        let user = UserId::new();
        let address = AddressId::new();
        self.store.add_address(user, address).await.unwrap();
        self.store
            .add_line(CartLine::new(user, product, quantity))
            .await
            .unwrap();
        (user, address)
    }

    async fn stock(&self, product: &str) -> u32 {
        self.store
            .stock(&ProductId::new(product))
            .await
            .unwrap()
            .unwrap()
    }

    async fn order_count(&self, user: UserId) -> usize {
        self.store.list_orders(user, None).await.unwrap().len()
    }

    fn scheduler(&self) -> TimeoutScheduler<InMemoryCoordinator, InMemoryEventBus> {
        TimeoutScheduler::new(self.coordinator.clone(), self.bus.clone(), &self.config)
            .with_clock(Arc::new(self.clock.clone()))
    }

    fn consumer(&self) -> TimeoutConsumer<PostgresStore, InMemoryEventBus> {
        TimeoutConsumer::new(self.store.clone(), self.bus.clone())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn last_unit_is_sold_once() {
    let h = harness().await;
    h.seed_product("LAST", "Last One", 999, 1).await;
    let buyers = [h.shopper("LAST", 1).await, h.shopper("LAST", 1).await];

    let handles: Vec<_> = buyers
        .iter()
        .map(|&(user, address)| {
            let service = h.service.clone();
            tokio::spawn(async move { service.create_order(user, address).await })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for error in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                error,
                LifecycleError::Conflict | LifecycleError::InsufficientStock { .. }
            ),
            "unexpected error: {error}"
        );
    }
    assert_eq!(h.stock("LAST").await, 0);

    let orders: usize = h.order_count(buyers[0].0).await + h.order_count(buyers[1].0).await;
    assert_eq!(orders, 1);
    for (user, _) in buyers {
        let placed = h.order_count(user).await == 1;
        let remaining = h.store.selected_lines(user).await.unwrap().len();
        assert_eq!(remaining, usize::from(!placed));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn double_submit_of_one_cart_places_one_order() {
    let h = harness().await;
    h.seed_product("ONE", "Only Line", 100, 100).await;

    for _ in 0..10 {
        let (user, address) = h.shopper("ONE", 1).await;
        let before = h.stock("ONE").await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = h.service.clone();
                tokio::spawn(async move { service.create_order(user, address).await })
            })
            .collect();
        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(e) => assert!(
                    matches!(e, LifecycleError::EmptyCart | LifecycleError::Conflict),
                    "unexpected error: {e}"
                ),
            }
        }

        assert_eq!(placed, 1);
        assert_eq!(h.stock("ONE").await, before - 1);
        assert_eq!(h.order_count(user).await, 1);
        assert!(h.store.selected_lines(user).await.unwrap().is_empty());
    }
}

#[tokio::test]
#[serial]
async fn unpaid_order_is_cancelled_after_the_window() {
    let h = harness().await;
    h.seed_product("P", "Product", 1_000, 10).await;
    let (user, address) = h.shopper("P", 3).await;
    let consumer = h.consumer();
    let scheduler = h.scheduler();

    let order = h.service.create_order(user, address).await.unwrap();
    assert_eq!(h.stock("P").await, 7);
    let mut events = consumer.subscribe().await.unwrap();

    h.clock.advance(chrono::Duration::minutes(29));
    assert_eq!(scheduler.tick().await.unwrap(), 0);

    h.clock
        .advance(chrono::Duration::minutes(1) + chrono::Duration::seconds(1));
    assert_eq!(scheduler.tick().await.unwrap(), 1);

    let event = events.next().await.unwrap().unwrap();
    assert_eq!(consumer.handle(event).await.unwrap(), ConsumeOutcome::Cancelled);

    let cancelled = h.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.stock("P").await, 10);

    assert_eq!(
        consumer.handle(event).await.unwrap(),
        ConsumeOutcome::AlreadyResolved(OrderStatus::Cancelled)
    );
    assert_eq!(h.stock("P").await, 10);
}

#[tokio::test]
#[serial]
async fn paid_order_survives_its_timeout() {
    let h = harness().await;
    h.seed_product("P", "Product", 1_000, 10).await;
    let (user, address) = h.shopper("P", 2).await;
    let consumer = h.consumer();
    let scheduler = h.scheduler();

    let order = h.service.create_order(user, address).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(5));
    let paid = h.service.pay_order(user, order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    let mut events = consumer.subscribe().await.unwrap();

    h.clock.advance(chrono::Duration::minutes(26));
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    let event = events.next().await.unwrap().unwrap();

    assert_eq!(
        consumer.handle(event).await.unwrap(),
        ConsumeOutcome::AlreadyResolved(OrderStatus::Paid)
    );
    let stored = h.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(h.stock("P").await, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn payment_racing_the_timeout_has_one_winner() {
    let h = harness().await;
    h.seed_product("P", "Product", 500, 5).await;
    let (user, address) = h.shopper("P", 1).await;
    let consumer = Arc::new(h.consumer());

    let order = h.service.create_order(user, address).await.unwrap();

    let service = h.service.clone();
    let pay = tokio::spawn(async move { service.pay_order(user, order.id).await });
    let cancel = {
        let consumer = consumer.clone();
        tokio::spawn(async move {
            consumer
                .handle(OrderEvent::timeout(order.id, user))
                .await
        })
    };
    let paid = pay.await.unwrap();
    let outcome = cancel.await.unwrap().unwrap();

    let stored = h.store.get_order(order.id).await.unwrap().unwrap();
    match stored.status {
        OrderStatus::Paid => {
            assert!(paid.is_ok());
            assert_eq!(outcome, ConsumeOutcome::AlreadyResolved(OrderStatus::Paid));
            assert_eq!(h.stock("P").await, 4);
        }
        OrderStatus::Cancelled => {
            assert!(paid.is_err());
            assert_eq!(outcome, ConsumeOutcome::Cancelled);
            assert_eq!(h.stock("P").await, 5);
        }
        other => panic!("unexpected status {other}"),
    }
}
