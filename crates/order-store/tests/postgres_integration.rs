//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration
//! ```

use std::sync::Arc;

use domain::{
    AddressId, CartLine, Money, Notification, Order, OrderItem, OrderStatus, ProductId,
    ProductSnapshot, UserId,
};
use order_store::{
    AddressBook, CartStore, InventoryStore, NotificationSink, OrderStore, OrderTransaction,
    PostgresStore, ProductCatalog, StoreError,
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

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
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

    PostgresStore::new(pool)
}

async fn seed_product(store: &PostgresStore, id: &str, price: i64, stock: u32) -> ProductId {
    let product_id = ProductId::new(id);
    store
        .upsert_product(
            &product_id,
            ProductSnapshot::new(id, Money::from_cents(price), format!("/images/{id}.png")),
        )
        .await
        .unwrap();
    assert!(store.set_stock(&product_id, stock).await.unwrap());
    product_id
}

fn order_for(user_id: UserId, product_id: &ProductId, quantity: u32) -> Order {
    let line = CartLine::new(user_id, product_id.clone(), quantity);
    let snapshot = ProductSnapshot::new("Widget", Money::from_cents(500), "w.png");
    Order::place(
        user_id,
        AddressId::new(),
        vec![OrderItem::from_cart_line(&line, &snapshot)],
        chrono::Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn conditional_decrement_guards_stock() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-1", 500, 3).await;

    assert!(store.conditional_decrement(&product, 3).await.unwrap());
    assert!(!store.conditional_decrement(&product, 1).await.unwrap());
    assert_eq!(store.stock(&product).await.unwrap(), Some(0));

    assert!(store.conditional_increment(&product, 2).await.unwrap());
    assert_eq!(store.stock(&product).await.unwrap(), Some(2));
}

#[tokio::test]
#[serial]
async fn concurrent_decrements_never_overdraw() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-HOT", 500, 5).await;

    let attempts = (0..20).map(|_| {
        let store = store.clone();
        let product = product.clone();
        async move { store.conditional_decrement(&product, 1).await.unwrap() }
    });
    let results = futures_util::future::join_all(attempts).await;

    assert_eq!(results.into_iter().filter(|applied| *applied).count(), 5);
    assert_eq!(store.stock(&product).await.unwrap(), Some(0));
}

#[tokio::test]
#[serial]
async fn committed_order_round_trips_with_items() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-1", 500, 10).await;
    let user = UserId::new();
    let line = CartLine::new(user, product.clone(), 2).with_sku("SKU-1-RED");
    store.add_line(line.clone()).await.unwrap();
    store
        .add_line(CartLine::new(user, product.clone(), 1).unselected())
        .await
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    let lines = tx.selected_cart_lines(user).await.unwrap();
    assert_eq!(lines, vec![line.clone()]);
    let snapshot = tx.product_snapshot(&product).await.unwrap().unwrap();
    assert!(tx.conditional_decrement(&product, 2).await.unwrap());
    let order = Order::place(
        user,
        AddressId::new(),
        vec![OrderItem::from_cart_line(&line, &snapshot)],
        chrono::Utc::now(),
    )
    .unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.remove_cart_lines(&[line.id]).await.unwrap();
    tx.commit().await.unwrap();

    let stored = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.order_no, order.order_no);
    assert_eq!(stored.status, OrderStatus::PendingPayment);
    assert_eq!(stored.total, Money::from_cents(1000));
    assert_eq!(stored.items, order.items);
    assert_eq!(store.stock(&product).await.unwrap(), Some(8));
    assert_eq!(store.selected_lines(user).await.unwrap().len(), 0);
}

#[tokio::test]
#[serial]
async fn dropped_transaction_rolls_back() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-1", 500, 4).await;
    let order = order_for(UserId::new(), &product, 4);

    {
        let mut tx = store.begin().await.unwrap();
        assert!(tx.conditional_decrement(&product, 4).await.unwrap());
        tx.insert_order(&order).await.unwrap();
        tx.rollback().await.unwrap();
    }

    assert_eq!(store.stock(&product).await.unwrap(), Some(4));
    assert!(store.get_order(order.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn duplicate_order_number_is_reported() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-1", 500, 4).await;
    let first = order_for(UserId::new(), &product, 1);
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&first).await.unwrap();
    tx.commit().await.unwrap();

    let mut clash = order_for(UserId::new(), &product, 1);
    clash.order_no = first.order_no.clone();
    let mut tx = store.begin().await.unwrap();
    let result = tx.insert_order(&clash).await;

    assert!(matches!(result, Err(StoreError::DuplicateOrderNumber(_))));
}

#[tokio::test]
#[serial]
async fn guarded_transition_and_counts() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-1", 500, 4).await;
    let user = UserId::new();
    let first = order_for(user, &product, 1);
    let second = order_for(user, &product, 1);
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&first).await.unwrap();
    tx.insert_order(&second).await.unwrap();
    tx.commit().await.unwrap();

    assert!(
        store
            .transition_status(first.id, OrderStatus::PendingPayment, OrderStatus::Cancelled)
            .await
            .unwrap()
    );
    assert!(
        !store
            .transition_status(first.id, OrderStatus::PendingPayment, OrderStatus::Paid)
            .await
            .unwrap()
    );

    let cancelled = store
        .list_orders(user, Some(OrderStatus::Cancelled))
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, first.id);
    assert_eq!(store.list_orders(user, None).await.unwrap().len(), 2);

    let counts = store.status_counts(user).await.unwrap();
    assert_eq!(counts.get(&OrderStatus::Cancelled), Some(&1));
    assert_eq!(counts.get(&OrderStatus::PendingPayment), Some(&1));
}

#[tokio::test]
#[serial]
async fn addresses_and_notifications() {
    let store = get_test_store().await;
    let user = UserId::new();
    let address = AddressId::new();

    assert!(!store.address_exists(user, address).await.unwrap());
    store.add_address(user, address).await.unwrap();
    store.add_address(user, address).await.unwrap();
    assert!(store.address_exists(user, address).await.unwrap());
    assert!(!store.address_exists(UserId::new(), address).await.unwrap());

    store
        .notify(Notification::new(user, "Hello", "World"))
        .await
        .unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
        .bind(user.as_uuid())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
