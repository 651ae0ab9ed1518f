use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    AddressId, CartLine, CartLineId, Notification, Order, OrderId, OrderStatus, ProductId,
    ProductSnapshot, UserId,
};

use crate::Result;

/// Per-product stock counters.
///
/// Every mutation is a single compare-and-update evaluated by the store, so
/// concurrent callers can never drive a counter below zero.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Current stock of a product, or `None` if the product is unknown.
    async fn stock(&self, product_id: &ProductId) -> Result<Option<u32>>;

    /// Overwrites the stock of an existing product.
    ///
    /// Returns false if the product does not exist.
    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<bool>;

    /// `stock -= quantity` guarded by `stock >= quantity`.
    ///
    /// Returns true if the guard held and the decrement was applied.
    async fn conditional_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<bool>;

    /// `stock += quantity` for an existing product.
    ///
    /// Returns false if the product does not exist.
    async fn conditional_increment(&self, product_id: &ProductId, quantity: u32) -> Result<bool>;
}

/// Read access to the catalog attributes an order item snapshots.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Inserts or replaces a product's catalog attributes.
    ///
    /// New products start with zero stock; existing stock is left untouched.
    async fn upsert_product(&self, product_id: &ProductId, snapshot: ProductSnapshot)
    -> Result<()>;

    async fn snapshot(&self, product_id: &ProductId) -> Result<Option<ProductSnapshot>>;
}

/// Users' shopping carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn add_line(&self, line: CartLine) -> Result<()>;

    /// Lines the user selected for checkout, oldest first.
    async fn selected_lines(&self, user_id: UserId) -> Result<Vec<CartLine>>;
}

/// Existence checks for shipping addresses.
#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn add_address(&self, user_id: UserId, address_id: AddressId) -> Result<()>;

    async fn address_exists(&self, user_id: UserId, address_id: AddressId) -> Result<bool>;
}

/// Destination for user notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Orders and the transactions that create or cancel them.
#[async_trait]
pub trait OrderStore: Send + Sync {
    type Transaction: OrderTransaction;

    /// Opens a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Self::Transaction>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// A user's orders, newest first, optionally filtered by status.
    async fn list_orders(&self, user_id: UserId, status: Option<OrderStatus>)
    -> Result<Vec<Order>>;

    /// Number of orders per status for a user. Statuses without orders are
    /// absent from the map.
    async fn status_counts(&self, user_id: UserId) -> Result<HashMap<OrderStatus, u64>>;

    /// Guarded update `status = to WHERE status = from`.
    ///
    /// Returns false if the order is missing or no longer in `from`.
    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;
}

/// A unit of work spanning stock, carts and orders.
///
/// Stock decrements and status transitions take effect under the same
/// guards as their [`InventoryStore`] / [`OrderStore`] counterparts and are
/// undone if the transaction does not commit.
#[async_trait]
pub trait OrderTransaction: Send {
    async fn selected_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>>;

    async fn product_snapshot(&mut self, product_id: &ProductId)
    -> Result<Option<ProductSnapshot>>;

    async fn conditional_decrement(&mut self, product_id: &ProductId, quantity: u32)
    -> Result<bool>;

    async fn conditional_increment(&mut self, product_id: &ProductId, quantity: u32)
    -> Result<bool>;

    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    async fn remove_cart_lines(&mut self, line_ids: &[CartLineId]) -> Result<()>;

    async fn transition_status(
        &mut self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Everything the order lifecycle needs from persistence, in one bound.
pub trait OrderBackend:
    OrderStore
    + InventoryStore
    + ProductCatalog
    + CartStore
    + AddressBook
    + NotificationSink
    + Clone
    + 'static
{
}

impl<T> OrderBackend for T where
    T: OrderStore
        + InventoryStore
        + ProductCatalog
        + CartStore
        + AddressBook
        + NotificationSink
        + Clone
        + 'static
{
}
