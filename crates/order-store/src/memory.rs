use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    AddressId, CartLine, CartLineId, Money, Notification, Order, OrderId, OrderStatus, ProductId,
    ProductSnapshot, UserId,
};

use crate::{
    Result, StoreError,
    store::{
        AddressBook, CartStore, InventoryStore, NotificationSink, OrderStore, OrderTransaction,
        ProductCatalog,
    },
};

#[derive(Debug, Clone)]
struct ProductRecord {
    snapshot: ProductSnapshot,
    stock: u32,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, ProductRecord>,
    cart_lines: Vec<CartLine>,
    /// Cart lines read by an open transaction.
    claimed_lines: HashSet<CartLineId>,
    addresses: HashSet<(UserId, AddressId)>,
    orders: HashMap<OrderId, Order>,
    notifications: Vec<Notification>,
}

impl State {
    fn decrement(&mut self, product_id: &ProductId, quantity: u32) -> bool {
        match self.products.get_mut(product_id) {
            Some(record) if record.stock >= quantity => {
                record.stock -= quantity;
                true
            }
            _ => false,
        }
    }

    fn increment(&mut self, product_id: &ProductId, quantity: u32) -> bool {
        match self.products.get_mut(product_id) {
            Some(record) => {
                record.stock = record.stock.saturating_add(quantity);
                true
            }
            None => false,
        }
    }

    fn transition(&mut self, order_id: OrderId, from: OrderStatus, to: OrderStatus) -> bool {
        match self.orders.get_mut(&order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store for tests and single-process deployments.
///
/// All state lives behind one mutex that is held only for the duration of a
/// single operation, which makes every conditional update atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a catalog product with the given stock.
    pub fn seed_product(
        &self,
        product_id: impl Into<ProductId>,
        name: &str,
        unit_price: Money,
        stock: u32,
    ) {
        lock(&self.state).products.insert(
            product_id.into(),
            ProductRecord {
                snapshot: ProductSnapshot::new(name, unit_price, format!("/images/{name}.png")),
                stock,
            },
        );
    }

    /// Notifications delivered so far, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.state).notifications.clone()
    }

    /// Returns the total number of orders stored.
    pub fn order_count(&self) -> usize {
        lock(&self.state).orders.len()
    }

    /// Number of cart lines a user has, selected or not.
    pub fn cart_line_count(&self, user_id: UserId) -> usize {
        lock(&self.state)
            .cart_lines
            .iter()
            .filter(|l| l.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn stock(&self, product_id: &ProductId) -> Result<Option<u32>> {
        Ok(lock(&self.state).products.get(product_id).map(|r| r.stock))
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<bool> {
        let mut state = lock(&self.state);
        Ok(match state.products.get_mut(product_id) {
            Some(record) => {
                record.stock = stock;
                true
            }
            None => false,
        })
    }

    async fn conditional_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        Ok(lock(&self.state).decrement(product_id, quantity))
    }

    async fn conditional_increment(&self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        Ok(lock(&self.state).increment(product_id, quantity))
    }
}

#[async_trait]
impl ProductCatalog for InMemoryStore {
    async fn upsert_product(
        &self,
        product_id: &ProductId,
        snapshot: ProductSnapshot,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .products
            .entry(product_id.clone())
            .and_modify(|r| r.snapshot = snapshot.clone())
            .or_insert(ProductRecord { snapshot, stock: 0 });
        Ok(())
    }

    async fn snapshot(&self, product_id: &ProductId) -> Result<Option<ProductSnapshot>> {
        Ok(lock(&self.state)
            .products
            .get(product_id)
            .map(|r| r.snapshot.clone()))
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn add_line(&self, line: CartLine) -> Result<()> {
        lock(&self.state).cart_lines.push(line);
        Ok(())
    }

    async fn selected_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(lock(&self.state)
            .cart_lines
            .iter()
            .filter(|l| l.user_id == user_id && l.selected)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AddressBook for InMemoryStore {
    async fn add_address(&self, user_id: UserId, address_id: AddressId) -> Result<()> {
        lock(&self.state).addresses.insert((user_id, address_id));
        Ok(())
    }

    async fn address_exists(&self, user_id: UserId, address_id: AddressId) -> Result<bool> {
        Ok(lock(&self.state).addresses.contains(&(user_id, address_id)))
    }
}

#[async_trait]
impl NotificationSink for InMemoryStore {
    async fn notify(&self, notification: Notification) -> Result<()> {
        lock(&self.state).notifications.push(notification);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction::new(self.state.clone()))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(lock(&self.state).orders.get(&order_id).cloned())
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let state = lock(&self.state);
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn status_counts(&self, user_id: UserId) -> Result<HashMap<OrderStatus, u64>> {
        let state = lock(&self.state);
        let mut counts = HashMap::new();
        for order in state.orders.values().filter(|o| o.user_id == user_id) {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        Ok(lock(&self.state).transition(order_id, from, to))
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Conditional decrements and status transitions are applied to the shared
/// state immediately, the way a row lock would expose them, and reverted on
/// rollback or drop. Order inserts, cart deletions and increments are
/// buffered and only become visible on commit.
///
/// Cart lines returned by [`OrderTransaction::selected_cart_lines`] stay
/// claimed until the transaction ends; other transactions skip them, so one
/// cart line can end up in at most one order.
pub struct InMemoryTransaction {
    state: Arc<Mutex<State>>,
    claimed: Vec<CartLineId>,
    decremented: Vec<(ProductId, u32)>,
    transitioned: Vec<(OrderId, OrderStatus, OrderStatus)>,
    increments: Vec<(ProductId, u32)>,
    inserts: Vec<Order>,
    removed_lines: Vec<CartLineId>,
    open: bool,
}

impl InMemoryTransaction {
    fn new(state: Arc<Mutex<State>>) -> Self {
        Self {
            state,
            claimed: Vec::new(),
            decremented: Vec::new(),
            transitioned: Vec::new(),
            increments: Vec::new(),
            inserts: Vec::new(),
            removed_lines: Vec::new(),
            open: true,
        }
    }

    fn undo(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut state = lock(&self.state);
        for line_id in self.claimed.drain(..) {
            state.claimed_lines.remove(&line_id);
        }
        for (product_id, quantity) in self.decremented.drain(..) {
            state.increment(&product_id, quantity);
        }
        for (order_id, from, to) in self.transitioned.drain(..).rev() {
            state.transition(order_id, to, from);
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.undo();
    }
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn selected_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>> {
        let mut state = lock(&self.state);
        let lines: Vec<CartLine> = state
            .cart_lines
            .iter()
            .filter(|l| l.user_id == user_id && l.selected)
            .filter(|l| !self.removed_lines.contains(&l.id))
            .filter(|l| self.claimed.contains(&l.id) || !state.claimed_lines.contains(&l.id))
            .cloned()
            .collect();
        for line in &lines {
            if state.claimed_lines.insert(line.id) {
                self.claimed.push(line.id);
            }
        }
        Ok(lines)
    }

    async fn product_snapshot(
        &mut self,
        product_id: &ProductId,
    ) -> Result<Option<ProductSnapshot>> {
        Ok(lock(&self.state)
            .products
            .get(product_id)
            .map(|r| r.snapshot.clone()))
    }

    async fn conditional_decrement(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let applied = lock(&self.state).decrement(product_id, quantity);
        if applied {
            self.decremented.push((product_id.clone(), quantity));
        }
        Ok(applied)
    }

    async fn conditional_increment(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let exists = lock(&self.state).products.contains_key(product_id);
        if exists {
            self.increments.push((product_id.clone(), quantity));
        }
        Ok(exists)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.inserts.push(order.clone());
        Ok(())
    }

    async fn remove_cart_lines(&mut self, line_ids: &[CartLineId]) -> Result<()> {
        self.removed_lines.extend_from_slice(line_ids);
        Ok(())
    }

    async fn transition_status(
        &mut self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let applied = lock(&self.state).transition(order_id, from, to);
        if applied {
            self.transitioned.push((order_id, from, to));
        }
        Ok(applied)
    }

    async fn commit(mut self) -> Result<()> {
        let mut state = lock(&self.state);
        let duplicate = self.inserts.iter().find_map(|new| {
            state
                .orders
                .values()
                .any(|o| o.order_no == new.order_no)
                .then(|| new.order_no.to_string())
        });
        if let Some(order_no) = duplicate {
            drop(state);
            self.undo();
            return Err(StoreError::DuplicateOrderNumber(order_no));
        }

        for line_id in self.claimed.drain(..) {
            state.claimed_lines.remove(&line_id);
        }
        for order in self.inserts.drain(..) {
            state.orders.insert(order.id, order);
        }
        let removed = std::mem::take(&mut self.removed_lines);
        state.cart_lines.retain(|l| !removed.contains(&l.id));
        for (product_id, quantity) in self.increments.drain(..) {
            state.increment(&product_id, quantity);
        }
        drop(state);

        self.decremented.clear();
        self.transitioned.clear();
        self.open = false;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.undo();
        Ok(())
    }
}
