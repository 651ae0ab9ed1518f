use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use domain::{
    AddressId, CartLine, CartLineId, Money, Notification, Order, OrderId, OrderItem, OrderNumber,
    OrderStatus, ProductId, ProductSnapshot, SkuId, UserId,
};

use crate::{
    Result, StoreError,
    store::{
        AddressBook, CartStore, InventoryStore, NotificationSink, OrderStore, OrderTransaction,
        ProductCatalog,
    },
};

const ORDER_COLUMNS: &str =
    "id, order_no, user_id, address_id, status, total_cents, created_at, updated_at";

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::InvalidData(format!("quantity {quantity} out of range")))
}

fn from_db_quantity(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative quantity {value}")))
}

fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: CartLineId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        sku_id: row.try_get::<Option<String>, _>("sku_id")?.map(SkuId::new),
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        selected: row.try_get("selected")?,
    })
}

fn row_to_snapshot(row: PgRow) -> Result<ProductSnapshot> {
    Ok(ProductSnapshot {
        name: row.try_get("name")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        image: row.try_get("image")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        order_no: OrderNumber::from_string(row.try_get::<String, _>("order_no")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        address_id: AddressId::from_uuid(row.try_get("address_id")?),
        status: OrderStatus::from_code(row.try_get("status")?)?,
        total: Money::from_cents(row.try_get("total_cents")?),
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        product_name: row.try_get("product_name")?,
        product_image: row.try_get("product_image")?,
        sku_id: row.try_get::<Option<String>, _>("sku_id")?.map(SkuId::new),
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        quantity: from_db_quantity(row.try_get("quantity")?)?,
    })
}

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Loads orders and attaches their items in position order.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let item_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, product_image, sku_id, unit_price_cents, quantity
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &item_rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(row_to_item(row)?);
        }
        for order in &mut orders {
            order.items = items.remove(&order.id.as_uuid()).unwrap_or_default();
        }
        Ok(orders)
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn stock(&self, product_id: &ProductId) -> Result<Option<u32>> {
        let stock: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        stock.map(from_db_quantity).transpose()
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<bool> {
        let result =
            sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
                .bind(product_id.as_str())
                .bind(to_db_quantity(stock)?)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn conditional_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2",
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn conditional_increment(&self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ProductCatalog for PostgresStore {
    async fn upsert_product(
        &self,
        product_id: &ProductId,
        snapshot: ProductSnapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, image, unit_price_cents)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                image = EXCLUDED.image,
                unit_price_cents = EXCLUDED.unit_price_cents,
                updated_at = NOW()
            "#,
        )
        .bind(product_id.as_str())
        .bind(&snapshot.name)
        .bind(&snapshot.image)
        .bind(snapshot.unit_price.cents())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn snapshot(&self, product_id: &ProductId) -> Result<Option<ProductSnapshot>> {
        sqlx::query("SELECT name, image, unit_price_cents FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_snapshot)
            .transpose()
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn add_line(&self, line: CartLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_lines (id, user_id, product_id, sku_id, quantity, selected)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(line.user_id.as_uuid())
        .bind(line.product_id.as_str())
        .bind(line.sku_id.as_ref().map(SkuId::as_str))
        .bind(to_db_quantity(line.quantity)?)
        .bind(line.selected)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn selected_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, sku_id, quantity, selected
            FROM cart_lines
            WHERE user_id = $1 AND selected
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cart_line).collect()
    }
}

#[async_trait]
impl AddressBook for PostgresStore {
    async fn add_address(&self, user_id: UserId, address_id: AddressId) -> Result<()> {
        sqlx::query(
            "INSERT INTO addresses (id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(address_id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn address_exists(&self, user_id: UserId, address_id: AddressId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM addresses WHERE user_id = $1 AND id = $2)",
        )
        .bind(user_id.as_uuid())
        .bind(address_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

#[async_trait]
impl NotificationSink for PostgresStore {
    async fn notify(&self, notification: Notification) -> Result<()> {
        sqlx::query("INSERT INTO notifications (user_id, title, content) VALUES ($1, $2, $3)")
            .bind(notification.user_id.as_uuid())
            .bind(&notification.title)
            .bind(&notification.content)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(status.map(|s| s.code()))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn status_counts(&self, user_id: UserId) -> Result<HashMap<OrderStatus, u64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM orders WHERE user_id = $1 GROUP BY status",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status = OrderStatus::from_code(row.try_get("status")?)?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count.unsigned_abs());
        }
        Ok(counts)
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(order_id.as_uuid())
        .bind(from.code())
        .bind(to.code())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Transaction over a [`PostgresStore`].
///
/// Dropping it without calling `commit` rolls the work back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    async fn selected_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, sku_id, quantity, selected
            FROM cart_lines
            WHERE user_id = $1 AND selected
            ORDER BY created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_cart_line).collect()
    }

    async fn product_snapshot(
        &mut self,
        product_id: &ProductId,
    ) -> Result<Option<ProductSnapshot>> {
        sqlx::query("SELECT name, image, unit_price_cents FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_snapshot)
            .transpose()
    }

    async fn conditional_decrement(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2",
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn conditional_increment(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(order.id.as_uuid())
        .bind(order.order_no.as_str())
        .bind(order.user_id.as_uuid())
        .bind(order.address_id.as_uuid())
        .bind(order.status.code())
        .bind(order.total.cents())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_no")
            {
                return StoreError::DuplicateOrderNumber(order.order_no.to_string());
            }
            StoreError::Database(e)
        })?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (order_id, position, product_id, product_name, product_image, sku_id, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.product_id.as_str())
            .bind(&item.product_name)
            .bind(&item.product_image)
            .bind(item.sku_id.as_ref().map(SkuId::as_str))
            .bind(item.unit_price.cents())
            .bind(to_db_quantity(item.quantity)?)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn remove_cart_lines(&mut self, line_ids: &[CartLineId]) -> Result<()> {
        let ids: Vec<Uuid> = line_ids.iter().map(CartLineId::as_uuid).collect();
        sqlx::query("DELETE FROM cart_lines WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn transition_status(
        &mut self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(order_id.as_uuid())
        .bind(from.code())
        .bind(to.code())
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
