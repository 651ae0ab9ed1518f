use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::{AddressId, CartLine, Money, OrderId, ProductId, ProductSnapshot, SkuId, UserId};

use super::{OrderNumber, OrderStatus};

/// An order line with the product attributes captured at purchase time.
///
/// Items are never mutated after the order is created, so later catalog
/// edits do not leak into historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub product_image: String,
    pub sku_id: Option<SkuId>,
    /// Unit price at purchase time.
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderItem {
    /// Snapshots a cart line against the current catalog entry.
    pub fn from_cart_line(line: &CartLine, snapshot: &ProductSnapshot) -> Self {
        Self {
            product_id: line.product_id.clone(),
            product_name: snapshot.name.clone(),
            product_image: snapshot.image.clone(),
            sku_id: line.sku_id.clone(),
            unit_price: snapshot.unit_price,
            quantity: line.quantity,
        }
    }

    /// Returns quantity * unit_price.
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_no: OrderNumber,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub status: OrderStatus,
    /// Sum of all item totals.
    pub total: Money,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new order awaiting payment.
    pub fn place(
        user_id: UserId,
        address_id: AddressId,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }

        let total = items.iter().map(OrderItem::total_price).sum();

        Ok(Self {
            id: OrderId::new(),
            order_no: OrderNumber::generate(now),
            user_id,
            address_id,
            status: OrderStatus::PendingPayment,
            total,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Total units per product, used when restoring stock.
    pub fn quantities_by_product(&self) -> BTreeMap<ProductId, u32> {
        let mut totals = BTreeMap::new();
        for item in &self.items {
            *totals.entry(item.product_id.clone()).or_insert(0) += item.quantity;
        }
        totals
    }

    /// Total number of units across all items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, price: i64, quantity: u32) -> OrderItem {
        let line = CartLine::new(UserId::new(), product, quantity);
        let snapshot = ProductSnapshot::new(product, Money::from_cents(price), "img.png");
        OrderItem::from_cart_line(&line, &snapshot)
    }

    #[test]
    fn test_place_sums_line_totals() {
        let order = Order::place(
            UserId::new(),
            AddressId::new(),
            vec![item("SKU-001", 1000, 2), item("SKU-002", 250, 1)],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.total.cents(), 2250);
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.total_quantity(), 3);
    }

    #[test]
    fn test_place_requires_items() {
        let result = Order::place(UserId::new(), AddressId::new(), vec![], Utc::now());
        assert_eq!(result, Err(OrderError::NoItems));
    }

    #[test]
    fn test_place_rejects_zero_quantity() {
        let result = Order::place(
            UserId::new(),
            AddressId::new(),
            vec![item("SKU-001", 1000, 0)],
            Utc::now(),
        );
        assert_eq!(result, Err(OrderError::InvalidQuantity { quantity: 0 }));
    }

    #[test]
    fn test_item_snapshot_copies_catalog_fields() {
        let line = CartLine::new(UserId::new(), "SKU-001", 3).with_sku("RED");
        let snapshot = ProductSnapshot::new("Widget", Money::from_cents(499), "widget.png");
        let item = OrderItem::from_cart_line(&line, &snapshot);

        assert_eq!(item.product_name, "Widget");
        assert_eq!(item.product_image, "widget.png");
        assert_eq!(item.sku_id, Some(SkuId::new("RED")));
        assert_eq!(item.total_price().cents(), 1497);
    }

    #[test]
    fn test_quantities_by_product_merges_sku_lines() {
        let order = Order::place(
            UserId::new(),
            AddressId::new(),
            vec![
                item("SKU-001", 100, 2),
                item("SKU-002", 100, 1),
                item("SKU-001", 100, 3),
            ],
            Utc::now(),
        )
        .unwrap();

        let totals = order.quantities_by_product();
        assert_eq!(totals[&ProductId::new("SKU-001")], 5);
        assert_eq!(totals[&ProductId::new("SKU-002")], 1);
    }
}
