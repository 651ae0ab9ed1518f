//! Cart lines and catalog snapshots consumed by order creation.

use serde::{Deserialize, Serialize};

use crate::{CartLineId, Money, ProductId, SkuId, UserId};

/// One line of a user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub sku_id: Option<SkuId>,
    pub quantity: u32,
    /// Only selected lines are converted into an order.
    pub selected: bool,
}

impl CartLine {
    /// Creates a selected cart line.
    pub fn new(user_id: UserId, product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            id: CartLineId::new(),
            user_id,
            product_id: product_id.into(),
            sku_id: None,
            quantity,
            selected: true,
        }
    }

    /// Sets the SKU variant of this line.
    pub fn with_sku(mut self, sku_id: impl Into<SkuId>) -> Self {
        self.sku_id = Some(sku_id.into());
        self
    }

    /// Marks the line as not selected for checkout.
    pub fn unselected(mut self) -> Self {
        self.selected = false;
        self
    }
}

/// Catalog attributes copied into an order item at purchase time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub unit_price: Money,
    pub image: String,
}

impl ProductSnapshot {
    pub fn new(name: impl Into<String>, unit_price: Money, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit_price,
            image: image.into(),
        }
    }
}
