//! Identifier types shared by every crate of the order-lifecycle engine.

mod types;

pub use types::{AddressId, CartLineId, OrderId, ProductId, SkuId, UserId};
