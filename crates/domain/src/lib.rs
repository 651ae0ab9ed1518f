//! Domain layer of the order-lifecycle engine.
//!
//! This crate holds the plain data the rest of the workspace moves around:
//! - `Money` in integer cents
//! - `Order` / `OrderItem` with purchase-time product snapshots
//! - `OrderStatus`, the guarded status state machine
//! - `OrderEvent`, the closed set of lifecycle events carried by the bus
//! - cart lines, product snapshots and user notifications

pub mod cart;
pub mod error;
pub mod events;
pub mod money;
pub mod notification;
pub mod order;

pub use cart::{CartLine, ProductSnapshot};
pub use common::{AddressId, CartLineId, OrderId, ProductId, SkuId, UserId};
pub use error::OrderError;
pub use events::OrderEvent;
pub use money::Money;
pub use notification::Notification;
pub use order::{Order, OrderItem, OrderNumber, OrderStatus};
