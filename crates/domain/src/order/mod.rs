//! Order model and status state machine.

mod model;
mod number;
mod status;

pub use model::{Order, OrderItem};
pub use number::OrderNumber;
pub use status::OrderStatus;
