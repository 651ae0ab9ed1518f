//! Domain error types.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by order construction and status transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// An order needs at least one item.
    #[error("Order has no items")]
    NoItems,

    /// Quantities must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The requested transition is not an edge of the status graph.
    #[error("Invalid status transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A persisted status code does not map to any known status.
    #[error("Unknown order status code: {0}")]
    UnknownStatusCode(i16),
}
