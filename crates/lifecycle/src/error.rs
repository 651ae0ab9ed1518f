use coordination::CoordinationError;
use domain::{OrderError, OrderId, OrderStatus, ProductId};
use event_bus::EventBusError;
use order_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the order lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A product lock is held by a concurrent request; the caller may retry.
    #[error("Order is being processed by another request, please retry")]
    Conflict,

    /// Stock is short for a product in the cart.
    #[error("Insufficient stock for product: {product_name}")]
    InsufficientStock { product_name: String },

    /// A guarded status update matched no order in the expected status.
    #[error("Order {order_id} is no longer {expected}, cannot move to {target}")]
    PreconditionFailed {
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    },

    /// The requested status change is not an edge of the order state machine.
    #[error("Invalid order transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The user has no selected cart lines.
    #[error("No selected items in cart")]
    EmptyCart,

    #[error("Address not found")]
    AddressNotFound,

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order data violates a domain rule.
    #[error("Invalid order: {0}")]
    InvalidOrder(OrderError),

    /// The coordination store or the event bus failed where it matters.
    #[error("Transient infrastructure failure: {0}")]
    TransientInfra(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Short label used as the metrics `reason` tag.
    pub fn reason(&self) -> &'static str {
        match self {
            LifecycleError::Conflict => "conflict",
            LifecycleError::InsufficientStock { .. } => "insufficient_stock",
            LifecycleError::PreconditionFailed { .. } => "precondition_failed",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
            LifecycleError::EmptyCart => "empty_cart",
            LifecycleError::AddressNotFound => "address_not_found",
            LifecycleError::ProductNotFound(_) => "product_not_found",
            LifecycleError::OrderNotFound(_) => "order_not_found",
            LifecycleError::InvalidOrder(_) => "invalid_order",
            LifecycleError::TransientInfra(_) => "transient_infra",
            LifecycleError::Store(_) => "store",
        }
    }
}

impl From<OrderError> for LifecycleError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InvalidTransition { from, to } => {
                LifecycleError::InvalidTransition { from, to }
            }
            other => LifecycleError::InvalidOrder(other),
        }
    }
}

impl From<CoordinationError> for LifecycleError {
    fn from(e: CoordinationError) -> Self {
        LifecycleError::TransientInfra(e.to_string())
    }
}

impl From<EventBusError> for LifecycleError {
    fn from(e: EventBusError) -> Self {
        LifecycleError::TransientInfra(e.to_string())
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
