//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// PendingPayment ──► Paid ──► Shipped ──► Delivered ──► Completed ──► AfterSales
///       │
///       └──(timeout)──► Cancelled
/// ```
///
/// Every status is persisted as its numeric code (see [`OrderStatus::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, stock held, waiting for payment.
    #[default]
    PendingPayment,

    /// Paid, waiting to be shipped.
    Paid,

    /// Handed to the carrier.
    Shipped,

    /// Receipt confirmed by the user, waiting for review.
    Delivered,

    /// Reviewed / completed.
    Completed,

    /// After-sales service requested on a completed order.
    AfterSales,

    /// Cancelled by the payment timeout (terminal state).
    Cancelled,
}

/// Statuses order by their numeric code.
impl Ord for OrderStatus {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.code().cmp(&other.code())
    }
}

impl PartialOrd for OrderStatus {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl OrderStatus {
    /// All statuses, in code order.
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Cancelled,
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::AfterSales,
    ];

    /// Returns the persisted numeric code.
    pub fn code(&self) -> i16 {
        match self {
            OrderStatus::Cancelled => -1,
            OrderStatus::PendingPayment => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Completed => 4,
            OrderStatus::AfterSales => 5,
        }
    }

    /// Maps a persisted numeric code back to a status.
    pub fn from_code(code: i16) -> Result<Self, OrderError> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(OrderError::UnknownStatusCode(code))
    }

    /// The only status a transition into `self` may start from.
    ///
    /// Returns `None` for the initial status, which is only ever written by
    /// order creation.
    pub fn predecessor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::PendingPayment => None,
            OrderStatus::Paid => Some(OrderStatus::PendingPayment),
            OrderStatus::Shipped => Some(OrderStatus::Paid),
            OrderStatus::Delivered => Some(OrderStatus::Shipped),
            OrderStatus::Completed => Some(OrderStatus::Delivered),
            OrderStatus::AfterSales => Some(OrderStatus::Completed),
            OrderStatus::Cancelled => Some(OrderStatus::PendingPayment),
        }
    }

    /// Returns true if `self → next` is an edge of the status graph.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        next.predecessor() == Some(*self)
    }

    /// Validates `self → next`.
    pub fn ensure_transition(&self, next: OrderStatus) -> Result<(), OrderError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::AfterSales)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::AfterSales => "after_sales",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
