//! User-facing notifications emitted by the lifecycle.

use serde::{Deserialize, Serialize};

use crate::{Order, UserId};

/// A message for a user's notification inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub content: String,
}

impl Notification {
    pub fn new(user_id: UserId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id,
            title: title.into(),
            content: content.into(),
        }
    }

    /// Sent once an order has been committed and awaits payment.
    pub fn order_created(order: &Order) -> Self {
        Self::new(
            order.user_id,
            "Order created",
            format!(
                "Your order {} was created successfully, please complete payment.",
                order.order_no
            ),
        )
    }

    /// Sent when an unpaid order is cancelled by the payment timeout.
    pub fn order_timed_out(order: &Order) -> Self {
        Self::new(
            order.user_id,
            "Order cancelled",
            format!(
                "Your order {} was cancelled automatically because it was not paid in time.",
                order.order_no
            ),
        )
    }
}
