//! Order lifecycle events carried by the event bus.

use serde::{Deserialize, Serialize};

use crate::{OrderId, UserId};

/// Events published about an order's lifecycle.
///
/// Serialized as a flat JSON object tagged by `event_type`:
/// `{"event_type":"timeout","order_id":"…","user_id":"…"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// The order was committed and awaits payment.
    Created { order_id: OrderId, user_id: UserId },

    /// The payment window of the order elapsed.
    Timeout { order_id: OrderId, user_id: UserId },

    /// The order was cancelled and its stock restored.
    Cancelled { order_id: OrderId, user_id: UserId },
}

impl OrderEvent {
    pub fn created(order_id: OrderId, user_id: UserId) -> Self {
        OrderEvent::Created { order_id, user_id }
    }

    pub fn timeout(order_id: OrderId, user_id: UserId) -> Self {
        OrderEvent::Timeout { order_id, user_id }
    }

    pub fn cancelled(order_id: OrderId, user_id: UserId) -> Self {
        OrderEvent::Cancelled { order_id, user_id }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::Created { order_id, .. }
            | OrderEvent::Timeout { order_id, .. }
            | OrderEvent::Cancelled { order_id, .. } => *order_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            OrderEvent::Created { user_id, .. }
            | OrderEvent::Timeout { user_id, .. }
            | OrderEvent::Cancelled { user_id, .. } => *user_id,
        }
    }

    /// Returns the wire name of the event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created { .. } => "created",
            OrderEvent::Timeout { .. } => "timeout",
            OrderEvent::Cancelled { .. } => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_flat_and_tagged() {
        let order_id = OrderId::new();
        let user_id = UserId::new();
        let json = serde_json::to_value(OrderEvent::timeout(order_id, user_id)).unwrap();

        assert_eq!(json["event_type"], "timeout");
        assert_eq!(json["order_id"], order_id.to_string());
        assert_eq!(json["user_id"], user_id.to_string());
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let payload = serde_json::json!({
            "event_type": "refunded",
            "order_id": OrderId::new(),
            "user_id": UserId::new(),
        });
        assert!(serde_json::from_value::<OrderEvent>(payload).is_err());
    }

    #[test]
    fn test_accessors() {
        let order_id = OrderId::new();
        let user_id = UserId::new();
        let event = OrderEvent::cancelled(order_id, user_id);

        assert_eq!(event.order_id(), order_id);
        assert_eq!(event.user_id(), user_id);
        assert_eq!(event.event_type(), "cancelled");
    }
}
