//! Order lifecycle endpoints.
//!
//! Every user-facing route identifies the caller through the `x-user-id`
//! header; `ship` is an operator action and takes no user.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use coordination::CoordinationBackend;
use domain::{AddressId, Order, OrderId, OrderItem, OrderStatus, UserId};
use event_bus::EventBus;
use lifecycle::OrderService;
use order_store::OrderBackend;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state accessible from all handlers.
pub struct AppState<S, C, B>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus,
{
    pub order_service: OrderService<S, C, B>,
}

/// The caller, taken from the `x-user-id` header.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<T: Send + Sync> FromRequestParts<T> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {USER_ID_HEADER} header")))?;
        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("Invalid {USER_ID_HEADER} header")))?;
        Ok(CurrentUser(user_id))
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub address_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    /// Numeric status code filter.
    pub status: Option<i16>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_no: String,
    pub user_id: String,
    pub address_id: String,
    pub status: String,
    pub status_code: i16,
    /// True once no further action applies to the order.
    pub terminal: bool,
    pub total_cents: i64,
    pub items: Vec<OrderItemResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub product_image: String,
    pub sku_id: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
}

#[derive(Serialize)]
pub struct StatusCountResponse {
    pub status: String,
    pub code: i16,
    pub count: u64,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            product_name: item.product_name.clone(),
            product_image: item.product_image.clone(),
            sku_id: item.sku_id.as_ref().map(|s| s.to_string()),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
            total_price_cents: item.total_price().cents(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            order_no: order.order_no.to_string(),
            user_id: order.user_id.to_string(),
            address_id: order.address_id.to_string(),
            status: order.status.to_string(),
            status_code: order.status.code(),
            terminal: order.status.is_terminal(),
            total_cents: order.total.cents(),
            items: order.items.iter().map(OrderItemResponse::from).collect(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: places an order from the caller's selected cart lines.
#[tracing::instrument(skip(state, req))]
pub async fn create<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let address_id: AddressId = req
        .address_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid address_id: {e}")))?;

    let order = state
        .order_service
        .create_order(user_id, address_id)
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders: the caller's orders, newest first, optionally by status code.
#[tracing::instrument(skip(state))]
pub async fn list<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let status = query
        .status
        .map(OrderStatus::from_code)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let orders = state.order_service.list_orders(user_id, status).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/counts: the caller's order count per status.
#[tracing::instrument(skip(state))]
pub async fn counts<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<StatusCountResponse>>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let counts = state.order_service.status_counts(user_id).await?;
    Ok(Json(
        counts
            .into_iter()
            .map(|(status, count)| StatusCountResponse {
                status: status.to_string(),
                code: status.code(),
                count,
            })
            .collect(),
    ))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state.order_service.get_order(user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/pay
#[tracing::instrument(skip(state))]
pub async fn pay<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state.order_service.pay_order(user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/ship
#[tracing::instrument(skip(state))]
pub async fn ship<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state.order_service.ship_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/{id}/receipt
#[tracing::instrument(skip(state))]
pub async fn confirm_receipt<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state
        .order_service
        .confirm_receipt(user_id, order_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/complete
#[tracing::instrument(skip(state))]
pub async fn complete<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state.order_service.complete_order(user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/after-sales
#[tracing::instrument(skip(state))]
pub async fn after_sales<S, C, B>(
    State(state): State<Arc<AppState<S, C, B>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state
        .order_service
        .apply_after_sales(user_id, order_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
