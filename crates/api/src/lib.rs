//! HTTP API server for the order-lifecycle engine.
//!
//! Exposes order placement and the status transitions over REST, with
//! structured logging (tracing) and Prometheus metrics. The timeout
//! scheduler and consumer are wired up in `main`.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use coordination::CoordinationBackend;
use event_bus::EventBus;
use lifecycle::{LifecycleConfig, OrderService};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderBackend;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, C, B>(state: Arc<AppState<S, C, B>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<S, C, B>).get(routes::orders::list::<S, C, B>),
        )
        .route("/orders/counts", get(routes::orders::counts::<S, C, B>))
        .route("/orders/{id}", get(routes::orders::get::<S, C, B>))
        .route("/orders/{id}/pay", post(routes::orders::pay::<S, C, B>))
        .route("/orders/{id}/ship", post(routes::orders::ship::<S, C, B>))
        .route(
            "/orders/{id}/receipt",
            put(routes::orders::confirm_receipt::<S, C, B>),
        )
        .route(
            "/orders/{id}/complete",
            post(routes::orders::complete::<S, C, B>),
        )
        .route(
            "/orders/{id}/after-sales",
            post(routes::orders::after_sales::<S, C, B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the shared state around one set of backends.
pub fn create_state<S, C, B>(
    store: S,
    coordination: C,
    bus: B,
    config: LifecycleConfig,
) -> Arc<AppState<S, C, B>>
where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + 'static,
{
    Arc::new(AppState {
        order_service: OrderService::new(store, coordination, bus, config),
    })
}
