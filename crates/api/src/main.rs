//! API server entry point.
//!
//! Runs the HTTP server next to one timeout scheduler and one timeout
//! consumer. Further instances may run against the same Postgres and Redis.

use api::config::Config;
use coordination::{CoordinationBackend, InMemoryCoordinator, RedisCoordinator};
use event_bus::{EventBus, InMemoryEventBus, PgNotifyEventBus};
use lifecycle::{TimeoutConsumer, TimeoutScheduler};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryStore, OrderBackend, PostgresStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Starts the workers, serves HTTP until a signal arrives, then stops the workers.
async fn serve<S, C, B>(
    config: Config,
    store: S,
    coordination: C,
    bus: B,
    metrics_handle: PrometheusHandle,
) where
    S: OrderBackend,
    C: CoordinationBackend,
    B: EventBus + Clone + 'static,
{
    let lifecycle_config = config.lifecycle_config();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = TimeoutConsumer::new(store.clone(), bus.clone());
    let subscription = consumer
        .subscribe()
        .await
        .expect("failed to subscribe to order events");
    let consumer_handle = tokio::spawn(consumer.run(subscription, shutdown_rx.clone()));

    let scheduler = TimeoutScheduler::new(coordination.clone(), bus.clone(), &lifecycle_config);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let state = api::create_state(store, coordination, bus, lifecycle_config);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for (name, handle) in [("scheduler", scheduler_handle), ("consumer", consumer_handle)] {
        if let Err(e) = handle.await {
            tracing::warn!(worker = name, error = %e, "worker did not stop cleanly");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = Config::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick backends and run
    let shared = config
        .shared_backends()
        .map(|(database, redis)| (database.to_string(), redis.to_string()));
    match shared {
        Some((database_url, redis_url)) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let coordination = RedisCoordinator::new(&redis_url)
                .await
                .expect("failed to connect to Redis");
            let bus = PgNotifyEventBus::new(pool);

            tracing::info!("using Postgres and Redis backends");
            serve(config, store, coordination, bus, metrics_handle).await;
        }
        None => {
            tracing::warn!(
                "DATABASE_URL or REDIS_URL not set, using in-memory backends; state is lost on exit"
            );
            serve(
                config,
                InMemoryStore::new(),
                InMemoryCoordinator::new(),
                InMemoryEventBus::new(),
                metrics_handle,
            )
            .await;
        }
    }

    tracing::info!("server shut down gracefully");
}
