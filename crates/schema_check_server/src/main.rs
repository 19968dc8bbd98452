//! schema_check_server: standalone REST server for schema checks and publishes.
//!
//! Reads config from env vars:
//!   SCHEMA_CHECK_DATABASE_URL     Postgres connection string (required)
//!   SCHEMA_CHECK_BIND_ADDR        listen address (default: 0.0.0.0:4200)
//!   SCHEMA_CHECK_CONFIG           engine config YAML (optional; defaults otherwise)
//!   SCHEMA_CHECK_CACHE_WARMER_URL cache warmer endpoint (optional)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use schema_check_core::config::EngineConfig;
use schema_check_core::orchestrator::{CheckService, CheckServiceImpl};
use schema_check_core::ports::{CatalogStore, JobQueue};
use schema_check_postgres::PgStore;
use schema_check_server::dispatcher::{DownstreamJobHandler, OutboxDispatcher};
use schema_check_server::router::build_router;
use schema_check_server::transport::HttpExtensionTransport;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,schema_check_server=debug".into()),
        )
        .init();

    // Read config from environment
    let database_url = std::env::var("SCHEMA_CHECK_DATABASE_URL")
        .expect("SCHEMA_CHECK_DATABASE_URL must be set");
    let bind_addr =
        std::env::var("SCHEMA_CHECK_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4200".into());
    let config = match std::env::var("SCHEMA_CHECK_CONFIG") {
        Ok(path) => EngineConfig::load_from_file(Path::new(&path))
            .unwrap_or_else(|e| panic!("failed to load engine config {path}: {e}")),
        Err(_) => EngineConfig::default(),
    };
    let cache_warmer_url = std::env::var("SCHEMA_CHECK_CACHE_WARMER_URL").ok();

    // Create PgPool
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Connected to database");

    // One store backs the catalog, the audit trail and the job queue.
    let store = PgStore::new(pool);
    let catalog: Arc<dyn CatalogStore> = Arc::new(store.clone());
    let queue: Arc<dyn JobQueue> = Arc::new(store.clone());

    let transport = HttpExtensionTransport::new(config.extension_timeout())
        .expect("failed to build HTTP client");

    let service: Arc<dyn CheckService> = Arc::new(
        CheckServiceImpl::new(Arc::clone(&catalog), Arc::new(store), config)
            .with_extension_transport(Arc::new(transport)),
    );

    // Start outbox dispatcher as background task
    let dispatcher_interval_ms: u64 = std::env::var("SCHEMA_CHECK_DISPATCHER_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);
    let dispatcher_max_fails: u32 = std::env::var("SCHEMA_CHECK_DISPATCHER_MAX_FAILS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);

    let handler = DownstreamJobHandler::new(catalog, reqwest::Client::new(), cache_warmer_url);
    let dispatcher = OutboxDispatcher::new(
        queue,
        Arc::new(handler),
        Duration::from_millis(dispatcher_interval_ms),
        dispatcher_max_fails,
    );

    tokio::spawn(async move {
        dispatcher.run().await;
    });
    tracing::info!(
        "OutboxDispatcher spawned (interval={}ms, max_fails={})",
        dispatcher_interval_ms,
        dispatcher_max_fails
    );

    let app = build_router(service);

    // Bind and serve
    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {bind_addr}: {e}"));
    tracing::info!("schema_check_server listening on {bind_addr}");

    axum::serve(listener, app).await.expect("server error");
}
