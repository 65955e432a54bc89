mod alert;
mod config;
mod error;
mod guard;
mod handlers;
mod models;
mod monitoring;
mod scanner;
mod storage;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::alert::{AlertChannel, EmailAlertChannel};
use crate::config::Config;
use crate::handlers::AppState;
use crate::monitoring::MonitoringEngine;
use crate::storage::{PgScanStore, ScanStore};
use crate::worker::{AdmissionController, ScanOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sitewatch=info,tower_http=info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    info!("Starting sitewatch v{}", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_seconds))
        .connect(&config.database.url)
        .await?;
    info!("Database connection established");

    let store: Arc<dyn ScanStore> = Arc::new(PgScanStore::new(pool));
    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::clone(&store),
        config.scanner.clone(),
    ));
    let alerts: Arc<dyn AlertChannel> = Arc::new(EmailAlertChannel::new(&config.email)?);
    let monitoring = Arc::new(MonitoringEngine::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        alerts,
        config.monitoring.clone(),
    ));
    let admission = Arc::new(AdmissionController::new(config.admission.clone()));

    let state = AppState {
        store,
        orchestrator,
        monitoring,
        admission,
        config: Arc::new(config.clone()),
    };

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/api/scans", post(handlers::scans::submit_scan))
        .route("/api/scans/:id", get(handlers::scans::get_scan))
        .route("/internal/scans/:id/run", post(handlers::scans::run_scan))
        .route(
            "/api/monitoring",
            post(handlers::monitoring::enable_monitoring),
        )
        .route(
            "/internal/monitoring/run",
            get(handlers::monitoring::run_monitoring_cycle),
        )
        .with_state(state);

    let app = if config.server.enable_cors {
        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
    } else {
        router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "sitewatch",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
