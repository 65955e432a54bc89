//! Monitoring opt-in and the internal cycle trigger.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::handlers::AppState;
use crate::models::ScanStatus;

#[derive(Debug, Deserialize)]
pub struct EnableMonitoringRequest {
    pub email: String,
    pub scan_id: Uuid,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// POST /api/monitoring
///
/// Enables recurring checks for the site of a completed scan, which becomes
/// the comparison baseline.
pub async fn enable_monitoring(
    State(state): State<AppState>,
    Json(payload): Json<EnableMonitoringRequest>,
) -> Response {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || email.len() > 254 {
        return error_body(StatusCode::BAD_REQUEST, "invalid email address");
    }

    let scan = match state.store.get_scan(payload.scan_id).await {
        Ok(Some(scan)) => scan,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "scan not found"),
        Err(e) => {
            error!(scan_id = %payload.scan_id, error = %e, "failed to load scan");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    if scan.status != ScanStatus::Done || scan.result.is_none() {
        return error_body(
            StatusCode::BAD_REQUEST,
            "only completed scans can be monitored",
        );
    }

    let max = state.config.monitoring.max_sites_per_email;
    match state.store.count_sites_for_email(&email).await {
        Ok(count) if count >= max => {
            warn!(email = %email, count, "monitoring cap reached");
            return error_body(StatusCode::CONFLICT, "too many monitored sites for this email");
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "failed to count monitored sites");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    }

    match state
        .store
        .upsert_monitored_site(&email, &scan.url, scan.id)
        .await
    {
        Ok(site_id) => {
            info!(site_id = %site_id, url = %scan.url, "monitoring enabled");
            (
                StatusCode::CREATED,
                Json(json!({ "site_id": site_id, "url": scan.url })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to upsert monitored site");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /internal/monitoring/run
///
/// Cron entry point. Requires the shared bearer secret; without one
/// configured the endpoint is disabled outright.
pub async fn run_monitoring_cycle(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(secret) = state.config.monitoring.cron_secret.as_deref() else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "monitoring trigger not configured");
    };

    let authorized = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret);
    if !authorized {
        warn!("monitoring trigger rejected: bad or missing bearer token");
        return error_body(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let summary = state.monitoring.run_cycle().await;
    (StatusCode::OK, Json(summary)).into_response()
}
