//! Scan submission and status endpoints.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ScanErrorKind;
use crate::handlers::AppState;
use crate::models::{ScanResult, ScanStatus};
use crate::worker::admission::{client_key, AdmissionDecision};
use crate::worker::{SubmitError, SubmitOutcome};

#[derive(Debug, Deserialize)]
pub struct SubmitScanRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitScanResponse {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reused: bool,
}

#[derive(Debug, Serialize)]
pub struct ScanStatusResponse {
    pub scan_id: Uuid,
    pub url: String,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// POST /api/scans
pub async fn submit_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SubmitScanRequest>,
) -> Response {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let client = client_key(forwarded_for);

    if let AdmissionDecision::Denied { retry_after } = state.admission.check(&client) {
        let retry_secs = retry_after.as_secs().max(1);
        warn!(client = %client, retry_after = retry_secs, "submission rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_secs.to_string())],
            Json(json!({
                "error": "too many scans, slow down",
                "retry_after_seconds": retry_secs,
            })),
        )
            .into_response();
    }

    let requester_ip = forwarded_for.map(|_| client.as_str());

    let orchestrator = Arc::clone(&state.orchestrator);
    match orchestrator.submit(&payload.url, requester_ip).await {
        Ok(SubmitOutcome::Created(scan_id)) => {
            info!(scan_id = %scan_id, "scan accepted");
            (
                StatusCode::CREATED,
                Json(SubmitScanResponse {
                    scan_id,
                    status: ScanStatus::Queued,
                    reused: false,
                }),
            )
                .into_response()
        }
        Ok(SubmitOutcome::Reused(scan_id)) => (
            StatusCode::OK,
            Json(SubmitScanResponse {
                scan_id,
                status: ScanStatus::Queued,
                reused: true,
            }),
        )
            .into_response(),
        Err(SubmitError::Rejected(scan_error)) => {
            let status = match scan_error.kind {
                ScanErrorKind::BlockedUrl => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(json!({
                    "error": scan_error.detail,
                    "code": scan_error.kind.as_str(),
                })),
            )
                .into_response()
        }
        Err(SubmitError::Store(e)) => {
            error!(error = %e, "failed to persist submission");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /api/scans/:id
pub async fn get_scan(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let scan_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "invalid scan id"),
    };

    match state.store.get_scan(scan_id).await {
        Ok(Some(job)) => (
            StatusCode::OK,
            // Status flips server-side while the scan runs
            [(header::CACHE_CONTROL, "no-store")],
            Json(ScanStatusResponse {
                scan_id: job.id,
                url: job.url,
                status: job.status,
                result: job.result,
                error: job.error_message,
                created_at: job.created_at,
            }),
        )
            .into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "scan not found"),
        Err(e) => {
            error!(scan_id = %scan_id, error = %e, "failed to load scan");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// POST /internal/scans/:id/run
///
/// Re-dispatches a queued scan. Execution itself refuses terminal or
/// concurrently claimed jobs, so acknowledging before the lookup is safe.
pub async fn run_scan(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let scan_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "invalid scan id"),
    };

    Arc::clone(&state.orchestrator).dispatch(scan_id);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "ok": true, "scan_id": scan_id })),
    )
        .into_response()
}
