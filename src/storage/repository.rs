//! Persistence layer.
//!
//! `ScanStore` is the seam between the orchestrator and Postgres; the
//! guarded UPDATEs are what make scan-state transitions forward-only even
//! when two executors race on the same job. Each `mark_*` returns whether
//! the transition actually happened.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{MonitoredSite, ScanJob, ScanResult, ScanStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Insert a new queued scan and return its id.
    async fn insert_queued<'a>(
        &self,
        url: &str,
        requester_ip: Option<&'a str>,
    ) -> Result<Uuid, StoreError>;

    async fn get_scan(&self, id: Uuid) -> Result<Option<ScanJob>, StoreError>;

    /// Most recent scan for the same (url, requester) inside the idempotency
    /// window, regardless of its state.
    async fn find_recent_submission<'a>(
        &self,
        url: &str,
        requester_ip: Option<&'a str>,
        window: Duration,
    ) -> Result<Option<Uuid>, StoreError>;

    /// `queued -> running`. False when the job was not in `queued`.
    async fn mark_running(&self, id: Uuid) -> Result<bool, StoreError>;

    /// `running -> done`. False when the job was not in `running`.
    async fn mark_done(&self, id: Uuid, result: &ScanResult) -> Result<bool, StoreError>;

    /// `queued|running -> error`. False when the job was already terminal.
    async fn mark_error(&self, id: Uuid, error_message: &str) -> Result<bool, StoreError>;

    async fn upsert_monitored_site(
        &self,
        email: &str,
        url: &str,
        baseline_scan_id: Uuid,
    ) -> Result<Uuid, StoreError>;

    async fn count_sites_for_email(&self, email: &str) -> Result<i64, StoreError>;

    /// Sites due for a re-check, never-checked first.
    async fn due_sites(
        &self,
        checked_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MonitoredSite>, StoreError>;

    /// Stamp `last_checked_at`, regardless of the re-scan outcome.
    async fn touch_site(&self, id: Uuid) -> Result<(), StoreError>;

    async fn set_site_baseline(&self, id: Uuid, scan_id: Uuid) -> Result<(), StoreError>;
}

/// Postgres-backed store
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw `scans` row; JSONB and status stay untyped until conversion so a bad
/// row surfaces as [`StoreError::Corrupt`] instead of a decode panic.
#[derive(FromRow)]
struct ScanRow {
    id: Uuid,
    url: String,
    status: String,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
    requester_ip: Option<String>,
    created_at: DateTime<Utc>,
}

fn row_to_job(row: ScanRow) -> Result<ScanJob, StoreError> {
    let status = ScanStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Corrupt(format!("scan {} has status '{}'", row.id, row.status)))?;
    let result = match row.result {
        Some(value) => Some(serde_json::from_value(value)?),
        None => None,
    };
    Ok(ScanJob {
        id: row.id,
        url: row.url,
        status,
        result,
        error_message: row.error_message,
        requester_ip: row.requester_ip,
        created_at: row.created_at,
    })
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn insert_queued<'a>(
        &self,
        url: &str,
        requester_ip: Option<&'a str>,
    ) -> Result<Uuid, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO scans (url, status, requester_ip)
            VALUES ($1, 'queued', $2)
            RETURNING id
            "#,
        )
        .bind(url)
        .bind(requester_ip)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(scan_id = %id, url = %url, "created scan record");
        Ok(id)
    }

    async fn get_scan(&self, id: Uuid) -> Result<Option<ScanJob>, StoreError> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT * FROM scans WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    async fn find_recent_submission<'a>(
        &self,
        url: &str,
        requester_ip: Option<&'a str>,
        window: Duration,
    ) -> Result<Option<Uuid>, StoreError> {
        let cutoff = Utc::now() - window;

        let id = sqlx::query_scalar(
            r#"
            SELECT id FROM scans
            WHERE url = $1
              AND requester_ip IS NOT DISTINCT FROM $2
              AND created_at > $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(requester_ip)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn mark_running(&self, id: Uuid) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE scans SET status = 'running'
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn mark_done(&self, id: Uuid, result: &ScanResult) -> Result<bool, StoreError> {
        let payload = serde_json::to_value(result)?;

        let updated = sqlx::query(
            r#"
            UPDATE scans SET status = 'done', result = $2, error_message = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            tracing::info!(scan_id = %id, "scan completed");
        }
        Ok(updated == 1)
    }

    async fn mark_error(&self, id: Uuid, error_message: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE scans SET status = 'error', error_message = $2, result = NULL
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            tracing::info!(scan_id = %id, error = %error_message, "scan failed");
        }
        Ok(updated == 1)
    }

    async fn upsert_monitored_site(
        &self,
        email: &str,
        url: &str,
        baseline_scan_id: Uuid,
    ) -> Result<Uuid, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO monitored_sites (url, email, last_scan_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (email, url)
            DO UPDATE SET last_scan_id = EXCLUDED.last_scan_id
            RETURNING id
            "#,
        )
        .bind(url)
        .bind(email)
        .bind(baseline_scan_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(site_id = %id, url = %url, "monitoring enabled");
        Ok(id)
    }

    async fn count_sites_for_email(&self, email: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM monitored_sites WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn due_sites(
        &self,
        checked_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MonitoredSite>, StoreError> {
        let sites = sqlx::query_as::<_, MonitoredSite>(
            r#"
            SELECT * FROM monitored_sites
            WHERE last_checked_at IS NULL OR last_checked_at < $1
            ORDER BY last_checked_at ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(checked_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sites)
    }

    async fn touch_site(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE monitored_sites SET last_checked_at = now() WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_site_baseline(&self, id: Uuid, scan_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE monitored_sites SET last_scan_id = $2 WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(scan_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, result: Option<serde_json::Value>) -> ScanRow {
        ScanRow {
            id: Uuid::new_v4(),
            url: "https://example.com/".to_string(),
            status: status.to_string(),
            result,
            error_message: None,
            requester_ip: Some("203.0.113.9".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_to_job_parses_status() {
        let job = row_to_job(row("queued", None)).unwrap();
        assert_eq!(job.status, ScanStatus::Queued);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_row_to_job_rejects_unknown_status() {
        let err = row_to_job(row("paused", None)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_row_to_job_decodes_result_json() {
        let value = serde_json::json!({
            "uses_external_fonts": false,
            "uses_analytics_tag": false,
            "uses_social_pixel": false,
            "sets_tracking_cookie": false,
            "has_legal_notice_page": true,
            "has_privacy_policy_page": true,
            "external_hosts": [],
            "cookies": [],
            "meta": {
                "final_url": "https://example.com/",
                "http_status": 200,
                "duration_ms": 12000,
                "request_count": 5,
                "external_host_count": 0,
                "cookie_count": 0
            }
        });

        let job = row_to_job(row("done", Some(value))).unwrap();
        let result = job.result.unwrap();
        assert!(result.has_legal_notice_page);
        assert_eq!(result.meta.request_count, 5);
    }

    #[test]
    fn test_row_to_job_rejects_malformed_result() {
        let err = row_to_job(row("done", Some(serde_json::json!({"bogus": 1})))).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
