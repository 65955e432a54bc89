use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A monitored site as persisted in the `monitored_sites` table.
///
/// One row per (email, url) pair. `last_scan_id` points at the baseline scan
/// the next monitoring cycle diffs against; it only advances on a successful
/// re-scan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitoredSite {
    pub id: Uuid,
    pub url: String,
    pub email: String,
    pub last_scan_id: Option<Uuid>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
