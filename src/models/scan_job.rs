use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::scan_result::ScanResult;

/// Status of a scan job
///
/// Transitions are forward-only: `Queued -> Running -> Done | Error`.
/// Terminal states absorb every further transition attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Job is persisted and waiting for execution to pick it up
    Queued,
    /// Browser session is in flight
    Running,
    /// Scan produced a result
    Done,
    /// Scan failed with a classified error
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Done => "done",
            ScanStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ScanStatus::Queued),
            "running" => Some(ScanStatus::Running),
            "done" => Some(ScanStatus::Done),
            "error" => Some(ScanStatus::Error),
            _ => None,
        }
    }

    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Done | ScanStatus::Error)
    }
}

/// A scan job as persisted in the `scans` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    /// Unique identifier for the scan
    pub id: Uuid,

    /// Normalized target URL
    pub url: String,

    /// Current lifecycle state
    pub status: ScanStatus,

    /// Scan result, present exactly when status is Done
    pub result: Option<ScanResult>,

    /// Encoded `<code>: <detail>` failure, present exactly when status is Error
    pub error_message: Option<String>,

    /// Submitting client, used for idempotent resubmission
    pub requester_ip: Option<String>,

    /// Timestamp when the job was created
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            ScanStatus::Queued,
            ScanStatus::Running,
            ScanStatus::Done,
            ScanStatus::Error,
        ] {
            assert_eq!(ScanStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ScanStatus::parse("pending"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ScanStatus::Queued.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Done.is_terminal());
        assert!(ScanStatus::Error.is_terminal());
    }
}
