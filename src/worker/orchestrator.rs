//! Scan job orchestration.
//!
//! Owns the `Queued -> Running -> Done | Error` lifecycle. Submission
//! validates and inserts, then hands execution to a spawned task; execution
//! re-validates, runs the browser session under a single wall-clock budget,
//! and writes exactly one terminal state. Persistence failures during
//! execution are logged and abort the attempt; they are never retried here.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::guard::dns_guard::check_rebind;
use crate::guard::url_guard::{normalize, ValidatedTarget};
use crate::scanner::BrowserScanSession;
use crate::storage::{ScanStore, StoreError};

/// Same (url, requester) inside this window reuses the existing scan.
const IDEMPOTENCY_WINDOW_MINUTES: i64 = 2;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The target failed validation; carries the taxonomy code for the caller
    #[error(transparent)]
    Rejected(#[from] ScanError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a successful submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(Uuid),
    /// An equivalent recent submission already exists
    Reused(Uuid),
}

impl SubmitOutcome {
    pub fn scan_id(&self) -> Uuid {
        match self {
            SubmitOutcome::Created(id) | SubmitOutcome::Reused(id) => *id,
        }
    }
}

pub struct ScanOrchestrator {
    store: Arc<dyn ScanStore>,
    scanner: ScannerConfig,
}

impl ScanOrchestrator {
    pub fn new(store: Arc<dyn ScanStore>, scanner: ScannerConfig) -> Self {
        Self { store, scanner }
    }

    /// Validate a submission, persist it as queued, and dispatch execution.
    ///
    /// Returns as soon as the job exists; the caller polls for the outcome.
    pub async fn submit(
        self: Arc<Self>,
        raw_url: &str,
        requester_ip: Option<&str>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let target = self.vet(raw_url).await?;

        if let Some(existing) = self
            .store
            .find_recent_submission(
                &target.url,
                requester_ip,
                chrono::Duration::minutes(IDEMPOTENCY_WINDOW_MINUTES),
            )
            .await?
        {
            debug!(scan_id = %existing, url = %target.url, "reusing recent submission");
            return Ok(SubmitOutcome::Reused(existing));
        }

        let id = self.store.insert_queued(&target.url, requester_ip).await?;
        self.dispatch(id);

        Ok(SubmitOutcome::Created(id))
    }

    /// Spawn execution as a supervised background task.
    pub fn dispatch(self: Arc<Self>, scan_id: Uuid) {
        tokio::spawn(async move {
            self.execute(scan_id).await;
        });
    }

    /// Execute a queued scan to a terminal state.
    ///
    /// No-ops on unknown, terminal, or concurrently claimed jobs.
    pub async fn execute(&self, scan_id: Uuid) {
        let job = match self.store.get_scan(scan_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(scan_id = %scan_id, "scan not found, skipping execution");
                return;
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "failed to load scan");
                return;
            }
        };

        if job.is_terminal() {
            debug!(scan_id = %scan_id, status = job.status.as_str(), "scan already terminal");
            return;
        }

        match self.store.mark_running(scan_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(scan_id = %scan_id, "scan claimed by another executor");
                return;
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "failed to mark scan running");
                return;
            }
        }

        info!(scan_id = %scan_id, url = %job.url, "scan started");

        let budget = Duration::from_secs(self.scanner.job_timeout_seconds);
        let outcome = match tokio::time::timeout(budget, self.run_scan(&job.url)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ScanError::navigation_timeout(format!(
                "scan exceeded {}s budget",
                self.scanner.job_timeout_seconds
            ))),
        };

        match outcome {
            Ok(result) => match self.store.mark_done(scan_id, &result).await {
                Ok(true) => info!(scan_id = %scan_id, "scan done"),
                Ok(false) => warn!(scan_id = %scan_id, "scan no longer running, result dropped"),
                Err(e) => error!(scan_id = %scan_id, error = %e, "failed to persist result"),
            },
            Err(scan_error) => {
                let encoded = scan_error.encode();
                match self.store.mark_error(scan_id, &encoded).await {
                    Ok(true) => info!(scan_id = %scan_id, error = %encoded, "scan errored"),
                    Ok(false) => warn!(scan_id = %scan_id, "scan already terminal, error dropped"),
                    Err(e) => error!(scan_id = %scan_id, error = %e, "failed to persist error"),
                }
            }
        }
    }

    async fn run_scan(&self, url: &str) -> Result<crate::models::ScanResult, ScanError> {
        // The job may have sat queued for a while; both guard layers run
        // again so DNS changes since submission are caught.
        let target = self.vet(url).await?;
        BrowserScanSession::new(self.scanner.clone()).scan(&target).await
    }

    async fn vet(&self, raw_url: &str) -> Result<ValidatedTarget, ScanError> {
        let target = normalize(raw_url, self.scanner.allow_dev_ports)?;
        check_rebind(
            &target.host,
            Duration::from_secs(self.scanner.dns_timeout_seconds),
        )
        .await?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorKind;
    use crate::models::{ScanJob, ScanStatus};
    use crate::storage::MockScanStore;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn job(id: Uuid, url: &str, status: ScanStatus) -> ScanJob {
        ScanJob {
            id,
            url: url.to_string(),
            status,
            result: None,
            error_message: None,
            requester_ip: None,
            created_at: Utc::now(),
        }
    }

    fn orchestrator(store: MockScanStore) -> Arc<ScanOrchestrator> {
        Arc::new(ScanOrchestrator::new(
            Arc::new(store),
            ScannerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_execute_noop_on_terminal_job() {
        let id = Uuid::new_v4();
        let mut store = MockScanStore::new();
        store
            .expect_get_scan()
            .with(eq(id))
            .returning(move |_| Ok(Some(job(id, "https://example.com/", ScanStatus::Done))));
        // No mark_* expectations: any transition attempt fails the test

        orchestrator(store).execute(id).await;
    }

    #[tokio::test]
    async fn test_execute_noop_on_missing_job() {
        let id = Uuid::new_v4();
        let mut store = MockScanStore::new();
        store.expect_get_scan().returning(|_| Ok(None));

        orchestrator(store).execute(id).await;
    }

    #[tokio::test]
    async fn test_execute_backs_off_when_claim_lost() {
        let id = Uuid::new_v4();
        let mut store = MockScanStore::new();
        store
            .expect_get_scan()
            .returning(move |_| Ok(Some(job(id, "https://example.com/", ScanStatus::Queued))));
        store
            .expect_mark_running()
            .with(eq(id))
            .returning(|_| Ok(false));

        orchestrator(store).execute(id).await;
    }

    #[tokio::test]
    async fn test_execute_classifies_blocked_target() {
        // A job whose URL fails the static guard ends in error with the
        // blocked_url code, without ever launching a browser
        let id = Uuid::new_v4();
        let mut store = MockScanStore::new();
        store
            .expect_get_scan()
            .returning(move |_| Ok(Some(job(id, "http://localhost/admin", ScanStatus::Queued))));
        store.expect_mark_running().returning(|_| Ok(true));
        store
            .expect_mark_error()
            .withf(|_, msg| msg.starts_with("blocked_url: "))
            .times(1)
            .returning(|_, _| Ok(true));

        orchestrator(store).execute(id).await;
    }

    #[tokio::test]
    async fn test_execute_survives_error_write_failure() {
        let id = Uuid::new_v4();
        let mut store = MockScanStore::new();
        store
            .expect_get_scan()
            .returning(move |_| Ok(Some(job(id, "http://localhost/", ScanStatus::Queued))));
        store.expect_mark_running().returning(|_| Ok(true));
        store
            .expect_mark_error()
            .returning(|_, _| Err(StoreError::Corrupt("write failed".to_string())));

        // Must not panic or retry
        orchestrator(store).execute(id).await;
    }

    #[tokio::test]
    async fn test_submit_rejects_blocked_url_without_persisting() {
        let store = MockScanStore::new();
        let orch = orchestrator(store);

        let err = orch.submit("http://localhost", None).await.unwrap_err();
        match err {
            SubmitError::Rejected(e) => assert_eq!(e.kind, ScanErrorKind::BlockedUrl),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_ip_literal() {
        let store = MockScanStore::new();
        let orch = orchestrator(store);

        let err = orch
            .submit("http://169.254.169.254/latest/meta-data/", Some("1.2.3.4"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(_)));
    }
}
