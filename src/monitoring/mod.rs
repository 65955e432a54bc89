//! Periodic re-scan cycle for monitored sites.

pub mod diff;

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::alert::{AlertChannel, AlertContext};
use crate::config::MonitoringConfig;
use crate::models::{MonitoredSite, ScanResult, ScanStatus};
use crate::storage::ScanStore;
use crate::worker::ScanOrchestrator;

/// What a monitoring cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CycleSummary {
    pub sites_checked: usize,
    pub alerts_sent: usize,
    pub failures: usize,
}

/// Drives the recurring re-scan of opted-in sites.
///
/// Sites are processed sequentially; one site failing never stops the
/// cycle, and `last_checked_at` advances regardless of outcome so a broken
/// site cannot monopolize every run.
pub struct MonitoringEngine {
    store: Arc<dyn ScanStore>,
    orchestrator: Arc<ScanOrchestrator>,
    alerts: Arc<dyn AlertChannel>,
    config: MonitoringConfig,
}

impl MonitoringEngine {
    pub fn new(
        store: Arc<dyn ScanStore>,
        orchestrator: Arc<ScanOrchestrator>,
        alerts: Arc<dyn AlertChannel>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            alerts,
            config,
        }
    }

    /// Run one monitoring cycle over the sites that are due.
    pub async fn run_cycle(&self) -> CycleSummary {
        let cutoff = Utc::now() - Duration::hours(self.config.recheck_interval_hours);

        let sites = match self
            .store
            .due_sites(cutoff, self.config.max_sites_per_run)
            .await
        {
            Ok(sites) => sites,
            Err(e) => {
                error!(error = %e, "failed to load due sites");
                return CycleSummary {
                    failures: 1,
                    ..Default::default()
                };
            }
        };

        info!(due = sites.len(), "monitoring cycle started");

        let mut summary = CycleSummary::default();
        for site in sites {
            summary.sites_checked += 1;
            match self.check_site(&site).await {
                Ok(alerted) => {
                    if alerted {
                        summary.alerts_sent += 1;
                    }
                }
                Err(e) => {
                    warn!(site_id = %site.id, url = %site.url, error = %e, "site check failed");
                    summary.failures += 1;
                }
            }

            // The stamp advances on failure too
            if let Err(e) = self.store.touch_site(site.id).await {
                error!(site_id = %site.id, error = %e, "failed to stamp check time");
            }
        }

        info!(
            checked = summary.sites_checked,
            alerts = summary.alerts_sent,
            failures = summary.failures,
            "monitoring cycle finished"
        );
        summary
    }

    /// Re-scan one site, diff against its baseline, alert on regressions.
    /// Returns whether an alert went out.
    async fn check_site(&self, site: &MonitoredSite) -> anyhow::Result<bool> {
        let baseline = self.baseline_result(site).await?;

        let scan_id = self.store.insert_queued(&site.url, None).await?;
        self.orchestrator.execute(scan_id).await;

        let scan = self
            .store
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("re-scan {scan_id} vanished"))?;

        let result = match (scan.status, scan.result) {
            (ScanStatus::Done, Some(result)) => result,
            _ => {
                // Failed re-scan: keep the old baseline, no alert
                anyhow::bail!(
                    "re-scan ended in {} ({})",
                    scan.status.as_str(),
                    scan.error_message.as_deref().unwrap_or("no detail")
                );
            }
        };

        self.store.set_site_baseline(site.id, scan_id).await?;

        let Some(previous) = baseline else {
            // First successful scan becomes the baseline, nothing to diff
            return Ok(false);
        };

        let changes = diff::diff(&previous, &result);
        if !changes.has_changes {
            return Ok(false);
        }

        let context = AlertContext {
            site_url: site.url.clone(),
            diff: changes,
        };
        if let Err(e) = self.alerts.send_alert(&site.email, &context).await {
            // Alert failure must not roll back the baseline update
            warn!(site_id = %site.id, error = %e, "alert delivery failed");
            return Ok(false);
        }

        Ok(true)
    }

    async fn baseline_result(&self, site: &MonitoredSite) -> anyhow::Result<Option<ScanResult>> {
        let Some(baseline_id) = site.last_scan_id else {
            return Ok(None);
        };
        let scan = self.store.get_scan(baseline_id).await?;
        Ok(scan.and_then(|s| s.result))
    }
}
