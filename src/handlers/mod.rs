pub mod monitoring;
pub mod scans;

use std::sync::Arc;

use crate::config::Config;
use crate::monitoring::MonitoringEngine;
use crate::storage::ScanStore;
use crate::worker::{AdmissionController, ScanOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ScanStore>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub monitoring: Arc<MonitoringEngine>,
    pub admission: Arc<AdmissionController>,
    pub config: Arc<Config>,
}
