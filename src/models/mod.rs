pub mod monitored_site;
pub mod scan_job;
pub mod scan_result;

pub use monitored_site::MonitoredSite;
pub use scan_job::{ScanJob, ScanStatus};
pub use scan_result::{ObservedCookie, ScanMeta, ScanResult};
