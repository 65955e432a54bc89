use serde::{Deserialize, Serialize};

/// A cookie observed at the end of the observation window, in the order the
/// browser reported it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedCookie {
    pub name: String,
    pub domain: String,
    pub value: String,
}

/// Execution metadata for a completed scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanMeta {
    /// URL the browser actually landed on after redirects
    pub final_url: String,
    /// HTTP status of the main document response, if one was observed
    pub http_status: Option<i64>,
    /// Wall-clock duration of the browser session in milliseconds
    pub duration_ms: i64,
    /// Total network requests observed
    pub request_count: i64,
    /// Must equal `external_hosts.len()`
    pub external_host_count: i64,
    /// Must equal `cookies.len()`
    pub cookie_count: i64,
}

/// Privacy findings for one rendered page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanResult {
    pub uses_external_fonts: bool,
    pub uses_analytics_tag: bool,
    pub uses_social_pixel: bool,
    pub sets_tracking_cookie: bool,
    pub has_legal_notice_page: bool,
    pub has_privacy_policy_page: bool,

    /// Distinct third-party hosts contacted, sorted for stable comparison
    pub external_hosts: Vec<String>,

    /// Cookies in observation order
    pub cookies: Vec<ObservedCookie>,

    pub meta: ScanMeta,
}

impl ScanResult {
    /// The derived counts in `meta` always mirror the collections.
    pub fn counts_consistent(&self) -> bool {
        self.meta.external_host_count == self.external_hosts.len() as i64
            && self.meta.cookie_count == self.cookies.len() as i64
    }

}
