//! Regression diff between two scan results.
//!
//! Monitoring only alerts on things getting worse: a risk indicator turning
//! on, a legal page disappearing, a new third-party host, a new cookie.
//! Improvements are visible in the stored results but never alerted on.

use serde::Serialize;
use std::collections::HashSet;

use crate::models::ScanResult;

/// One regression rule over the boolean findings
struct FlagRule {
    description: &'static str,
    flag: fn(&ScanResult) -> bool,
    /// The flag value that constitutes a regression
    regressed_value: bool,
}

/// Table of boolean regressions. Risk indicators regress when they turn on,
/// legal pages regress when they vanish.
static FLAG_RULES: &[FlagRule] = &[
    FlagRule {
        description: "now loads external fonts",
        flag: |r| r.uses_external_fonts,
        regressed_value: true,
    },
    FlagRule {
        description: "now loads an analytics tag",
        flag: |r| r.uses_analytics_tag,
        regressed_value: true,
    },
    FlagRule {
        description: "now loads a social media pixel",
        flag: |r| r.uses_social_pixel,
        regressed_value: true,
    },
    FlagRule {
        description: "now sets tracking cookies",
        flag: |r| r.sets_tracking_cookie,
        regressed_value: true,
    },
    FlagRule {
        description: "legal notice page no longer found",
        flag: |r| r.has_legal_notice_page,
        regressed_value: false,
    },
    FlagRule {
        description: "privacy policy page no longer found",
        flag: |r| r.has_privacy_policy_page,
        regressed_value: false,
    },
];

/// Regressions between a baseline scan and a newer one
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScanDiff {
    pub has_changes: bool,
    pub new_risk_flags: Vec<String>,
    pub new_external_hosts: Vec<String>,
    /// `name (domain)`, in order of first appearance in the newer scan
    pub new_cookies: Vec<String>,
}

/// Compute the regressions `next` introduces over `prev`. Pure and total.
pub fn diff(prev: &ScanResult, next: &ScanResult) -> ScanDiff {
    let new_risk_flags: Vec<String> = FLAG_RULES
        .iter()
        .filter(|rule| {
            (rule.flag)(prev) != rule.regressed_value && (rule.flag)(next) == rule.regressed_value
        })
        .map(|rule| rule.description.to_string())
        .collect();

    let known_hosts: HashSet<&str> = prev.external_hosts.iter().map(String::as_str).collect();
    let new_external_hosts: Vec<String> = next
        .external_hosts
        .iter()
        .filter(|h| !known_hosts.contains(h.as_str()))
        .cloned()
        .collect();

    let known_cookies: HashSet<&str> = prev.cookies.iter().map(|c| c.name.as_str()).collect();
    let mut seen = HashSet::new();
    let new_cookies: Vec<String> = next
        .cookies
        .iter()
        .filter(|c| !known_cookies.contains(c.name.as_str()) && seen.insert(c.name.as_str()))
        .map(|c| format!("{} ({})", c.name, c.domain))
        .collect();

    let has_changes =
        !new_risk_flags.is_empty() || !new_external_hosts.is_empty() || !new_cookies.is_empty();

    ScanDiff {
        has_changes,
        new_risk_flags,
        new_external_hosts,
        new_cookies,
    }
}
