//! Data-driven indicator rules.
//!
//! All detection is table-driven: request-URL substring matchers per
//! category, cookie-name prefixes, and anchor patterns for the two legal
//! pages. The tables are the single place new trackers get added.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use url::Url;

/// Indicator categories derived from observed request URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorCategory {
    ExternalFonts,
    AnalyticsTag,
    SocialPixel,
}

/// One detection rule: a category fires when any matcher occurs as a
/// substring of an observed request URL.
pub struct IndicatorRule {
    pub category: IndicatorCategory,
    pub matchers: &'static [&'static str],
}

/// Ordered rule table, evaluated in full (categories are independent).
pub static INDICATOR_RULES: &[IndicatorRule] = &[
    IndicatorRule {
        category: IndicatorCategory::ExternalFonts,
        matchers: &["fonts.googleapis.com", "fonts.gstatic.com"],
    },
    IndicatorRule {
        category: IndicatorCategory::AnalyticsTag,
        matchers: &["googletagmanager.com", "google-analytics.com", "gtag/js"],
    },
    IndicatorRule {
        category: IndicatorCategory::SocialPixel,
        matchers: &["connect.facebook.net", "fbevents.js"],
    },
];

/// Cookie-name prefixes that mark a tracking cookie
pub static TRACKING_COOKIE_PREFIXES: &[&str] = &["_ga", "_gid", "_fbp", "_fbc"];

lazy_static! {
    static ref LEGAL_NOTICE_ANCHOR: Regex = Regex::new(r">\s*impressum\s*<").unwrap();
    static ref PRIVACY_ANCHOR: Regex = Regex::new(r">\s*datenschutz\s*<").unwrap();
}

static LEGAL_NOTICE_LITERALS: &[&str] =
    &[">impressum<", "href=\"/impressum", "href=\"./impressum"];

static PRIVACY_LITERALS: &[&str] = &[
    ">datenschutz<",
    "href=\"/datenschutz",
    "href=\"./datenschutz",
    "datenschutzerklärung",
    "datenschutzerkl&auml;rung",
];

/// Which indicator categories fire over the observed request URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndicatorHits {
    pub external_fonts: bool,
    pub analytics_tag: bool,
    pub social_pixel: bool,
}

/// Evaluate the rule table over every observed request URL.
pub fn evaluate_indicators(request_urls: &[String]) -> IndicatorHits {
    let mut hits = IndicatorHits::default();
    for rule in INDICATOR_RULES {
        let fired = request_urls
            .iter()
            .any(|u| rule.matchers.iter().any(|m| u.contains(m)));
        if fired {
            match rule.category {
                IndicatorCategory::ExternalFonts => hits.external_fonts = true,
                IndicatorCategory::AnalyticsTag => hits.analytics_tag = true,
                IndicatorCategory::SocialPixel => hits.social_pixel = true,
            }
        }
    }
    hits
}

/// True when any cookie name starts with a tracking prefix.
pub fn has_tracking_cookie<'a>(cookie_names: impl IntoIterator<Item = &'a str>) -> bool {
    cookie_names
        .into_iter()
        .any(|name| TRACKING_COOKIE_PREFIXES.iter().any(|p| name.starts_with(p)))
}

/// Scan lowercased page HTML for a legal-notice (Impressum) link.
pub fn has_legal_notice_page(html_lower: &str) -> bool {
    LEGAL_NOTICE_LITERALS.iter().any(|p| html_lower.contains(p))
        || LEGAL_NOTICE_ANCHOR.is_match(html_lower)
}

/// Scan lowercased page HTML for a privacy-policy (Datenschutz) link.
pub fn has_privacy_policy_page(html_lower: &str) -> bool {
    PRIVACY_LITERALS.iter().any(|p| html_lower.contains(p))
        || PRIVACY_ANCHOR.is_match(html_lower)
}

/// Distinct third-party hosts contacted during the scan, sorted.
///
/// The target host and its `www.` twin do not count as external.
pub fn external_hosts(request_urls: &[String], target_host: &str) -> Vec<String> {
    let target = target_host.to_lowercase();
    let twin = if let Some(stripped) = target.strip_prefix("www.") {
        stripped.to_string()
    } else {
        format!("www.{target}")
    };

    let mut hosts = BTreeSet::new();
    for raw in request_urls {
        if let Ok(parsed) = Url::parse(raw) {
            if let Some(host) = parsed.host_str() {
                let host = host.to_lowercase();
                if host != target && host != twin {
                    hosts.insert(host);
                }
            }
        }
    }
    hosts.into_iter().collect()
}
