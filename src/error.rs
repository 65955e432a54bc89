//! Scan failure taxonomy and the persisted error-string format.
//!
//! Every failure a caller can observe is one of the fixed [`ScanErrorKind`]
//! codes plus a free-text detail. The persisted form is `<code>: <detail>`;
//! [`ScanError::decode`] must round-trip whatever [`ScanError::encode`]
//! produced and fall back to `unknown` for anything malformed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed failure taxonomy, in classification priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorKind {
    /// Safety policy rejected the target (static guard, rebind, redirect landing)
    BlockedUrl,
    /// Name could not be resolved in time
    DnsFailed,
    /// Page did not finish loading in time (navigation or overall job timeout)
    NavigationTimeout,
    /// Browser engine raised an error unrelated to the above
    BrowserFailed,
    /// Unclassified, including malformed stored error strings
    Unknown,
}

impl ScanErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanErrorKind::BlockedUrl => "blocked_url",
            ScanErrorKind::DnsFailed => "dns_failed",
            ScanErrorKind::NavigationTimeout => "navigation_timeout",
            ScanErrorKind::BrowserFailed => "browser_failed",
            ScanErrorKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocked_url" => Some(ScanErrorKind::BlockedUrl),
            "dns_failed" => Some(ScanErrorKind::DnsFailed),
            "navigation_timeout" => Some(ScanErrorKind::NavigationTimeout),
            "browser_failed" => Some(ScanErrorKind::BrowserFailed),
            "unknown" => Some(ScanErrorKind::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed scan failure carrying its taxonomy code and a human-readable detail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {detail}", kind.as_str())]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub detail: String,
}

impl ScanError {
    pub fn new(kind: ScanErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn blocked(detail: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::BlockedUrl, detail)
    }

    pub fn dns_failed(detail: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DnsFailed, detail)
    }

    pub fn navigation_timeout(detail: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::NavigationTimeout, detail)
    }

    pub fn browser_failed(detail: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::BrowserFailed, detail)
    }

    /// Storage format for `scans.error_message`.
    pub fn encode(&self) -> String {
        format!("{}: {}", self.kind.as_str(), self.detail)
    }

    /// Inverse of [`encode`](Self::encode). Splits on the first colon; an
    /// unrecognized prefix yields `unknown` with the full string as detail.
    pub fn decode(stored: &str) -> Self {
        match stored.split_once(':') {
            Some((prefix, rest)) => match ScanErrorKind::parse(prefix.trim()) {
                Some(kind) => Self::new(kind, rest.trim()),
                None => Self::new(ScanErrorKind::Unknown, stored.trim()),
            },
            None => Self::new(ScanErrorKind::Unknown, stored.trim()),
        }
    }
}

/// Classify a raw error message from the browser engine or runtime into the
/// fixed taxonomy. Used for failures that are not already a [`ScanError`].
pub fn classify_message(msg: &str) -> ScanErrorKind {
    let lower = msg.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ScanErrorKind::NavigationTimeout
    } else if lower.contains("err_name_not_resolved")
        || lower.contains("enotfound")
        || lower.contains("dns")
    {
        ScanErrorKind::DnsFailed
    } else if lower.contains("blocked") {
        ScanErrorKind::BlockedUrl
    } else {
        ScanErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_decode_round_trip() {
        for kind in [
            ScanErrorKind::BlockedUrl,
            ScanErrorKind::DnsFailed,
            ScanErrorKind::NavigationTimeout,
            ScanErrorKind::BrowserFailed,
            ScanErrorKind::Unknown,
        ] {
            let err = ScanError::new(kind, "something went wrong");
            let decoded = ScanError::decode(&err.encode());
            assert_eq!(decoded.kind, kind);
            assert_eq!(decoded.detail, "something went wrong");
        }
    }

    #[test]
    fn test_decode_preserves_detail_with_colons() {
        let err = ScanError::blocked("redirect to blocked address: http://10.0.0.5/");
        let decoded = ScanError::decode(&err.encode());
        assert_eq!(decoded.kind, ScanErrorKind::BlockedUrl);
        assert_eq!(decoded.detail, "redirect to blocked address: http://10.0.0.5/");
    }

    #[test]
    fn test_decode_unknown_prefix() {
        let decoded = ScanError::decode("playwright_failed: something");
        assert_eq!(decoded.kind, ScanErrorKind::Unknown);

        let decoded = ScanError::decode("no colon at all");
        assert_eq!(decoded.kind, ScanErrorKind::Unknown);
        assert_eq!(decoded.detail, "no colon at all");
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            classify_message("Navigation timeout of 45000ms exceeded"),
            ScanErrorKind::NavigationTimeout
        );
        assert_eq!(
            classify_message("net::ERR_NAME_NOT_RESOLVED"),
            ScanErrorKind::DnsFailed
        );
        assert_eq!(classify_message("request blocked by policy"), ScanErrorKind::BlockedUrl);
        assert_eq!(classify_message("segfault in renderer"), ScanErrorKind::Unknown);
    }

    #[test]
    fn test_display_matches_encoding() {
        let err = ScanError::dns_failed("no records");
        assert_eq!(err.to_string(), err.encode());
    }
}
