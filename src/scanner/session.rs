//! Browser scan session.
//!
//! Each scan launches a fresh headless Chromium, observes network traffic
//! through CDP for a fixed window, then extracts cookies and page HTML. No
//! browser context is ever reused between scans. Media (audio/video)
//! requests are aborted at the fetch layer; everything else is allowed so
//! the page behaves the way a visitor would see it.

use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::config::ScannerConfig;
use crate::error::{classify_message, ScanError, ScanErrorKind};
use crate::guard::dns_guard::check_rebind;
use crate::guard::url_guard::ValidatedTarget;
use crate::models::{ObservedCookie, ScanMeta, ScanResult};
use crate::scanner::indicators;

/// Runs one scan per call against a throwaway browser instance.
pub struct BrowserScanSession {
    config: ScannerConfig,
}

impl BrowserScanSession {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Render the validated target and report its privacy behavior.
    ///
    /// The browser is torn down on every exit path, success or failure.
    pub async fn scan(&self, target: &ValidatedTarget) -> Result<ScanResult, ScanError> {
        let started = Instant::now();

        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1366, 900)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", self.config.user_agent))
            .build()
            .map_err(|e| ScanError::browser_failed(format!("browser config: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScanError::browser_failed(format!("browser launch: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        // The observation runs in its own function so `?` inside it cannot
        // skip teardown.
        let outcome = self.observe(&browser, target, started).await;

        if let Err(e) = browser.close().await {
            warn!(error = %e, "failed to close browser");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        outcome
    }

    async fn observe(
        &self,
        browser: &Browser,
        target: &ValidatedTarget,
        started: Instant,
    ) -> Result<ScanResult, ScanError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScanError::browser_failed(format!("new page: {e}")))?;

        // Subscribe before navigation so the very first request is captured.
        let request_urls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let document_status: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));

        let mut sent_events = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| ScanError::browser_failed(format!("request listener: {e}")))?;
        let urls_sink = Arc::clone(&request_urls);
        let collect_task = tokio::spawn(async move {
            while let Some(event) = sent_events.next().await {
                if let Ok(mut urls) = urls_sink.lock() {
                    urls.push(event.request.url.clone());
                }
            }
        });

        let mut response_events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| ScanError::browser_failed(format!("response listener: {e}")))?;
        let status_sink = Arc::clone(&document_status);
        let status_task = tokio::spawn(async move {
            while let Some(event) = response_events.next().await {
                if let Ok(mut status) = status_sink.lock() {
                    // The main document answers first
                    if status.is_none() {
                        *status = Some(event.response.status);
                    }
                }
            }
        });

        let mut paused_events = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| ScanError::browser_failed(format!("intercept listener: {e}")))?;
        let intercept_page = page.clone();
        let intercept_task = tokio::spawn(async move {
            while let Some(event) = paused_events.next().await {
                let verdict = if event.resource_type == ResourceType::Media {
                    intercept_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    intercept_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = verdict {
                    debug!(error = %e, url = %event.request.url, "fetch intercept failed");
                }
            }
        });

        page.execute(
            fetch::EnableParams::builder()
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Request)
                        .build(),
                )
                .build(),
        )
        .await
        .map_err(|e| ScanError::browser_failed(format!("fetch enable: {e}")))?;

        let navigation = tokio::time::timeout(
            Duration::from_secs(self.config.navigation_timeout_seconds),
            async {
                page.goto(target.url.clone())
                    .await
                    .map_err(|e| classify_navigation_error(&e.to_string()))?;
                page.wait_for_navigation()
                    .await
                    .map_err(|e| classify_navigation_error(&e.to_string()))?;
                Ok::<(), ScanError>(())
            },
        )
        .await;

        match navigation {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScanError::navigation_timeout(format!(
                    "page did not load within {}s",
                    self.config.navigation_timeout_seconds
                )))
            }
        }

        // Redirects may have moved us off the vetted host; re-apply the
        // target policy to wherever we actually landed.
        let landed_url = page
            .url()
            .await
            .map_err(|e| ScanError::browser_failed(format!("read url: {e}")))?
            .unwrap_or_else(|| target.url.clone());
        self.recheck_landed_host(&landed_url, &target.host).await?;

        tokio::time::sleep(Duration::from_secs(self.config.observation_window_seconds)).await;

        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| ScanError::browser_failed(format!("read cookies: {e}")))?
            .into_iter()
            .map(|c| ObservedCookie {
                name: c.name,
                domain: c.domain,
                value: c.value,
            })
            .collect::<Vec<_>>();

        let html = page
            .content()
            .await
            .map_err(|e| ScanError::browser_failed(format!("read content: {e}")))?;

        let final_url = page
            .url()
            .await
            .map_err(|e| ScanError::browser_failed(format!("read url: {e}")))?
            .unwrap_or(landed_url);

        collect_task.abort();
        status_task.abort();
        intercept_task.abort();

        let observed_urls = request_urls.lock().map(|u| u.clone()).unwrap_or_default();
        let http_status = document_status.lock().ok().and_then(|s| *s);

        Ok(compose_result(
            &observed_urls,
            cookies,
            &html,
            &target.host,
            ScanMeta {
                final_url,
                http_status,
                duration_ms: started.elapsed().as_millis() as i64,
                request_count: observed_urls.len() as i64,
                external_host_count: 0, // filled by compose_result
                cookie_count: 0,        // filled by compose_result
            },
        ))
    }

    /// TOCTOU defense: the landed host is re-vetted even though the target
    /// host already passed the rebind guard before navigation.
    async fn recheck_landed_host(&self, landed_url: &str, target_host: &str) -> Result<(), ScanError> {
        let parsed = Url::parse(landed_url)
            .map_err(|e| ScanError::browser_failed(format!("landed url unparseable: {e}")))?;

        match parsed.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.to_lowercase();
                if domain != target_host {
                    check_rebind(
                        &domain,
                        Duration::from_secs(self.config.dns_timeout_seconds),
                    )
                    .await
                    .map_err(|e| match e.kind {
                        ScanErrorKind::BlockedUrl => {
                            ScanError::blocked(format!("redirect landed on blocked host: {e}"))
                        }
                        _ => e,
                    })?;
                }
                Ok(())
            }
            // IP-literal landings are blocked outright, same as submitted
            // literals; metadata endpoints live on public-looking addresses.
            Some(Host::Ipv4(addr)) => Err(ScanError::blocked(format!(
                "redirect landed on ip literal {addr}"
            ))),
            Some(Host::Ipv6(addr)) => Err(ScanError::blocked(format!(
                "redirect landed on ip literal {addr}"
            ))),
            None => Ok(()),
        }
    }
}

fn classify_navigation_error(message: &str) -> ScanError {
    ScanError::new(classify_message_or_browser(message), message)
}

fn classify_message_or_browser(message: &str) -> ScanErrorKind {
    match classify_message(message) {
        ScanErrorKind::Unknown => ScanErrorKind::BrowserFailed,
        kind => kind,
    }
}

/// Pure assembly of a [`ScanResult`] from raw observations.
fn compose_result(
    request_urls: &[String],
    cookies: Vec<ObservedCookie>,
    html: &str,
    target_host: &str,
    mut meta: ScanMeta,
) -> ScanResult {
    let hits = indicators::evaluate_indicators(request_urls);
    let external_hosts = indicators::external_hosts(request_urls, target_host);
    let html_lower = html.to_lowercase();

    meta.external_host_count = external_hosts.len() as i64;
    meta.cookie_count = cookies.len() as i64;

    ScanResult {
        uses_external_fonts: hits.external_fonts,
        uses_analytics_tag: hits.analytics_tag,
        uses_social_pixel: hits.social_pixel,
        sets_tracking_cookie: indicators::has_tracking_cookie(
            cookies.iter().map(|c| c.name.as_str()),
        ),
        has_legal_notice_page: indicators::has_legal_notice_page(&html_lower),
        has_privacy_policy_page: indicators::has_privacy_policy_page(&html_lower),
        external_hosts,
        cookies,
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ScanMeta {
        ScanMeta {
            final_url: "https://example.com/".to_string(),
            http_status: Some(200),
            duration_ms: 100,
            request_count: 3,
            external_host_count: 0,
            cookie_count: 0,
        }
    }

    #[test]
    fn test_compose_result_fills_counts_and_flags() {
        let urls = vec![
            "https://example.com/".to_string(),
            "https://fonts.googleapis.com/css2".to_string(),
            "https://www.googletagmanager.com/gtag/js".to_string(),
        ];
        let cookies = vec![ObservedCookie {
            name: "_ga".to_string(),
            domain: ".example.com".to_string(),
            value: "GA1.1".to_string(),
        }];
        let html = "<a href=\"/impressum\">Impressum</a><a>Datenschutz</a>";

        let result = compose_result(&urls, cookies, html, "example.com", meta());

        assert!(result.uses_external_fonts);
        assert!(result.uses_analytics_tag);
        assert!(!result.uses_social_pixel);
        assert!(result.sets_tracking_cookie);
        assert!(result.has_legal_notice_page);
        assert!(result.has_privacy_policy_page);
        assert_eq!(
            result.external_hosts,
            vec!["fonts.googleapis.com", "www.googletagmanager.com"]
        );
        assert!(result.counts_consistent());
    }

    #[test]
    fn test_compose_result_clean_page() {
        let urls = vec!["https://example.com/".to_string()];
        let result = compose_result(&urls, Vec::new(), "<html></html>", "example.com", meta());

        assert!(!result.uses_external_fonts);
        assert!(!result.sets_tracking_cookie);
        assert!(!result.has_legal_notice_page);
        assert!(result.external_hosts.is_empty());
        assert!(result.counts_consistent());
    }

    #[tokio::test]
    async fn test_recheck_blocks_ip_literal_landing() {
        let session = BrowserScanSession::new(ScannerConfig::default());

        // Public literals are blocked just like private ones
        let err = session
            .recheck_landed_host("http://8.8.8.8/", "example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::BlockedUrl);

        let err = session
            .recheck_landed_host("http://169.254.169.254/latest/meta-data/", "example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::BlockedUrl);

        let err = session
            .recheck_landed_host("http://[::1]/", "example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::BlockedUrl);
    }

    #[tokio::test]
    async fn test_recheck_same_host_needs_no_resolution() {
        let session = BrowserScanSession::new(ScannerConfig::default());
        assert!(session
            .recheck_landed_host("https://example.com/after-redirect", "example.com")
            .await
            .is_ok());
    }

    #[test]
    fn test_navigation_error_classification() {
        assert_eq!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED").kind,
            ScanErrorKind::DnsFailed
        );
        assert_eq!(
            classify_navigation_error("Timeout waiting for frame").kind,
            ScanErrorKind::NavigationTimeout
        );
        // Anything unclassified from the engine is a browser failure
        assert_eq!(
            classify_navigation_error("Protocol error (Page.navigate)").kind,
            ScanErrorKind::BrowserFailed
        );
    }
}
