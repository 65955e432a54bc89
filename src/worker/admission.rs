//! Per-client admission control for scan submissions.
//!
//! In-memory sliding window plus a short cooldown between accepted scans.
//! Expired entries are pruned lazily on access; there is no background
//! sweeper. The map is size-capped so an address-rotating client cannot grow
//! it without bound.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::AdmissionConfig;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    /// Too many scans in the window, or still cooling down
    Denied { retry_after: Duration },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted)
    }
}

#[derive(Debug, Default)]
struct ClientWindow {
    /// Timestamps of accepted submissions, oldest first
    accepted: VecDeque<Instant>,
}

pub struct AdmissionController {
    config: AdmissionConfig,
    clients: Mutex<HashMap<String, ClientWindow>>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record a submission attempt for `client`.
    pub fn check(&self, client: &str) -> AdmissionDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> AdmissionDecision {
        let window = Duration::from_secs(self.config.window_seconds);
        let cooldown = Duration::from_secs(self.config.cooldown_seconds);

        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            // A poisoned map only means a panic elsewhere; fail open
            Err(poisoned) => poisoned.into_inner(),
        };

        if !clients.contains_key(client) && clients.len() >= self.config.max_tracked_clients {
            Self::evict(&mut clients, now, window, self.config.max_tracked_clients);
        }

        let entry = clients.entry(client.to_string()).or_default();

        // Lazy expiry of the window
        while let Some(front) = entry.accepted.front() {
            if now.duration_since(*front) >= window {
                entry.accepted.pop_front();
            } else {
                break;
            }
        }

        if let Some(last) = entry.accepted.back() {
            let since_last = now.duration_since(*last);
            if since_last < cooldown {
                return AdmissionDecision::Denied {
                    retry_after: cooldown - since_last,
                };
            }
        }

        if entry.accepted.len() >= self.config.max_requests_per_window {
            // Oldest entry leaving the window frees a slot
            let oldest = *entry.accepted.front().expect("non-empty window");
            return AdmissionDecision::Denied {
                retry_after: window - now.duration_since(oldest),
            };
        }

        entry.accepted.push_back(now);
        AdmissionDecision::Admitted
    }

    /// Drop fully expired windows; if none expired, drop the least recently
    /// active client to make room.
    fn evict(
        clients: &mut HashMap<String, ClientWindow>,
        now: Instant,
        window: Duration,
        cap: usize,
    ) {
        clients.retain(|_, w| {
            w.accepted
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });

        if clients.len() >= cap {
            if let Some(stale) = clients
                .iter()
                .min_by_key(|(_, w)| w.accepted.back().copied())
                .map(|(k, _)| k.clone())
            {
                clients.remove(&stale);
            }
        }
    }
}

/// Client identity for admission: first hop of `x-forwarded-for`, falling
/// back to a shared bucket for direct connections.
pub fn client_key(forwarded_for: Option<&str>) -> String {
    forwarded_for
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "dev".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(window: u64, max: usize, cooldown: u64) -> AdmissionController {
        AdmissionController::new(AdmissionConfig {
            window_seconds: window,
            max_requests_per_window: max,
            cooldown_seconds: cooldown,
            max_tracked_clients: 100,
        })
    }

    #[test]
    fn test_admits_within_limits() {
        let ctl = controller(600, 10, 10);
        let start = Instant::now();

        for i in 0..10 {
            let at = start + Duration::from_secs(i * 20);
            assert!(ctl.check_at("1.2.3.4", at).is_admitted(), "request {i}");
        }
    }

    #[test]
    fn test_cooldown_between_accepted_scans() {
        let ctl = controller(600, 10, 10);
        let start = Instant::now();

        assert!(ctl.check_at("1.2.3.4", start).is_admitted());
        match ctl.check_at("1.2.3.4", start + Duration::from_secs(3)) {
            AdmissionDecision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(7));
            }
            other => panic!("expected cooldown denial, got {other:?}"),
        }
        assert!(ctl
            .check_at("1.2.3.4", start + Duration::from_secs(10))
            .is_admitted());
    }

    #[test]
    fn test_window_limit() {
        let ctl = controller(600, 3, 1);
        let start = Instant::now();

        for i in 0..3 {
            assert!(ctl
                .check_at("1.2.3.4", start + Duration::from_secs(i * 30))
                .is_admitted());
        }

        // Window full; retry_after points at the oldest slot expiring
        match ctl.check_at("1.2.3.4", start + Duration::from_secs(100)) {
            AdmissionDecision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(500));
            }
            other => panic!("expected window denial, got {other:?}"),
        }

        // After the window rolls, a slot opens
        assert!(ctl
            .check_at("1.2.3.4", start + Duration::from_secs(601))
            .is_admitted());
    }

    #[test]
    fn test_clients_are_independent() {
        let ctl = controller(600, 1, 1);
        let start = Instant::now();

        assert!(ctl.check_at("1.2.3.4", start).is_admitted());
        assert!(ctl.check_at("5.6.7.8", start).is_admitted());
        assert!(!ctl.check_at("1.2.3.4", start + Duration::from_secs(2)).is_admitted());
    }

    #[test]
    fn test_client_key_extraction() {
        assert_eq!(client_key(Some("203.0.113.7, 10.0.0.1")), "203.0.113.7");
        assert_eq!(client_key(Some("  203.0.113.7  ")), "203.0.113.7");
        assert_eq!(client_key(Some("")), "dev");
        assert_eq!(client_key(None), "dev");
    }
}
