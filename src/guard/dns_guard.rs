//! DNS-rebind guard: the second SSRF layer.
//!
//! Resolves the hostname ourselves before handing it to the browser and
//! rejects any name that maps to a private, loopback, link-local, CGNAT, or
//! otherwise non-routable address. The same predicate re-checks the landed
//! host after redirects inside the browser session.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;

use crate::error::ScanError;

/// True when an address must never be fetched on behalf of a caller.
pub fn is_private_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            // v4-mapped addresses inherit the v4 verdict
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(mapped);
            }
            is_private_v6(v6)
        }
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    let segments = addr.segments();
    addr.is_loopback()
        || addr.is_unspecified()
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (segments[0] & 0xffc0) == 0xfe80
}

/// Apply the private-range policy to a resolved address set.
///
/// Empty resolution is `dns_failed`; any blocked address poisons the whole
/// set and yields `blocked_url`.
pub fn scrutinize(hostname: &str, addrs: Vec<IpAddr>) -> Result<Vec<IpAddr>, ScanError> {
    if addrs.is_empty() {
        return Err(ScanError::dns_failed(format!("no addresses for {hostname}")));
    }
    if let Some(bad) = addrs.iter().find(|a| is_private_ip(**a)) {
        return Err(ScanError::blocked(format!(
            "{hostname} resolves to blocked address {bad}"
        )));
    }
    Ok(addrs)
}

/// Resolve `hostname` and reject private destinations.
///
/// One bounded lookup returns both address families; every returned address
/// must pass the policy. The whole resolution is bounded by `dns_timeout`.
pub async fn check_rebind(
    hostname: &str,
    dns_timeout: Duration,
) -> Result<Vec<IpAddr>, ScanError> {
    let mut addrs: Vec<IpAddr> = Vec::new();
    for addr in bounded_lookup(hostname, 443, dns_timeout).await {
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }

    scrutinize(hostname, addrs)
}

async fn bounded_lookup(hostname: &str, port: u16, dns_timeout: Duration) -> Vec<IpAddr> {
    match timeout(dns_timeout, lookup_host((hostname, port))).await {
        Ok(Ok(addrs)) => addrs.map(|sa: SocketAddr| sa.ip()).collect(),
        Ok(Err(_)) | Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorKind;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn v6(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_v4_ranges() {
        assert!(is_private_ip(v4("10.0.0.1")));
        assert!(is_private_ip(v4("127.0.0.1")));
        assert!(is_private_ip(v4("172.16.0.1")));
        assert!(is_private_ip(v4("172.31.255.255")));
        assert!(is_private_ip(v4("192.168.1.1")));
        assert!(is_private_ip(v4("169.254.169.254")));
        assert!(is_private_ip(v4("0.0.0.0")));
        assert!(is_private_ip(v4("100.64.0.1")));
        assert!(is_private_ip(v4("100.127.255.255")));
    }

    #[test]
    fn test_public_v4_allowed() {
        assert!(!is_private_ip(v4("8.8.8.8")));
        assert!(!is_private_ip(v4("93.184.216.34")));
        assert!(!is_private_ip(v4("100.63.255.255")));
        assert!(!is_private_ip(v4("172.32.0.1")));
    }

    #[test]
    fn test_private_v6_ranges() {
        assert!(is_private_ip(v6("::1")));
        assert!(is_private_ip(v6("::")));
        assert!(is_private_ip(v6("fc00::1")));
        assert!(is_private_ip(v6("fd12:3456::1")));
        assert!(is_private_ip(v6("fe80::1")));
    }

    #[test]
    fn test_v4_mapped_v6() {
        assert!(is_private_ip(v6("::ffff:10.0.0.1")));
        assert!(is_private_ip(v6("::ffff:127.0.0.1")));
        assert!(!is_private_ip(v6("::ffff:8.8.8.8")));
    }

    #[test]
    fn test_public_v6_allowed() {
        assert!(!is_private_ip(v6("2001:db8::1")));
        assert!(!is_private_ip(v6("2606:4700::6810:84e5")));
    }

    #[test]
    fn test_scrutinize_empty_is_dns_failed() {
        let err = scrutinize("nope.example", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::DnsFailed);
    }

    #[test]
    fn test_scrutinize_private_poisons_set() {
        // One private address blocks even when public ones are present
        let err = scrutinize("rebind.example", vec![v4("93.184.216.34"), v4("10.0.0.5")])
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::BlockedUrl);
        assert!(err.detail.contains("10.0.0.5"));
    }

    #[test]
    fn test_scrutinize_public_passes() {
        let addrs = scrutinize("example.com", vec![v4("93.184.216.34")]).unwrap();
        assert_eq!(addrs, vec![v4("93.184.216.34")]);
    }

    #[tokio::test]
    async fn test_check_rebind_localhost_blocked() {
        let err = check_rebind("localhost", Duration::from_secs(5))
            .await
            .unwrap_err();
        // Resolver environments vary, but localhost either resolves to
        // loopback (blocked) or not at all (dns_failed)
        assert!(matches!(
            err.kind,
            ScanErrorKind::BlockedUrl | ScanErrorKind::DnsFailed
        ));
    }
}
