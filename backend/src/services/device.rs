//! Punching device identification
//!
//! A device is identified by, in order: an id the client sends, the MAC
//! address the kernel ARP table holds for the client IP, or a fingerprint
//! derived from IP and User-Agent.

use std::net::IpAddr;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use shared::models::{locally_administered_mac, normalize_device_id, normalize_mac, DeviceSource};

/// Identity chosen for a punching device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDevice {
    pub identity: String,
    pub source: DeviceSource,
}

/// Find the MAC for `ip` in `/proc/net/arp` formatted text
///
/// Incomplete entries (flags `0x0` or an all-zero address) are skipped.
pub fn parse_arp_table(contents: &str, ip: &IpAddr) -> Option<String> {
    let wanted = ip.to_string();

    contents.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] != wanted {
            return None;
        }
        if cols[2] == "0x0" {
            return None;
        }
        let mac = normalize_mac(cols[3])?;
        if mac == "00:00:00:00:00:00" {
            return None;
        }
        Some(mac)
    })
}

/// Look up a client's MAC address in the ARP table file
pub async fn lookup_arp(path: &Path, ip: &IpAddr) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_arp_table(&contents, ip),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "ARP table unavailable");
            None
        }
    }
}

/// Stable pseudo-MAC derived from client IP and User-Agent
pub fn fingerprint(ip: &IpAddr, user_agent: &str) -> String {
    let digest = Sha256::digest(format!("{}|{}", ip, user_agent).as_bytes());
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&digest[..6]);
    locally_administered_mac(bytes)
}

/// Resolve the identity to bind and check for a punch
pub async fn resolve_device(
    provided: Option<&str>,
    ip: &IpAddr,
    user_agent: &str,
    arp_table: &Path,
) -> AppResult<ResolvedDevice> {
    if let Some(raw) = provided.map(str::trim).filter(|s| !s.is_empty()) {
        let identity = normalize_device_id(raw).ok_or_else(|| {
            AppError::validation("device_id", "Invalid device identifier", "设备标识无效")
        })?;
        return Ok(ResolvedDevice {
            identity,
            source: DeviceSource::Provided,
        });
    }

    if let Some(mac) = lookup_arp(arp_table, ip).await {
        return Ok(ResolvedDevice {
            identity: mac,
            source: DeviceSource::Arp,
        });
    }

    tracing::warn!(ip = %ip, "No ARP entry for client, using fingerprint");
    Ok(ResolvedDevice {
        identity: fingerprint(ip, user_agent),
        source: DeviceSource::Fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.20     0x1         0x2         aa:bb:cc:dd:ee:01     *        eth0
192.168.1.21     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.22     0x1         0x2         00:00:00:00:00:00     *        eth0
";

    #[test]
    fn test_parse_arp_table() {
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(
            parse_arp_table(ARP, &ip).as_deref(),
            Some("AA:BB:CC:DD:EE:01")
        );
    }

    #[test]
    fn test_parse_arp_skips_incomplete_entries() {
        for addr in ["192.168.1.21", "192.168.1.22", "192.168.1.99"] {
            let ip: IpAddr = addr.parse().unwrap();
            assert_eq!(parse_arp_table(ARP, &ip), None);
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_local() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let a = fingerprint(&ip, "Mozilla/5.0");
        assert_eq!(a, fingerprint(&ip, "Mozilla/5.0"));
        assert_ne!(a, fingerprint(&ip, "curl/8.0"));

        let first = u8::from_str_radix(&a[..2], 16).unwrap();
        assert_eq!(first & 0x02, 0x02);
        assert_eq!(first & 0x01, 0x00);
        assert_eq!(a.len(), 17);
    }

    #[tokio::test]
    async fn test_resolve_prefers_provided_id() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let resolved = resolve_device(Some(" aa-bb-cc-dd-ee-ff "), &ip, "ua", Path::new("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(resolved.identity, "AA:BB:CC:DD:EE:FF");
        assert_eq!(resolved.source, DeviceSource::Provided);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_fingerprint() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let resolved = resolve_device(None, &ip, "ua", Path::new("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(resolved.source, DeviceSource::Fingerprint);
        assert_eq!(resolved.identity, fingerprint(&ip, "ua"));
    }
}
