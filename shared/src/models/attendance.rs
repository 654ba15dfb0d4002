//! Attendance punch records and device identification rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A single attendance punch or device-change request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PunchRecord {
    pub id: Uuid,
    pub emp_id: String,
    /// Employee name at the time of the punch
    pub name: String,
    pub punch_type: PunchType,
    pub punch_time: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub device_mac: Option<String>,
    pub device_source: Option<DeviceSource>,
    pub login_device: Option<String>,
    pub status: PunchStatus,
    pub created_at: DateTime<Utc>,
}

/// Kind of punch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "punch_type", rename_all = "snake_case"))]
pub enum PunchType {
    ClockIn,
    ClockOut,
    OffHours,
    DeviceChangeRequest,
    DeviceChangeApproved,
}

impl PunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchType::ClockIn => "clock_in",
            PunchType::ClockOut => "clock_out",
            PunchType::OffHours => "off_hours",
            PunchType::DeviceChangeRequest => "device_change_request",
            PunchType::DeviceChangeApproved => "device_change_approved",
        }
    }

    pub fn display_name_zh(&self) -> &'static str {
        match self {
            PunchType::ClockIn => "上班打卡",
            PunchType::ClockOut => "下班打卡",
            PunchType::OffHours => "非打卡时间打卡",
            PunchType::DeviceChangeRequest => "设备更换申请",
            PunchType::DeviceChangeApproved => "设备更换已批准",
        }
    }

    /// Classify a punch by local hour of day (0-23)
    pub fn for_hour(hour: u32) -> Self {
        match hour {
            6..=11 => PunchType::ClockIn,
            12..=21 => PunchType::ClockOut,
            _ => PunchType::OffHours,
        }
    }
}

/// Lifecycle of a punch record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "punch_status", rename_all = "snake_case"))]
pub enum PunchStatus {
    Recorded,
    Pending,
    Approved,
}

/// Where the device identity used for a punch came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "device_source", rename_all = "snake_case"))]
pub enum DeviceSource {
    /// Sent by the client (X-Device-ID header or request body)
    Provided,
    /// Resolved from the server's ARP table
    Arp,
    /// Hash of client IP and User-Agent
    Fingerprint,
}

impl DeviceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceSource::Provided => "provided",
            DeviceSource::Arp => "arp",
            DeviceSource::Fingerprint => "fingerprint",
        }
    }
}

/// Whether an address is on the company's internal network
pub fn is_inner_network(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6
                    .to_ipv4_mapped()
                    .map(|v4| v4.is_private() || v4.is_loopback())
                    .unwrap_or(false)
        }
    }
}

// ============================================================================
// Device binding
// ============================================================================

/// Outcome of checking a punching device against an employee's binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCheck {
    /// Device is the one bound to this employee
    Matched,
    /// Device is bound to a different employee
    OwnedByOther { emp_id: String, name: String },
    /// Employee already has a different device bound
    Changed { bound_device: String },
    /// Neither the employee nor the device has a binding yet
    Unbound,
}

/// Current binding of a device, if any employee owns it
#[derive(Debug, Clone)]
pub struct DeviceOwner<'a> {
    pub emp_id: &'a str,
    pub name: &'a str,
}

/// Decide how a punch from `device` relates to the employee's binding
pub fn check_device(
    emp_id: &str,
    bound_device: Option<&str>,
    owner: Option<DeviceOwner<'_>>,
    device: &str,
) -> DeviceCheck {
    if bound_device.is_some_and(|bound| bound.eq_ignore_ascii_case(device)) {
        return DeviceCheck::Matched;
    }

    if let Some(owner) = owner {
        if owner.emp_id != emp_id {
            return DeviceCheck::OwnedByOther {
                emp_id: owner.emp_id.to_string(),
                name: owner.name.to_string(),
            };
        }
    }

    match bound_device {
        Some(bound) if !bound.is_empty() => DeviceCheck::Changed {
            bound_device: bound.to_string(),
        },
        _ => DeviceCheck::Unbound,
    }
}

/// Normalize a MAC address to upper-case colon form
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    // Separators must be consistent with a MAC layout, not arbitrary text
    let separators = raw.trim().len() - hex.len();
    if separators != 0 && separators != 5 && separators != 2 {
        return None;
    }

    let upper = hex.to_ascii_uppercase();
    let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}

/// Normalize a client-supplied device id
///
/// MAC-shaped ids are canonicalized; other ids are trimmed and bounded.
pub fn normalize_device_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return None;
    }
    Some(normalize_mac(trimmed).unwrap_or_else(|| trimmed.to_string()))
}

/// Format six bytes as a locally administered unicast MAC address
pub fn locally_administered_mac(bytes: [u8; 6]) -> String {
    let mut octets = bytes;
    octets[0] = (octets[0] | 0x02) & 0xFE;
    octets
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

// ============================================================================
// User-Agent summary
// ============================================================================

/// Condensed description of the client device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub kind: String,
    pub os: String,
    pub browser: String,
}

impl std::fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.os, self.browser)
    }
}

/// Summarize a User-Agent header as kind, OS and browser
pub fn summarize_user_agent(user_agent: &str) -> DeviceSummary {
    let ua = user_agent.to_ascii_lowercase();

    let os = if ua.contains("windows nt 10.0") {
        "Windows 10".to_string()
    } else if ua.contains("windows nt 11.0") {
        "Windows 11".to_string()
    } else if ua.contains("windows nt") {
        with_version("Windows", version_after(&ua, "windows nt ", true))
    } else if ua.contains("mac os x") && !ua.contains("iphone") && !ua.contains("ipad") {
        with_version("macOS", version_after(&ua, "mac os x ", true))
    } else if ua.contains("android") {
        let version = version_after(&ua, "android ", false)
            .or_else(|| version_after(&ua, "android/", false));
        with_version("Android", version)
    } else if ua.contains("ipad") {
        "iPad".to_string()
    } else if ua.contains("iphone") {
        "iPhone".to_string()
    } else if ua.contains("linux") {
        "Linux".to_string()
    } else {
        "Unknown".to_string()
    };

    let kind = if ["mobile", "android", "iphone", "ipad"]
        .iter()
        .any(|m| ua.contains(m))
    {
        "Mobile"
    } else if ua.contains("tablet") {
        "Tablet"
    } else {
        "PC"
    };

    let browser = if ua.contains("headlesschrome") {
        with_version("HeadlessChrome", version_after(&ua, "chrome/", false))
    } else if ua.contains("edg") {
        let version =
            version_after(&ua, "edg/", false).or_else(|| version_after(&ua, "edge/", false));
        with_version("Edge", version)
    } else if ua.contains("chrome") && !ua.contains("opr") && !ua.contains("whale") {
        with_version("Chrome", version_after(&ua, "chrome/", false))
    } else if ua.contains("firefox") {
        with_version("Firefox", version_after(&ua, "firefox/", false))
    } else if ua.contains("safari") && !ua.contains("chrome") && !ua.contains("android") {
        with_version("Safari", version_after(&ua, "version/", false))
    } else if ua.contains("opera") || ua.contains("opr") {
        let version =
            version_after(&ua, "opr/", false).or_else(|| version_after(&ua, "opera/", false));
        with_version("Opera", version)
    } else if ua.contains("msie") || ua.contains("trident") {
        "Internet Explorer".to_string()
    } else {
        "Unknown".to_string()
    };

    DeviceSummary {
        kind: kind.to_string(),
        os,
        browser,
    }
}

fn with_version(name: &str, version: Option<String>) -> String {
    match version {
        Some(v) => format!("{} {}", name, v),
        None => name.to_string(),
    }
}

/// Read the version number that follows `token`.
/// With `dotted`, a single `.`/`_` separated minor part is kept (as `.`).
fn version_after(ua: &str, token: &str, dotted: bool) -> Option<String> {
    let start = ua.find(token)? + token.len();
    let rest = &ua[start..];

    let major: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if major.is_empty() {
        return None;
    }
    if !dotted {
        return Some(major);
    }

    let after_major = &rest[major.len()..];
    let mut chars = after_major.chars();
    match chars.next() {
        Some('.') | Some('_') => {
            let minor: String = chars.take_while(|c| c.is_ascii_digit()).collect();
            if minor.is_empty() {
                Some(major)
            } else {
                Some(format!("{}.{}", major, minor))
            }
        }
        _ => Some(major),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punch_type_windows() {
        assert_eq!(PunchType::for_hour(5), PunchType::OffHours);
        assert_eq!(PunchType::for_hour(6), PunchType::ClockIn);
        assert_eq!(PunchType::for_hour(11), PunchType::ClockIn);
        assert_eq!(PunchType::for_hour(12), PunchType::ClockOut);
        assert_eq!(PunchType::for_hour(21), PunchType::ClockOut);
        assert_eq!(PunchType::for_hour(22), PunchType::OffHours);
        assert_eq!(PunchType::for_hour(0), PunchType::OffHours);
    }

    #[test]
    fn test_inner_network() {
        assert!(is_inner_network(&"192.168.1.20".parse().unwrap()));
        assert!(is_inner_network(&"10.0.0.8".parse().unwrap()));
        assert!(is_inner_network(&"172.16.5.4".parse().unwrap()));
        assert!(is_inner_network(&"127.0.0.1".parse().unwrap()));
        assert!(is_inner_network(&"::ffff:192.168.0.9".parse().unwrap()));
        assert!(!is_inner_network(&"172.32.0.1".parse().unwrap()));
        assert!(!is_inner_network(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("aa-bb-cc-dd-ee-ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(
            normalize_mac("aabbccddeeff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(normalize_mac("not-a-mac"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
    }

    #[test]
    fn test_normalize_device_id() {
        assert_eq!(
            normalize_device_id(" 5f0c1a2e-device ").as_deref(),
            Some("5f0c1a2e-device")
        );
        assert_eq!(
            normalize_device_id("aa:bb:cc:dd:ee:ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(normalize_device_id("   "), None);
    }

    #[test]
    fn test_locally_administered_mac() {
        let mac = locally_administered_mac([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]);
        assert_eq!(mac, "02:23:45:67:89:AB");
    }

    #[test]
    fn test_user_agent_windows_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                  (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
        assert_eq!(summarize_user_agent(ua).to_string(), "PC/Windows 10/Chrome 120");
    }

    #[test]
    fn test_user_agent_iphone_safari() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 \
                  (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";
        assert_eq!(summarize_user_agent(ua).to_string(), "Mobile/iPhone/Safari 17");
    }

    #[test]
    fn test_user_agent_android_and_edge() {
        let ua = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
                  (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36";
        assert_eq!(summarize_user_agent(ua).to_string(), "Mobile/Android 13/Chrome 119");

        let edge = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
        assert_eq!(summarize_user_agent(edge).browser, "Edge 120");
    }

    #[test]
    fn test_user_agent_mac_firefox() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0";
        assert_eq!(summarize_user_agent(ua).to_string(), "PC/macOS 10.15/Firefox 121");
    }

    #[test]
    fn test_user_agent_empty() {
        assert_eq!(summarize_user_agent("").to_string(), "PC/Unknown/Unknown");
    }

    #[test]
    fn test_check_device_matched_and_unbound() {
        assert_eq!(
            check_device("E1", Some("AA:BB:CC:DD:EE:FF"), None, "aa:bb:cc:dd:ee:ff"),
            DeviceCheck::Matched
        );
        assert_eq!(check_device("E1", None, None, "dev-1"), DeviceCheck::Unbound);
    }

    #[test]
    fn test_check_device_conflicts() {
        let owner = DeviceOwner {
            emp_id: "E2",
            name: "Li",
        };
        assert_eq!(
            check_device("E1", None, Some(owner), "dev-1"),
            DeviceCheck::OwnedByOther {
                emp_id: "E2".to_string(),
                name: "Li".to_string()
            }
        );
        assert_eq!(
            check_device("E1", Some("dev-old"), None, "dev-new"),
            DeviceCheck::Changed {
                bound_device: "dev-old".to_string()
            }
        );
    }
}
