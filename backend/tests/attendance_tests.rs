//! Attendance and device binding tests
//!
//! Covers punch classification by local hour, device identification
//! (client id, ARP table, fingerprint), device binding decisions and
//! User-Agent summaries.

use std::io::Write;
use std::net::IpAddr;

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use factory_oa_backend::error::AppError;
use factory_oa_backend::services::attendance::{
    day_bounds, ensure_can_punch, local_offset, punch_type_at,
};
use factory_oa_backend::services::device::{fingerprint, parse_arp_table, resolve_device};
use shared::models::{
    check_device, is_inner_network, is_temporary_emp_id, normalize_device_id, normalize_mac,
    summarize_user_agent, temporary_emp_id, DeviceCheck, DeviceOwner, DeviceSource, Employee,
    EmployeeStatus, PunchType, UserRole,
};

const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const CHROME_ANDROID: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36";

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn employee(emp_id: &str, status: EmployeeStatus, device: Option<&str>) -> Employee {
    let now = Utc::now();
    Employee {
        id: uuid::Uuid::new_v4(),
        emp_id: emp_id.to_string(),
        name: emp_id.to_string(),
        dept: None,
        role: UserRole::User,
        status,
        device_mac: device.map(str::to_string),
        inner_ip: None,
        remarks: None,
        last_login_time: None,
        login_device: None,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_punch_type_by_hour() {
        assert_eq!(PunchType::for_hour(5), PunchType::OffHours);
        assert_eq!(PunchType::for_hour(6), PunchType::ClockIn);
        assert_eq!(PunchType::for_hour(11), PunchType::ClockIn);
        assert_eq!(PunchType::for_hour(12), PunchType::ClockOut);
        assert_eq!(PunchType::for_hour(21), PunchType::ClockOut);
        assert_eq!(PunchType::for_hour(22), PunchType::OffHours);
    }

    #[test]
    fn test_punch_type_uses_company_time() {
        let offset = local_offset(8);
        let morning = Utc.with_ymd_and_hms(2025, 3, 3, 1, 30, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap();

        assert_eq!(punch_type_at(morning, offset), PunchType::ClockIn);
        assert_eq!(punch_type_at(evening, offset), PunchType::ClockOut);
        assert_eq!(punch_type_at(night, offset), PunchType::OffHours);
    }

    #[test]
    fn test_local_offset_out_of_range_is_utc() {
        assert_eq!(local_offset(8).local_minus_utc(), 8 * 3600);
        assert_eq!(local_offset(100).local_minus_utc(), 0);
    }

    #[test]
    fn test_day_bounds_cover_local_days() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let (start, end) = day_bounds(Some(day), Some(day), local_offset(8));

        assert_eq!(start, Some(Utc.with_ymd_and_hms(2025, 2, 28, 16, 0, 0).unwrap()));
        assert_eq!(end, Some(Utc.with_ymd_and_hms(2025, 3, 1, 16, 0, 0).unwrap()));
        assert_eq!(day_bounds(None, None, local_offset(8)), (None, None));
    }

    #[test]
    fn test_normalize_mac_formats() {
        for raw in ["aa:bb:cc:dd:ee:ff", "AA-BB-CC-DD-EE-FF", "aabb.ccdd.eeff", "aabbccddeeff"] {
            assert_eq!(normalize_mac(raw).as_deref(), Some("AA:BB:CC:DD:EE:FF"), "{}", raw);
        }
        assert_eq!(normalize_mac("not a mac"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
    }

    #[test]
    fn test_normalize_device_id() {
        assert_eq!(normalize_device_id("  phone-1234 ").as_deref(), Some("phone-1234"));
        assert_eq!(
            normalize_device_id("aa-bb-cc-dd-ee-ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(normalize_device_id("   "), None);
        assert_eq!(normalize_device_id(&"x".repeat(65)), None);
    }

    #[test]
    fn test_temporary_emp_id() {
        let id = temporary_emp_id("AA:BB:CC:DD:EE:FF");
        assert_eq!(id, "TEMP_CCDDEEFF");
        assert!(is_temporary_emp_id(&id));
        assert!(!is_temporary_emp_id("E1001"));
        assert_eq!(temporary_emp_id("::"), "TEMP_UNKNOWN");
    }

    #[test]
    fn test_check_device_matched_ignores_case() {
        let result = check_device("E1001", Some("AA:BB:CC:DD:EE:FF"), None, "aa:bb:cc:dd:ee:ff");
        assert_eq!(result, DeviceCheck::Matched);
    }

    #[test]
    fn test_check_device_owned_by_other() {
        let owner = DeviceOwner {
            emp_id: "E2002",
            name: "Wang Fang",
        };
        let result = check_device("E1001", None, Some(owner), "AA:BB:CC:DD:EE:FF");
        assert_eq!(
            result,
            DeviceCheck::OwnedByOther {
                emp_id: "E2002".to_string(),
                name: "Wang Fang".to_string(),
            }
        );
    }

    #[test]
    fn test_check_device_changed_and_unbound() {
        assert_eq!(
            check_device("E1001", Some("11:22:33:44:55:66"), None, "AA:BB:CC:DD:EE:FF"),
            DeviceCheck::Changed {
                bound_device: "11:22:33:44:55:66".to_string(),
            }
        );
        assert_eq!(
            check_device("E1001", None, None, "AA:BB:CC:DD:EE:FF"),
            DeviceCheck::Unbound
        );
        assert_eq!(
            check_device("E1001", Some(""), None, "AA:BB:CC:DD:EE:FF"),
            DeviceCheck::Unbound
        );
    }

    #[test]
    fn test_inner_network() {
        assert!(is_inner_network(&ip("192.168.1.2")));
        assert!(is_inner_network(&ip("10.3.0.1")));
        assert!(is_inner_network(&ip("127.0.0.1")));
        assert!(is_inner_network(&ip("::1")));
        assert!(is_inner_network(&ip("::ffff:10.0.0.1")));
        assert!(!is_inner_network(&ip("8.8.8.8")));
        assert!(!is_inner_network(&ip("2001:db8::1")));
    }

    #[test]
    fn test_user_agent_summaries() {
        assert_eq!(summarize_user_agent(CHROME_WINDOWS).to_string(), "PC/Windows 10/Chrome 120");

        let iphone = summarize_user_agent(SAFARI_IPHONE);
        assert_eq!(iphone.kind, "Mobile");
        assert_eq!(iphone.os, "iPhone");
        assert_eq!(iphone.browser, "Safari 17");

        let android = summarize_user_agent(CHROME_ANDROID);
        assert_eq!(android.os, "Android 13");
        assert_eq!(android.browser, "Chrome 119");

        let unknown = summarize_user_agent("");
        assert_eq!(unknown.os, "Unknown");
        assert_eq!(unknown.browser, "Unknown");
    }

    #[test]
    fn test_inactive_device_owner_cannot_punch() {
        // Identified by device alone, with no emp_id in the request
        let owner = employee("E1001", EmployeeStatus::Inactive, Some("3C:52:82:0A:11:FE"));
        assert!(matches!(
            ensure_can_punch(&owner),
            Err(AppError::Forbidden { .. })
        ));

        let active = employee("E1002", EmployeeStatus::Active, Some("3C:52:82:0A:11:FF"));
        assert!(ensure_can_punch(&active).is_ok());
        let binding = employee("E1003", EmployeeStatus::PendingBinding, None);
        assert!(ensure_can_punch(&binding).is_ok());
    }

    #[test]
    fn test_temp_device_transfer_carries_last_login() {
        let login_at = Utc.with_ymd_and_hms(2025, 6, 2, 0, 45, 0).unwrap();
        let mut temp = employee("TEMP_0A11FE", EmployeeStatus::Active, Some("3C:52:82:0A:11:FE"));
        temp.inner_ip = Some("192.168.10.31".to_string());
        temp.last_login_time = Some(login_at);
        temp.login_device = Some("Windows / Chrome".to_string());

        let mut target = employee("E1001", EmployeeStatus::Active, None);
        target.inner_ip = Some("192.168.10.5".to_string());

        let transfer = target.device_transfer_from(&temp);
        assert_eq!(transfer.device_mac.as_deref(), Some("3C:52:82:0A:11:FE"));
        assert_eq!(transfer.inner_ip.as_deref(), Some("192.168.10.31"));
        assert_eq!(transfer.last_login_time, Some(login_at));
        assert_eq!(transfer.login_device.as_deref(), Some("Windows / Chrome"));
    }

    #[test]
    fn test_temp_device_transfer_keeps_target_values_when_temp_is_blank() {
        let earlier = Utc.with_ymd_and_hms(2025, 5, 30, 1, 0, 0).unwrap();
        let temp = employee("TEMP_0A11FE", EmployeeStatus::Active, Some("3C:52:82:0A:11:FE"));
        let mut target = employee("E1001", EmployeeStatus::Active, Some("OLD-DEVICE"));
        target.last_login_time = Some(earlier);
        target.login_device = Some("iPhone / Safari".to_string());

        let transfer = target.device_transfer_from(&temp);
        assert_eq!(transfer.device_mac.as_deref(), Some("3C:52:82:0A:11:FE"));
        assert_eq!(transfer.last_login_time, Some(earlier));
        assert_eq!(transfer.login_device.as_deref(), Some("iPhone / Safari"));
        assert_eq!(transfer.inner_ip, None);
    }

    #[test]
    fn test_punch_type_labels() {
        assert_eq!(PunchType::ClockIn.as_str(), "clock_in");
        assert_eq!(PunchType::OffHours.display_name_zh(), "非打卡时间打卡");
        assert_eq!(DeviceSource::Fingerprint.as_str(), "fingerprint");
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn mac_bytes_strategy() -> impl Strategy<Value = [u8; 6]> {
        prop::array::uniform6(any::<u8>())
    }

    fn separator_strategy() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(":"), Just("-"), Just("")]
    }

    fn ipv4_strategy() -> impl Strategy<Value = IpAddr> {
        any::<[u8; 4]>().prop_map(|o| IpAddr::from(o))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every hour maps to exactly one punch type
        #[test]
        fn prop_every_hour_classified(hour in 0u32..24) {
            let punch = PunchType::for_hour(hour);
            let expected = if (6..12).contains(&hour) {
                PunchType::ClockIn
            } else if (12..22).contains(&hour) {
                PunchType::ClockOut
            } else {
                PunchType::OffHours
            };
            prop_assert_eq!(punch, expected);
        }

        /// Any MAC spelling normalizes to the same canonical form, idempotently
        #[test]
        fn prop_mac_normalization_is_canonical(
            bytes in mac_bytes_strategy(),
            sep in separator_strategy(),
            upper in any::<bool>(),
        ) {
            let raw = bytes
                .iter()
                .map(|b| if upper { format!("{:02X}", b) } else { format!("{:02x}", b) })
                .collect::<Vec<_>>()
                .join(sep);

            let canonical = normalize_mac(&raw).unwrap();
            prop_assert_eq!(canonical.len(), 17);
            prop_assert_eq!(normalize_mac(&canonical), Some(canonical.clone()));
            prop_assert_eq!(canonical, normalize_mac(&raw.to_uppercase()).unwrap());
        }

        /// Fingerprints are stable, canonical and locally administered unicast
        #[test]
        fn prop_fingerprint_is_local_mac(addr in ipv4_strategy(), ua in "[ -~]{0,80}") {
            let fp = fingerprint(&addr, &ua);
            prop_assert_eq!(&fp, &fingerprint(&addr, &ua));
            prop_assert_eq!(normalize_mac(&fp), Some(fp.clone()));

            let first = u8::from_str_radix(&fp[..2], 16).unwrap();
            prop_assert_eq!(first & 0x02, 0x02);
            prop_assert_eq!(first & 0x01, 0x00);
        }

        /// Placeholder ids are deterministic and recognizable
        #[test]
        fn prop_temporary_ids(device in "[A-Za-z0-9:._-]{0,40}") {
            let id = temporary_emp_id(&device);
            prop_assert!(is_temporary_emp_id(&id));
            prop_assert!(id.len() <= "TEMP_".len() + 8 || id == "TEMP_UNKNOWN");
            prop_assert_eq!(id, temporary_emp_id(&device));
        }

        /// A bound device always matches itself whatever the ownership lookup says
        #[test]
        fn prop_bound_device_matches(bytes in mac_bytes_strategy(), other in "[A-Z][0-9]{4}") {
            let device = bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(":");
            let owner = DeviceOwner { emp_id: &other, name: "someone" };
            prop_assert_eq!(
                check_device("E1001", Some(&device), Some(owner), &device.to_lowercase()),
                DeviceCheck::Matched
            );
        }
    }
}

// ============================================================================
// Integration Helpers
// ============================================================================

#[cfg(test)]
mod integration_helpers {
    use super::*;

    const ARP_TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.10.31    0x1         0x2         3c:52:82:0a:11:fe     *        eth0
192.168.10.32    0x1         0x0         00:00:00:00:00:00     *        eth0
";

    /// Write an ARP table fixture to a temporary file
    pub fn arp_fixture() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ARP_TABLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_arp_lookup_from_text() {
        assert_eq!(
            parse_arp_table(ARP_TABLE, &ip("192.168.10.31")).as_deref(),
            Some("3C:52:82:0A:11:FE")
        );
        assert_eq!(parse_arp_table(ARP_TABLE, &ip("192.168.10.32")), None);
    }

    #[tokio::test]
    async fn test_resolve_prefers_client_id() {
        let arp = arp_fixture();
        let device = resolve_device(Some("3c-52-82-0a-11-ff"), &ip("192.168.10.31"), "ua", arp.path())
            .await
            .unwrap();
        assert_eq!(device.identity, "3C:52:82:0A:11:FF");
        assert_eq!(device.source, DeviceSource::Provided);
    }

    #[tokio::test]
    async fn test_resolve_uses_arp_table() {
        let arp = arp_fixture();
        let device = resolve_device(None, &ip("192.168.10.31"), CHROME_WINDOWS, arp.path())
            .await
            .unwrap();
        assert_eq!(device.identity, "3C:52:82:0A:11:FE");
        assert_eq!(device.source, DeviceSource::Arp);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_fingerprint() {
        let arp = arp_fixture();
        let client = ip("192.168.10.32");
        let device = resolve_device(Some("  "), &client, CHROME_WINDOWS, arp.path())
            .await
            .unwrap();
        assert_eq!(device.source, DeviceSource::Fingerprint);
        assert_eq!(device.identity, fingerprint(&client, CHROME_WINDOWS));
    }

    #[tokio::test]
    async fn test_resolve_missing_arp_file() {
        let dir = tempfile::tempdir().unwrap();
        let device = resolve_device(None, &ip("10.0.0.9"), "curl/8.0", &dir.path().join("arp"))
            .await
            .unwrap();
        assert_eq!(device.source, DeviceSource::Fingerprint);
    }
}
