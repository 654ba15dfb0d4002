//! Authentication and authorization tests
//!
//! Tests for:
//! - TOTP code generation against the RFC 6238 reference vectors
//! - Secret encoding and authenticator provisioning URIs
//! - Session token expiry and refresh leeway
//! - Account status and role gates

use chrono::Utc;
use proptest::prelude::*;

use factory_oa_backend::config::TotpConfig;
use factory_oa_backend::error::AppError;
use factory_oa_backend::middleware::AuthUser;
use factory_oa_backend::services::auth::{decode_claims, encode_claims, Claims};
use factory_oa_backend::services::totp::{
    decode_secret, generate_secret, provisioning_uri, Totp, TotpError,
};
use shared::models::{EmployeeStatus, UserRole};
use shared::validation::{same_emp_id, validate_emp_id};

/// RFC 6238 appendix B SHA1 seed
const RFC_SEED: &[u8] = b"12345678901234567890";
/// The same seed, base32 encoded
const RFC_SEED_BASE32: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

const JWT_SECRET: &str = "unit-test-secret";

fn totp_config(digits: u32) -> TotpConfig {
    TotpConfig {
        issuer: "Factory OA".to_string(),
        period: 30,
        digits,
        skew: 1,
    }
}

fn claims(role: UserRole, exp_offset: i64) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub: "E1001".to_string(),
        name: "Zhang Wei".to_string(),
        role,
        iat: now,
        exp: now + exp_offset,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_rfc6238_vectors() {
        let totp = Totp::new(RFC_SEED, 30, 8, 0).unwrap();
        let vectors = [
            (59, "94287082"),
            (1_111_111_109, "07081804"),
            (1_111_111_111, "14050471"),
            (1_234_567_890, "89005924"),
            (2_000_000_000, "69279037"),
            (20_000_000_000, "65353130"),
        ];
        for (time, expected) in vectors {
            assert_eq!(totp.code_at(time), expected, "t = {}", time);
        }
    }

    #[test]
    fn test_six_digit_codes_are_truncated() {
        let totp = Totp::from_base32(RFC_SEED_BASE32, &totp_config(6)).unwrap();
        assert_eq!(totp.code_at(59), "287082");
    }

    #[test]
    fn test_verify_respects_skew() {
        let totp = Totp::new(RFC_SEED, 30, 6, 1).unwrap();
        let code = totp.code_at(59);

        assert!(totp.verify_at(&code, 59));
        assert!(totp.verify_at(&code, 89));
        assert!(totp.verify_at(&code, 10));
        assert!(!totp.verify_at(&code, 120));
    }

    #[test]
    fn test_verify_rejects_malformed_codes() {
        let totp = Totp::new(RFC_SEED, 30, 6, 1).unwrap();
        assert!(!totp.verify_at("", 59));
        assert!(!totp.verify_at("28708", 59));
        assert!(!totp.verify_at("2870822", 59));
        assert!(!totp.verify_at("28708a", 59));
        assert!(totp.verify_at(" 287082 ", 59));
    }

    #[test]
    fn test_invalid_parameters() {
        assert_eq!(Totp::new(RFC_SEED, 30, 5, 1).err(), Some(TotpError::InvalidDigits));
        assert_eq!(Totp::new(RFC_SEED, 30, 9, 1).err(), Some(TotpError::InvalidDigits));
        assert_eq!(decode_secret("").err(), Some(TotpError::InvalidSecret));
        assert_eq!(decode_secret("!!!!").err(), Some(TotpError::InvalidSecret));
    }

    #[test]
    fn test_decode_secret_is_lenient() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(decode_secret(spaced).unwrap(), RFC_SEED);
        assert_eq!(decode_secret(&format!("{}====", RFC_SEED_BASE32)).unwrap(), RFC_SEED);
    }

    #[test]
    fn test_provisioning_uri() {
        let uri = provisioning_uri(RFC_SEED_BASE32, "E1001", &totp_config(6));
        assert!(uri.starts_with("otpauth://totp/Factory%20OA:E1001?"));
        assert!(uri.contains(&format!("secret={}", RFC_SEED_BASE32)));
        assert!(uri.contains("issuer=Factory%20OA"));
        assert!(uri.contains("digits=6"));
        assert!(uri.contains("period=30"));
    }

    #[test]
    fn test_token_roundtrip() {
        let c = claims(UserRole::Admin, 3600);
        let token = encode_claims(&c, JWT_SECRET).unwrap();
        assert_eq!(decode_claims(&token, JWT_SECRET, 0).unwrap(), c);
    }

    #[test]
    fn test_expired_token_is_rejected_without_leeway() {
        let token = encode_claims(&claims(UserRole::User, -120), JWT_SECRET).unwrap();
        assert!(matches!(
            decode_claims(&token, JWT_SECRET, 0),
            Err(AppError::TokenExpired)
        ));
    }

    #[test]
    fn test_expired_token_is_refreshable_within_leeway() {
        let token = encode_claims(&claims(UserRole::User, -120), JWT_SECRET).unwrap();
        let decoded = decode_claims(&token, JWT_SECRET, 3600).unwrap();
        assert_eq!(decoded.sub, "E1001");
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = encode_claims(&claims(UserRole::User, 600), JWT_SECRET).unwrap();
        assert!(matches!(
            decode_claims(&token, "another-secret", 0),
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            decode_claims("not.a.token", JWT_SECRET, 0),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_login_status_gate() {
        assert!(EmployeeStatus::Active.allows_login(UserRole::User));
        assert!(EmployeeStatus::PendingBinding.allows_login(UserRole::Sales));
        assert!(!EmployeeStatus::PendingApproval.allows_login(UserRole::Sales));
        assert!(!EmployeeStatus::Inactive.allows_login(UserRole::User));
        assert!(EmployeeStatus::Inactive.allows_login(UserRole::Admin));
    }

    #[test]
    fn test_status_transitions() {
        assert_eq!(
            EmployeeStatus::PendingBinding.after_totp_verified(),
            EmployeeStatus::PendingApproval
        );
        assert_eq!(EmployeeStatus::PendingBinding.after_login(), EmployeeStatus::Active);
        assert_eq!(EmployeeStatus::Inactive.after_login(), EmployeeStatus::Inactive);
        assert_eq!(EmployeeStatus::Active.after_totp_verified(), EmployeeStatus::Active);
    }

    #[test]
    fn test_self_or_admin() {
        let sales = AuthUser {
            emp_id: "E1001".to_string(),
            name: "Zhang Wei".to_string(),
            role: UserRole::Sales,
        };
        assert!(sales.require_self_or_admin("E1001").is_ok());
        assert!(sales.require_self_or_admin("e1001").is_ok());
        assert!(matches!(
            sales.require_self_or_admin("E1002"),
            Err(AppError::InsufficientPermissions)
        ));
        assert!(sales.require_admin().is_err());

        let admin = AuthUser {
            role: UserRole::Admin,
            ..sales
        };
        assert!(admin.require_self_or_admin("E1002").is_ok());
        assert!(admin.require_admin().is_ok());
    }

    #[test]
    fn test_emp_id_rules() {
        assert!(validate_emp_id("E1001").is_ok());
        assert!(validate_emp_id("").is_err());
        assert!(validate_emp_id("E 1001").is_err());
        assert!(validate_emp_id("TEMP_ABCD1234").is_err());
        assert!(validate_emp_id(&"9".repeat(21)).is_err());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn role_strategy() -> impl Strategy<Value = UserRole> {
        prop_oneof![
            Just(UserRole::Admin),
            Just(UserRole::Sales),
            Just(UserRole::User),
        ]
    }

    fn status_strategy() -> impl Strategy<Value = EmployeeStatus> {
        prop_oneof![
            Just(EmployeeStatus::PendingBinding),
            Just(EmployeeStatus::PendingApproval),
            Just(EmployeeStatus::Active),
            Just(EmployeeStatus::Inactive),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Codes always have the configured length and verify at their own time
        #[test]
        fn prop_code_verifies_at_its_time(
            seed in prop::collection::vec(any::<u8>(), 10..40),
            digits in 6u32..=8,
            time in 0u64..4_000_000_000,
        ) {
            let totp = Totp::new(&seed, 30, digits, 1).unwrap();
            let code = totp.code_at(time);
            prop_assert_eq!(code.len(), digits as usize);
            prop_assert!(code.bytes().all(|b| b.is_ascii_digit()));
            prop_assert!(totp.verify_at(&code, time));
        }

        /// Codes stay valid for exactly the skew window
        #[test]
        fn prop_code_expires_outside_skew(
            seed in prop::collection::vec(any::<u8>(), 20..=20),
            step in 10u64..100_000_000,
        ) {
            let totp = Totp::new(&seed, 30, 8, 1).unwrap();
            let time = step * 30;
            let code = totp.code_at(time);
            prop_assert!(totp.verify_at(&code, time + 30));
            prop_assert!(totp.verify_at(&code, time - 30));

            // Eight-digit collisions across steps are possible but vanishingly rare
            let far = totp.code_at(time + 90);
            prop_assume!(far != code);
            prop_assert!(!totp.verify_at(&code, time + 90));
        }

        /// Generated secrets decode to 160 bits
        #[test]
        fn prop_generated_secret_decodes(_n in 0u8..10) {
            let secret = generate_secret();
            prop_assert_eq!(secret.len(), 32);
            prop_assert_eq!(decode_secret(&secret).unwrap().len(), 20);
            prop_assert!(Totp::from_base32(&secret, &totp_config(6)).is_ok());
        }

        /// Claims survive signing for every role
        #[test]
        fn prop_claims_roundtrip(role in role_strategy(), sub in "[A-Z][0-9]{3,8}") {
            let mut c = claims(role, 600);
            c.sub = sub;
            let token = encode_claims(&c, JWT_SECRET).unwrap();
            prop_assert_eq!(decode_claims(&token, JWT_SECRET, 0).unwrap(), c);
        }

        /// An emp_id matches itself in any letter case
        #[test]
        fn prop_emp_id_matches_any_case(emp_id in "[A-Za-z][A-Za-z0-9]{1,10}") {
            prop_assert!(same_emp_id(&emp_id, &emp_id.to_uppercase()));
            prop_assert!(same_emp_id(&emp_id.to_lowercase(), &emp_id));
            let other = format!("{}X", emp_id);
            prop_assert!(!same_emp_id(&emp_id, &other));
        }

        /// Admins always pass the login gate; others only when active or binding
        #[test]
        fn prop_login_gate(status in status_strategy(), role in role_strategy()) {
            let allowed = status.allows_login(role);
            if role == UserRole::Admin {
                prop_assert!(allowed);
            } else {
                prop_assert_eq!(
                    allowed,
                    matches!(status, EmployeeStatus::Active | EmployeeStatus::PendingBinding)
                );
            }
        }

        /// Login and verification never revive an inactive account
        #[test]
        fn prop_transitions_keep_inactive(status in status_strategy()) {
            if status == EmployeeStatus::Inactive {
                prop_assert_eq!(status.after_login(), EmployeeStatus::Inactive);
                prop_assert_eq!(status.after_totp_verified(), EmployeeStatus::Inactive);
            }
            prop_assert_ne!(status.after_login(), EmployeeStatus::PendingBinding);
        }
    }
}
