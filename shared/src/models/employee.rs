//! Employee and account lifecycle models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ParseEnumError;

/// Prefix for employees auto-registered from an unknown punching device
pub const TEMP_EMP_PREFIX: &str = "TEMP_";

/// An employee account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Employee {
    pub id: Uuid,
    /// Business employee number, unique across the company
    pub emp_id: String,
    pub name: String,
    pub dept: Option<String>,
    pub role: UserRole,
    pub status: EmployeeStatus,
    /// Bound attendance device (MAC address or client-issued device id)
    pub device_mac: Option<String>,
    pub inner_ip: Option<String>,
    pub remarks: Option<String>,
    pub last_login_time: Option<DateTime<Utc>>,
    pub login_device: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_temporary(&self) -> bool {
        is_temporary_emp_id(&self.emp_id)
    }

    /// Binding and last-login fields this employee takes over from a
    /// temporary account; the temporary values win where present
    pub fn device_transfer_from(&self, temp: &Employee) -> DeviceTransfer {
        DeviceTransfer {
            device_mac: temp.device_mac.clone(),
            inner_ip: temp.inner_ip.clone().or_else(|| self.inner_ip.clone()),
            last_login_time: temp.last_login_time.or(self.last_login_time),
            login_device: temp
                .login_device
                .clone()
                .or_else(|| self.login_device.clone()),
        }
    }
}

/// Device fields written to the target of a temporary device replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTransfer {
    pub device_mac: Option<String>,
    pub inner_ip: Option<String>,
    pub last_login_time: Option<DateTime<Utc>>,
    pub login_device: Option<String>,
}

/// Role of an employee
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "user_role", rename_all = "snake_case"))]
pub enum UserRole {
    Admin,
    Sales,
    #[default]
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Sales => "sales",
            UserRole::User => "user",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "sales" => Ok(UserRole::Sales),
            "user" => Ok(UserRole::User),
            other => Err(ParseEnumError::new("user_role", other)),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account status
///
/// New accounts start in `PendingBinding` until the employee scans the TOTP
/// secret into an authenticator app.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "employee_status", rename_all = "snake_case")
)]
pub enum EmployeeStatus {
    PendingBinding,
    PendingApproval,
    Active,
    Inactive,
}

impl EmployeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmployeeStatus::PendingBinding => "pending_binding",
            EmployeeStatus::PendingApproval => "pending_approval",
            EmployeeStatus::Active => "active",
            EmployeeStatus::Inactive => "inactive",
        }
    }

    /// Whether an employee in this status may obtain a session token.
    /// Admins bypass the status gate.
    pub fn allows_login(&self, role: UserRole) -> bool {
        role == UserRole::Admin
            || matches!(self, EmployeeStatus::Active | EmployeeStatus::PendingBinding)
    }

    /// Deactivated employees may not punch, whichever way they are identified
    pub fn allows_punch(&self) -> bool {
        *self != EmployeeStatus::Inactive
    }

    /// Status after a successful TOTP login
    pub fn after_login(self) -> Self {
        match self {
            EmployeeStatus::PendingBinding => EmployeeStatus::Active,
            other => other,
        }
    }

    /// Status after the employee proves the authenticator is bound
    pub fn after_totp_verified(self) -> Self {
        match self {
            EmployeeStatus::PendingBinding => EmployeeStatus::PendingApproval,
            other => other,
        }
    }
}

impl std::fmt::Display for EmployeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether an emp_id belongs to an auto-registered device placeholder
pub fn is_temporary_emp_id(emp_id: &str) -> bool {
    emp_id
        .get(..TEMP_EMP_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(TEMP_EMP_PREFIX))
}

/// Build the placeholder emp_id for an unknown device
///
/// Uses the last eight alphanumeric characters of the device identity so the
/// same device always maps to the same placeholder.
pub fn temporary_emp_id(device_identity: &str) -> String {
    let cleaned: Vec<char> = device_identity
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if cleaned.is_empty() {
        return format!("{}UNKNOWN", TEMP_EMP_PREFIX);
    }

    let start = cleaned.len().saturating_sub(8);
    let suffix: String = cleaned[start..].iter().collect();
    format!("{}{}", TEMP_EMP_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_gate() {
        assert!(EmployeeStatus::Active.allows_login(UserRole::User));
        assert!(EmployeeStatus::PendingBinding.allows_login(UserRole::Sales));
        assert!(!EmployeeStatus::PendingApproval.allows_login(UserRole::User));
        assert!(!EmployeeStatus::Inactive.allows_login(UserRole::User));
        assert!(EmployeeStatus::Inactive.allows_login(UserRole::Admin));
    }

    #[test]
    fn test_status_transitions() {
        assert_eq!(
            EmployeeStatus::PendingBinding.after_login(),
            EmployeeStatus::Active
        );
        assert_eq!(
            EmployeeStatus::PendingBinding.after_totp_verified(),
            EmployeeStatus::PendingApproval
        );
        assert_eq!(
            EmployeeStatus::Inactive.after_login(),
            EmployeeStatus::Inactive
        );
    }

    #[test]
    fn test_temporary_emp_id() {
        assert_eq!(temporary_emp_id("aa:bb:cc:dd:ee:ff"), "TEMP_CCDDEEFF");
        assert_eq!(temporary_emp_id("ab"), "TEMP_AB");
        assert_eq!(temporary_emp_id("::"), "TEMP_UNKNOWN");
        assert!(is_temporary_emp_id(&temporary_emp_id("12:34:56:78:9a:bc")));
        assert!(!is_temporary_emp_id("E001"));
        assert!(is_temporary_emp_id("temp_ccddeeff"));
        assert!(!is_temporary_emp_id("TEM"));
    }

    #[test]
    fn test_inactive_employees_cannot_punch() {
        assert!(EmployeeStatus::Active.allows_punch());
        assert!(EmployeeStatus::PendingBinding.allows_punch());
        assert!(EmployeeStatus::PendingApproval.allows_punch());
        assert!(!EmployeeStatus::Inactive.allows_punch());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("sales".parse::<UserRole>().unwrap(), UserRole::Sales);
        assert!("boss".parse::<UserRole>().is_err());
    }
}
