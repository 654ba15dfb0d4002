//! Authentication service: TOTP enrollment, login and session tokens

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{Config, JwtConfig, TotpConfig};
use crate::error::{AppError, AppResult};
use crate::services::employee::{EmployeeService, EMPLOYEE_COLUMNS};
use crate::services::totp::{self, Totp};
use shared::models::{Employee, EmployeeStatus, UserRole};

/// Emp_id of the bootstrap administrator
pub const ADMIN_EMP_ID: &str = "admin";

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    jwt: JwtConfig,
    totp: TotpConfig,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Employee number
    pub sub: String,
    pub name: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

/// Issued session
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub employee: Employee,
}

/// Secret material shown once while enrolling an authenticator
#[derive(Debug, Serialize)]
pub struct TotpEnrollment {
    pub emp_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub provisioning_uri: String,
}

/// Result of checking a code during binding
#[derive(Debug, Serialize)]
pub struct TotpVerification {
    pub emp_id: String,
    pub verified: bool,
    pub status: EmployeeStatus,
}

impl AuthService {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            jwt: config.jwt.clone(),
            totp: config.totp.clone(),
        }
    }

    /// Create the bootstrap administrator if it does not exist yet
    pub async fn init_admin(&self, name: Option<String>) -> AppResult<TotpEnrollment> {
        let employees = EmployeeService::new(self.db.clone());
        if employees.find_by_emp_id(ADMIN_EMP_ID).await?.is_some() {
            return Err(AppError::Conflict {
                resource: "emp_id".to_string(),
                message: "Administrator account already exists".to_string(),
                message_zh: "管理员账号已存在".to_string(),
            });
        }

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Administrator".to_string());
        let secret = totp::generate_secret();

        let mut tx = self.db.begin().await?;

        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            INSERT INTO employees (emp_id, name, role, status)
            VALUES ($1, $2, 'admin', 'active')
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(ADMIN_EMP_ID)
        .bind(&name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO totp_credentials (employee_id, secret) VALUES ($1, $2)")
            .bind(employee.id)
            .bind(&secret)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!("Administrator account initialized");

        Ok(TotpEnrollment {
            emp_id: employee.emp_id,
            provisioning_uri: totp::provisioning_uri(&secret, &employee.name, &self.totp),
            secret: Some(secret),
        })
    }

    /// Provisioning URI for an employee's authenticator
    ///
    /// Employees still waiting for binding get a secret issued on demand.
    pub async fn totp_enrollment(&self, emp_id: &str) -> AppResult<TotpEnrollment> {
        let employee = EmployeeService::new(self.db.clone())
            .get_by_emp_id(emp_id)
            .await?;

        let secret = match self.find_secret(employee.id).await? {
            Some(secret) => secret,
            None if employee.status == EmployeeStatus::PendingBinding => {
                let secret = totp::generate_secret();
                sqlx::query(
                    r#"
                    INSERT INTO totp_credentials (employee_id, secret) VALUES ($1, $2)
                    ON CONFLICT (employee_id) DO NOTHING
                    "#,
                )
                .bind(employee.id)
                .bind(&secret)
                .execute(&self.db)
                .await?;
                // A concurrent request may have won the insert
                self.find_secret(employee.id)
                    .await?
                    .ok_or_else(|| AppError::Internal("TOTP secret was not stored".to_string()))?
            }
            None => return Err(AppError::NotFound(format!("TOTP secret for {}", emp_id))),
        };

        Ok(TotpEnrollment {
            emp_id: employee.emp_id,
            provisioning_uri: totp::provisioning_uri(&secret, &employee.name, &self.totp),
            secret: None,
        })
    }

    /// Confirm the authenticator produces valid codes
    pub async fn verify_totp(&self, emp_id: &str, code: &str) -> AppResult<TotpVerification> {
        let employees = EmployeeService::new(self.db.clone());
        let employee = employees.get_by_emp_id(emp_id).await?;

        if !self.check_code(employee.id, code).await? {
            return Err(AppError::InvalidCredentials);
        }

        let next = employee.status.after_totp_verified();
        let status = if next != employee.status {
            employees.set_status(employee.id, next).await?.status
        } else {
            employee.status
        };

        Ok(TotpVerification {
            emp_id: employee.emp_id,
            verified: true,
            status,
        })
    }

    /// Sign in with emp_id and a TOTP code
    pub async fn login(&self, emp_id: &str, code: &str, login_device: &str) -> AppResult<LoginResponse> {
        let employees = EmployeeService::new(self.db.clone());
        let employee = employees
            .find_by_emp_id(emp_id.trim())
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !self.check_code(employee.id, code).await? {
            tracing::warn!(emp_id = %employee.emp_id, "Login rejected: bad TOTP code");
            return Err(AppError::InvalidCredentials);
        }

        if !employee.status.allows_login(employee.role) {
            return Err(AppError::Forbidden {
                message: format!("Account is {}", employee.status),
                message_zh: "账号未启用或待审批".to_string(),
            });
        }

        let employee = employees
            .record_login(employee.id, employee.status.after_login(), login_device)
            .await?;

        tracing::info!(emp_id = %employee.emp_id, device = %login_device, "Employee logged in");

        self.session_for(employee)
    }

    /// Exchange a recently expired token for a fresh one
    pub async fn refresh(&self, token: &str) -> AppResult<LoginResponse> {
        let claims = decode_claims(token, &self.jwt.secret, self.jwt.refresh_leeway.max(0) as u64)?;

        let employee = EmployeeService::new(self.db.clone())
            .find_by_emp_id(&claims.sub)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if employee.status == EmployeeStatus::Inactive {
            return Err(AppError::InvalidToken);
        }

        self.session_for(employee)
    }

    pub async fn me(&self, emp_id: &str) -> AppResult<Employee> {
        EmployeeService::new(self.db.clone())
            .get_by_emp_id(emp_id)
            .await
    }

    fn session_for(&self, employee: Employee) -> AppResult<LoginResponse> {
        let access_token = issue_token(&employee, &self.jwt)?;
        Ok(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry,
            employee,
        })
    }

    async fn find_secret(&self, employee_id: Uuid) -> AppResult<Option<String>> {
        let secret = sqlx::query_scalar::<_, String>(
            "SELECT secret FROM totp_credentials WHERE employee_id = $1",
        )
        .bind(employee_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(secret)
    }

    async fn check_code(&self, employee_id: Uuid, code: &str) -> AppResult<bool> {
        let Some(secret) = self.find_secret(employee_id).await? else {
            return Ok(false);
        };
        let totp = Totp::from_base32(&secret, &self.totp)
            .map_err(|e| AppError::Internal(format!("Stored TOTP secret unusable: {}", e)))?;
        Ok(totp.verify(code))
    }
}

/// Sign a session token for an employee
pub fn issue_token(employee: &Employee, jwt: &JwtConfig) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: employee.emp_id.clone(),
        name: employee.name.clone(),
        role: employee.role,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(jwt.access_token_expiry)).timestamp(),
    };

    encode_claims(&claims, &jwt.secret)
}

pub fn encode_claims(claims: &Claims, secret: &str) -> AppResult<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

/// Decode and validate a token, allowing `leeway_secs` past expiry
pub fn decode_claims(token: &str, secret: &str, leeway_secs: u64) -> AppResult<Claims> {
    let mut validation = Validation::default();
    validation.leeway = leeway_secs;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "E1001".to_string(),
            name: "Li Lei".to_string(),
            role: UserRole::Sales,
            iat: now,
            exp: now + exp_offset,
        }
    }

    #[test]
    fn test_roundtrip() {
        let c = claims(600);
        let token = encode_claims(&c, SECRET).unwrap();
        assert_eq!(decode_claims(&token, SECRET, 0).unwrap(), c);
    }

    #[test]
    fn test_expired_token_within_leeway() {
        let token = encode_claims(&claims(-120), SECRET).unwrap();
        assert!(matches!(
            decode_claims(&token, SECRET, 0),
            Err(AppError::TokenExpired)
        ));
        assert!(decode_claims(&token, SECRET, 300).is_ok());
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = encode_claims(&claims(600), SECRET).unwrap();
        assert!(matches!(
            decode_claims(&token, "other", 0),
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            decode_claims("garbage", SECRET, 0),
            Err(AppError::InvalidToken)
        ));
    }
}
