//! Employee account management

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::config::TotpConfig;
use crate::error::{AppError, AppResult};
use crate::services::totp;
use shared::models::{
    normalize_device_id, Employee, EmployeeStatus, UserRole,
};
use shared::types::{PaginatedResponse, Pagination};
use shared::validation::validate_emp_id;

/// Column list matching [`Employee`]'s field order
/// Employee numbers match `$1` regardless of case, like the unique index
pub(crate) const EMP_ID_MATCH: &str = "LOWER(emp_id) = LOWER($1)";

pub(crate) const EMPLOYEE_COLUMNS: &str = "id, emp_id, name, dept, role, status, device_mac, \
     inner_ip, remarks, last_login_time, login_device, created_at, updated_at";

/// Employee service
#[derive(Clone)]
pub struct EmployeeService {
    db: PgPool,
}

/// Input for creating an employee
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEmployeeInput {
    #[validate(length(min = 1, max = 20, message = "Employee ID must be 1-20 characters"))]
    pub emp_id: String,
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: String,
    pub dept: Option<String>,
    pub role: Option<UserRole>,
    pub device_mac: Option<String>,
    pub remarks: Option<String>,
}

/// Input for updating an employee
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateEmployeeInput {
    #[validate(length(min = 1, max = 20, message = "Employee ID must be 1-20 characters"))]
    pub emp_id: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: Option<String>,
    pub dept: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<EmployeeStatus>,
    pub device_mac: Option<String>,
    pub remarks: Option<String>,
}

/// Filters for listing employees
#[derive(Debug, Default, Deserialize)]
pub struct EmployeeFilter {
    pub name: Option<String>,
    pub emp_id: Option<String>,
    pub dept: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<EmployeeStatus>,
}

/// Newly created account with its one-time enrollment data
#[derive(Debug, Serialize)]
pub struct CreatedEmployee {
    pub employee: Employee,
    pub totp_secret: String,
    pub provisioning_uri: String,
}

/// Public subset of an employee record
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EmployeeBasicInfo {
    pub emp_id: String,
    pub name: String,
    pub dept: Option<String>,
    pub status: EmployeeStatus,
}

impl EmployeeService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn find_by_emp_id(&self, emp_id: &str) -> AppResult<Option<Employee>> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            "SELECT {} FROM employees WHERE {}",
            EMPLOYEE_COLUMNS, EMP_ID_MATCH
        ))
        .bind(emp_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(employee)
    }

    pub async fn get_by_emp_id(&self, emp_id: &str) -> AppResult<Employee> {
        self.find_by_emp_id(emp_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Employee {}", emp_id)))
    }

    /// Employee whose bound device matches `device`
    pub async fn find_by_device(&self, device: &str) -> AppResult<Option<Employee>> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            "SELECT {} FROM employees WHERE UPPER(device_mac) = UPPER($1)",
            EMPLOYEE_COLUMNS
        ))
        .bind(device)
        .fetch_optional(&self.db)
        .await?;

        Ok(employee)
    }

    pub async fn basic_info(&self, emp_id: &str) -> AppResult<EmployeeBasicInfo> {
        sqlx::query_as::<_, EmployeeBasicInfo>(&format!(
            "SELECT emp_id, name, dept, status FROM employees WHERE {}",
            EMP_ID_MATCH
        ))
        .bind(emp_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Employee {}", emp_id)))
    }

    /// Create an employee awaiting authenticator binding
    pub async fn create(
        &self,
        input: CreateEmployeeInput,
        totp_config: &TotpConfig,
    ) -> AppResult<CreatedEmployee> {
        input.validate()?;
        let emp_id = input.emp_id.trim().to_string();
        validate_emp_id(&emp_id).map_err(|msg| {
            AppError::validation("emp_id", msg, "工号格式不正确")
        })?;

        if self.emp_id_taken(&emp_id, None).await? {
            return Err(AppError::DuplicateEntry("emp_id".to_string()));
        }

        let device_mac = match input.device_mac.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let device = normalize_device_id(raw).ok_or_else(|| {
                    AppError::validation("device_mac", "Invalid device identifier", "设备标识无效")
                })?;
                self.ensure_device_free(&device, None).await?;
                Some(device)
            }
            _ => None,
        };

        let secret = totp::generate_secret();
        let mut tx = self.db.begin().await?;

        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            INSERT INTO employees (emp_id, name, dept, role, status, device_mac, remarks)
            VALUES ($1, $2, $3, $4, 'pending_binding', $5, $6)
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(&emp_id)
        .bind(input.name.trim())
        .bind(&input.dept)
        .bind(input.role.unwrap_or_default())
        .bind(&device_mac)
        .bind(&input.remarks)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO totp_credentials (employee_id, secret) VALUES ($1, $2)")
            .bind(employee.id)
            .bind(&secret)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(emp_id = %employee.emp_id, "Employee created");

        let provisioning_uri = totp::provisioning_uri(&secret, &employee.name, totp_config);
        Ok(CreatedEmployee {
            employee,
            totp_secret: secret,
            provisioning_uri,
        })
    }

    /// List employees with filters
    pub async fn list(
        &self,
        filter: &EmployeeFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Employee>> {
        const WHERE: &str = r#"
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%')
              AND ($2::text IS NULL OR emp_id ILIKE '%' || $2 || '%')
              AND ($3::text IS NULL OR dept ILIKE '%' || $3 || '%')
              AND ($4::user_role IS NULL OR role = $4)
              AND ($5::employee_status IS NULL OR status = $5)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM employees {}", WHERE))
            .bind(&filter.name)
            .bind(&filter.emp_id)
            .bind(&filter.dept)
            .bind(filter.role)
            .bind(filter.status)
            .fetch_one(&self.db)
            .await?;

        let employees = sqlx::query_as::<_, Employee>(&format!(
            "SELECT {} FROM employees {} ORDER BY created_at DESC LIMIT $6 OFFSET $7",
            EMPLOYEE_COLUMNS, WHERE
        ))
        .bind(&filter.name)
        .bind(&filter.emp_id)
        .bind(&filter.dept)
        .bind(filter.role)
        .bind(filter.status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(employees, pagination, total))
    }

    /// Update an employee; an emp_id rename carries attendance and inquiry history along
    pub async fn update(&self, emp_id: &str, input: UpdateEmployeeInput) -> AppResult<Employee> {
        input.validate()?;
        let existing = self.get_by_emp_id(emp_id).await?;

        let new_emp_id = match input.emp_id.as_deref().map(str::trim) {
            Some(new_id) if new_id != existing.emp_id => {
                validate_emp_id(new_id).map_err(|msg| {
                    AppError::validation("emp_id", msg, "工号格式不正确")
                })?;
                if self.emp_id_taken(new_id, Some(existing.id)).await? {
                    return Err(AppError::DuplicateEntry("emp_id".to_string()));
                }
                new_id.to_string()
            }
            _ => existing.emp_id.clone(),
        };

        let device_mac = match input.device_mac.as_deref().map(str::trim) {
            None => existing.device_mac.clone(),
            Some("") => None,
            Some(raw) => {
                let device = normalize_device_id(raw).ok_or_else(|| {
                    AppError::validation("device_mac", "Invalid device identifier", "设备标识无效")
                })?;
                self.ensure_device_free(&device, Some(existing.id)).await?;
                Some(device)
            }
        };

        let mut tx = self.db.begin().await?;

        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            UPDATE employees
            SET emp_id = $2, name = $3, dept = $4, role = $5, status = $6,
                device_mac = $7, remarks = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(existing.id)
        .bind(&new_emp_id)
        .bind(input.name.as_deref().map(str::trim).unwrap_or(&existing.name))
        .bind(input.dept.or(existing.dept))
        .bind(input.role.unwrap_or(existing.role))
        .bind(input.status.unwrap_or(existing.status))
        .bind(&device_mac)
        .bind(input.remarks.or(existing.remarks))
        .fetch_one(&mut *tx)
        .await?;

        if new_emp_id != existing.emp_id {
            sqlx::query("UPDATE punch_records SET emp_id = $2 WHERE emp_id = $1")
                .bind(&existing.emp_id)
                .bind(&new_emp_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE inquiries SET creator_emp_id = $2 WHERE creator_emp_id = $1")
                .bind(&existing.emp_id)
                .bind(&new_emp_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(from = %existing.emp_id, to = %new_emp_id, "Employee ID renamed");
        }

        tx.commit().await?;

        Ok(employee)
    }

    pub async fn update_remarks(&self, emp_id: &str, remarks: Option<String>) -> AppResult<Employee> {
        sqlx::query_as::<_, Employee>(&format!(
            "UPDATE employees SET remarks = $2, updated_at = NOW() WHERE {} RETURNING {}",
            EMP_ID_MATCH, EMPLOYEE_COLUMNS
        ))
        .bind(emp_id)
        .bind(remarks)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Employee {}", emp_id)))
    }

    /// Clear an employee's device binding
    pub async fn unbind_device(&self, emp_id: &str) -> AppResult<Employee> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            "UPDATE employees SET device_mac = NULL, updated_at = NOW() WHERE {} RETURNING {}",
            EMP_ID_MATCH, EMPLOYEE_COLUMNS
        ))
        .bind(emp_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Employee {}", emp_id)))?;

        tracing::info!(emp_id = %emp_id, "Device unbound");
        Ok(employee)
    }

    pub async fn delete(&self, emp_id: &str) -> AppResult<()> {
        let result = sqlx::query(&format!("DELETE FROM employees WHERE {}", EMP_ID_MATCH))
            .bind(emp_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Employee {}", emp_id)));
        }

        tracing::info!(emp_id = %emp_id, "Employee deleted");
        Ok(())
    }

    /// Record a successful sign-in
    pub async fn record_login(
        &self,
        id: Uuid,
        status: EmployeeStatus,
        login_device: &str,
    ) -> AppResult<Employee> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            UPDATE employees
            SET status = $2, last_login_time = NOW(), login_device = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .bind(login_device)
        .fetch_one(&self.db)
        .await?;

        Ok(employee)
    }

    pub async fn set_status(&self, id: Uuid, status: EmployeeStatus) -> AppResult<Employee> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            "UPDATE employees SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            EMPLOYEE_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        Ok(employee)
    }

    async fn emp_id_taken(&self, emp_id: &str, except: Option<Uuid>) -> AppResult<bool> {
        let taken = sqlx::query_scalar::<_, bool>(&format!(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM employees
                WHERE {} AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
            EMP_ID_MATCH
        ))
        .bind(emp_id)
        .bind(except)
        .fetch_one(&self.db)
        .await?;

        Ok(taken)
    }

    async fn ensure_device_free(&self, device: &str, except: Option<Uuid>) -> AppResult<()> {
        if let Some(owner) = self.find_by_device(device).await? {
            if Some(owner.id) != except {
                return Err(AppError::Conflict {
                    resource: "device_mac".to_string(),
                    message: format!(
                        "Device is already bound to {} ({})",
                        owner.name, owner.emp_id
                    ),
                    message_zh: format!("该设备已绑定给 {}（{}）", owner.name, owner.emp_id),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emp_id_lookups_ignore_case() {
        assert_eq!(EMP_ID_MATCH, "LOWER(emp_id) = LOWER($1)");
    }
}
