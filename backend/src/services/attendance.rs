//! Attendance punching and device binding

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::AttendanceConfig;
use crate::error::{AppError, AppResult};
use crate::middleware::ClientInfo;
use crate::services::device::{resolve_device, ResolvedDevice};
use crate::services::employee::{EmployeeService, EMPLOYEE_COLUMNS};
use shared::models::{
    check_device, is_inner_network, is_temporary_emp_id, summarize_user_agent, temporary_emp_id,
    DeviceCheck, DeviceOwner, Employee, EmployeeStatus, PunchRecord, PunchStatus,
    PunchType,
};
use shared::types::{PaginatedResponse, Pagination};

const PUNCH_COLUMNS: &str = "id, emp_id, name, punch_type, punch_time, client_ip, device_mac, \
     device_source, login_device, status, created_at";

/// Attendance service
#[derive(Clone)]
pub struct AttendanceService {
    db: PgPool,
    config: AttendanceConfig,
}

/// Clock-in request body
#[derive(Debug, Default, Deserialize)]
pub struct ClockInRequest {
    pub emp_id: Option<String>,
    pub device_id: Option<String>,
    #[serde(default)]
    pub request_device_change: bool,
}

/// Outcome of a clock-in
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ClockInStatus {
    Recorded,
    PendingApproval,
}

#[derive(Debug, Serialize)]
pub struct ClockInResponse {
    pub status: ClockInStatus,
    pub emp_id: String,
    pub name: String,
    pub punch_type: PunchType,
    pub punch_type_zh: &'static str,
    pub device: ResolvedDevice,
    pub first_binding: bool,
    pub temporary: bool,
    pub record: PunchRecord,
}

/// Filters for punch record queries
#[derive(Debug, Default, Deserialize)]
pub struct PunchRecordFilter {
    pub emp_id: Option<String>,
    pub name: Option<String>,
    pub punch_type: Option<PunchType>,
    pub status: Option<PunchStatus>,
    pub start_date: Option<NaiveDate>,
    /// Inclusive
    pub end_date: Option<NaiveDate>,
}

/// An employee and their bound device
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DeviceBinding {
    pub emp_id: String,
    pub name: String,
    pub dept: Option<String>,
    pub status: EmployeeStatus,
    pub device_mac: Option<String>,
    pub inner_ip: Option<String>,
    pub last_login_time: Option<DateTime<Utc>>,
    pub login_device: Option<String>,
    pub is_temporary: bool,
}

/// Result of moving a temporary device to a real employee
#[derive(Debug, Serialize)]
pub struct DeviceReplacement {
    pub employee: Employee,
    pub moved_records: u64,
}

impl AttendanceService {
    pub fn new(db: PgPool, config: AttendanceConfig) -> Self {
        Self { db, config }
    }

    fn local_offset(&self) -> FixedOffset {
        local_offset(self.config.utc_offset_hours)
    }

    /// Record a punch, binding or challenging the device as needed
    pub async fn clock_in(&self, req: ClockInRequest, client: &ClientInfo) -> AppResult<ClockInResponse> {
        if self.config.require_inner_network && !is_inner_network(&client.ip) {
            tracing::warn!(ip = %client.ip, "Punch rejected: outside company network");
            return Err(AppError::OutsideNetwork {
                ip: client.ip.to_string(),
            });
        }

        let provided = req.device_id.as_deref().or(client.device_id.as_deref());
        let device = resolve_device(
            provided,
            &client.ip,
            &client.user_agent,
            &self.config.arp_table_path,
        )
        .await?;

        let employees = EmployeeService::new(self.db.clone());
        let owner = employees.find_by_device(&device.identity).await?;

        let emp_id = req
            .emp_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(emp_id) = emp_id else {
            // Identify the employee by device alone
            let (employee, temporary) = match owner {
                Some(owner) => {
                    ensure_can_punch(&owner)?;
                    (owner, false)
                }
                None => (self.register_temporary(&device).await?, true),
            };
            let mut response = self.record_punch(&employee, &device, client, false).await?;
            response.temporary = temporary || employee.is_temporary();
            return Ok(response);
        };

        let employee = employees.get_by_emp_id(emp_id).await?;
        ensure_can_punch(&employee)?;

        let check = check_device(
            &employee.emp_id,
            employee.device_mac.as_deref(),
            owner.as_ref().map(|o| DeviceOwner {
                emp_id: &o.emp_id,
                name: &o.name,
            }),
            &device.identity,
        );

        match check {
            DeviceCheck::Matched => self.record_punch(&employee, &device, client, false).await,
            DeviceCheck::Unbound => {
                let employee = self.bind_device(&employee, &device.identity).await?;
                self.record_punch(&employee, &device, client, true).await
            }
            DeviceCheck::Changed { .. } if req.request_device_change => {
                let record = self.create_change_request(&employee, &device, client).await?;
                Ok(ClockInResponse {
                    status: ClockInStatus::PendingApproval,
                    emp_id: employee.emp_id.clone(),
                    name: employee.name.clone(),
                    punch_type: record.punch_type,
                    punch_type_zh: record.punch_type.display_name_zh(),
                    device,
                    first_binding: false,
                    temporary: employee.is_temporary(),
                    record,
                })
            }
            DeviceCheck::Changed { .. } => Err(AppError::DeviceChangeRequired {
                emp_id: employee.emp_id,
            }),
            DeviceCheck::OwnedByOther { emp_id, name } => Err(device_taken(&emp_id, &name)),
        }
    }

    /// File an explicit device change request
    pub async fn request_device_change(
        &self,
        emp_id: &str,
        device_id: Option<&str>,
        client: &ClientInfo,
    ) -> AppResult<PunchRecord> {
        let employees = EmployeeService::new(self.db.clone());
        let employee = employees.get_by_emp_id(emp_id).await?;
        ensure_can_punch(&employee)?;

        let provided = device_id.or(client.device_id.as_deref());
        let device = resolve_device(
            provided,
            &client.ip,
            &client.user_agent,
            &self.config.arp_table_path,
        )
        .await?;

        if let Some(owner) = employees.find_by_device(&device.identity).await? {
            if owner.id != employee.id {
                return Err(device_taken(&owner.emp_id, &owner.name));
            }
            return Err(AppError::InvalidStateTransition(
                "Device is already bound to this employee".to_string(),
            ));
        }

        self.create_change_request(&employee, &device, client).await
    }

    /// Bind the requested device and mark the request approved
    pub async fn approve_device_change(&self, record_id: Uuid) -> AppResult<PunchRecord> {
        let record = self.pending_change_request(record_id).await?;
        let device = record.device_mac.clone().ok_or_else(|| {
            AppError::InvalidStateTransition("Request carries no device".to_string())
        })?;

        let employees = EmployeeService::new(self.db.clone());
        let employee = employees.get_by_emp_id(&record.emp_id).await?;
        if let Some(owner) = employees.find_by_device(&device).await? {
            if owner.id != employee.id {
                return Err(device_taken(&owner.emp_id, &owner.name));
            }
        }

        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE employees SET device_mac = $2, updated_at = NOW() WHERE id = $1")
            .bind(employee.id)
            .bind(&device)
            .execute(&mut *tx)
            .await?;

        let approved = sqlx::query_as::<_, PunchRecord>(&format!(
            r#"
            UPDATE punch_records
            SET status = 'approved', punch_type = 'device_change_approved'
            WHERE id = $1
            RETURNING {}
            "#,
            PUNCH_COLUMNS
        ))
        .bind(record_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(emp_id = %employee.emp_id, device = %device, "Device change approved");
        Ok(approved)
    }

    /// Discard a pending device change request
    pub async fn reject_device_change(&self, record_id: Uuid) -> AppResult<()> {
        self.pending_change_request(record_id).await?;

        sqlx::query("DELETE FROM punch_records WHERE id = $1")
            .bind(record_id)
            .execute(&self.db)
            .await?;

        tracing::info!(record_id = %record_id, "Device change rejected");
        Ok(())
    }

    /// Paginated punch records, newest first
    pub async fn list_records(
        &self,
        filter: &PunchRecordFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<PunchRecord>> {
        let (from, until) = day_bounds(filter.start_date, filter.end_date, self.local_offset());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM punch_records p LEFT JOIN employees e ON e.emp_id = p.emp_id {}",
            RECORD_FILTER
        ))
        .bind(&filter.emp_id)
        .bind(&filter.name)
        .bind(filter.punch_type)
        .bind(filter.status)
        .bind(from)
        .bind(until)
        .fetch_one(&self.db)
        .await?;

        let records = sqlx::query_as::<_, PunchRecord>(&format!(
            "{} {} ORDER BY p.punch_time DESC LIMIT $7 OFFSET $8",
            RECORD_SELECT, RECORD_FILTER
        ))
        .bind(&filter.emp_id)
        .bind(&filter.name)
        .bind(filter.punch_type)
        .bind(filter.status)
        .bind(from)
        .bind(until)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(records, pagination, total))
    }

    /// All punch records matching the filter, for export
    pub async fn export_records(&self, filter: &PunchRecordFilter) -> AppResult<Vec<PunchRecord>> {
        let (from, until) = day_bounds(filter.start_date, filter.end_date, self.local_offset());

        let records = sqlx::query_as::<_, PunchRecord>(&format!(
            "{} {} ORDER BY p.punch_time DESC",
            RECORD_SELECT, RECORD_FILTER
        ))
        .bind(&filter.emp_id)
        .bind(&filter.name)
        .bind(filter.punch_type)
        .bind(filter.status)
        .bind(from)
        .bind(until)
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }

    /// Employees that have a device bound
    pub async fn list_devices(&self) -> AppResult<Vec<DeviceBinding>> {
        let devices = sqlx::query_as::<_, DeviceBinding>(
            r#"
            SELECT emp_id, name, dept, status, device_mac, inner_ip, last_login_time,
                   login_device, emp_id ILIKE 'TEMP\_%' AS is_temporary
            FROM employees
            WHERE device_mac IS NOT NULL
            ORDER BY is_temporary DESC, emp_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(devices)
    }

    /// Hand a temporary employee's device and punches to a real employee
    pub async fn replace_temp_device(
        &self,
        temp_emp_id: &str,
        target_emp_id: &str,
    ) -> AppResult<DeviceReplacement> {
        ensure_temporary(temp_emp_id)?;
        if is_temporary_emp_id(target_emp_id) {
            return Err(AppError::validation(
                "target_emp_id",
                "Target must be a regular employee",
                "目标员工不能是临时账号",
            ));
        }

        let employees = EmployeeService::new(self.db.clone());
        let temp = employees.get_by_emp_id(temp_emp_id).await?;
        let target = employees.get_by_emp_id(target_emp_id).await?;

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM employees WHERE id = $1")
            .bind(temp.id)
            .execute(&mut *tx)
            .await?;

        let transfer = target.device_transfer_from(&temp);
        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            UPDATE employees
            SET device_mac = $2, inner_ip = $3, last_login_time = $4, login_device = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(target.id)
        .bind(&transfer.device_mac)
        .bind(&transfer.inner_ip)
        .bind(transfer.last_login_time)
        .bind(&transfer.login_device)
        .fetch_one(&mut *tx)
        .await?;

        let moved = sqlx::query("UPDATE punch_records SET emp_id = $2, name = $3 WHERE emp_id = $1")
            .bind(&temp.emp_id)
            .bind(&employee.emp_id)
            .bind(&employee.name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::info!(
            temp = %temp.emp_id,
            target = %employee.emp_id,
            moved_records = moved,
            "Temporary device reassigned"
        );

        Ok(DeviceReplacement {
            employee,
            moved_records: moved,
        })
    }

    /// Remove a temporary employee and its binding
    pub async fn delete_temp_device(&self, temp_emp_id: &str) -> AppResult<()> {
        ensure_temporary(temp_emp_id)?;
        EmployeeService::new(self.db.clone()).delete(temp_emp_id).await
    }

    async fn register_temporary(&self, device: &ResolvedDevice) -> AppResult<Employee> {
        let emp_id = temporary_emp_id(&device.identity);
        let employees = EmployeeService::new(self.db.clone());
        if employees.find_by_emp_id(&emp_id).await?.is_some() {
            return Err(AppError::Conflict {
                resource: "emp_id".to_string(),
                message: format!("Temporary account {} already exists for another device", emp_id),
                message_zh: format!("临时账号 {} 已被其他设备占用", emp_id),
            });
        }

        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            INSERT INTO employees (emp_id, name, role, status, device_mac, remarks)
            VALUES ($1, $1, 'user', 'active', $2, $3)
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(&emp_id)
        .bind(&device.identity)
        .bind(format!("Auto-registered from {} device", device.source.as_str()))
        .fetch_one(&self.db)
        .await?;

        tracing::info!(emp_id = %emp_id, device = %device.identity, "Temporary employee registered");
        Ok(employee)
    }

    async fn bind_device(&self, employee: &Employee, device: &str) -> AppResult<Employee> {
        let bound = sqlx::query_as::<_, Employee>(&format!(
            r#"
            UPDATE employees SET device_mac = $2, updated_at = NOW()
            WHERE id = $1 AND device_mac IS NULL
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        ))
        .bind(employee.id)
        .bind(device)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::DeviceChangeRequired {
            emp_id: employee.emp_id.clone(),
        })?;

        tracing::info!(emp_id = %bound.emp_id, device = %device, "Device bound");
        Ok(bound)
    }

    async fn record_punch(
        &self,
        employee: &Employee,
        device: &ResolvedDevice,
        client: &ClientInfo,
        first_binding: bool,
    ) -> AppResult<ClockInResponse> {
        let now = Utc::now();
        let punch_type = punch_type_at(now, self.local_offset());
        let login_device = summarize_user_agent(&client.user_agent).to_string();

        let mut tx = self.db.begin().await?;
        let record = insert_punch(
            &mut tx,
            employee,
            punch_type,
            PunchStatus::Recorded,
            now,
            device,
            client,
            &login_device,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE employees
            SET inner_ip = $2, last_login_time = $3, login_device = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(employee.id)
        .bind(client.ip.to_string())
        .bind(now)
        .bind(&login_device)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            emp_id = %employee.emp_id,
            punch_type = punch_type.as_str(),
            source = device.source.as_str(),
            "Punch recorded"
        );

        Ok(ClockInResponse {
            status: ClockInStatus::Recorded,
            emp_id: employee.emp_id.clone(),
            name: employee.name.clone(),
            punch_type,
            punch_type_zh: punch_type.display_name_zh(),
            device: device.clone(),
            first_binding,
            temporary: employee.is_temporary(),
            record,
        })
    }

    async fn create_change_request(
        &self,
        employee: &Employee,
        device: &ResolvedDevice,
        client: &ClientInfo,
    ) -> AppResult<PunchRecord> {
        // Repeated requests for the same device reuse the pending record
        let existing = sqlx::query_as::<_, PunchRecord>(&format!(
            r#"
            SELECT {} FROM punch_records
            WHERE emp_id = $1 AND device_mac = $2
              AND punch_type = 'device_change_request' AND status = 'pending'
            "#,
            PUNCH_COLUMNS
        ))
        .bind(&employee.emp_id)
        .bind(&device.identity)
        .fetch_optional(&self.db)
        .await?;
        if let Some(record) = existing {
            return Ok(record);
        }

        let login_device = summarize_user_agent(&client.user_agent).to_string();
        let mut tx = self.db.begin().await?;
        let record = insert_punch(
            &mut tx,
            employee,
            PunchType::DeviceChangeRequest,
            PunchStatus::Pending,
            Utc::now(),
            device,
            client,
            &login_device,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            emp_id = %employee.emp_id,
            device = %device.identity,
            "Device change requested"
        );
        Ok(record)
    }

    async fn pending_change_request(&self, record_id: Uuid) -> AppResult<PunchRecord> {
        let record = sqlx::query_as::<_, PunchRecord>(&format!(
            "SELECT {} FROM punch_records WHERE id = $1",
            PUNCH_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Device change request".to_string()))?;

        if record.punch_type != PunchType::DeviceChangeRequest || record.status != PunchStatus::Pending {
            return Err(AppError::InvalidStateTransition(
                "Record is not a pending device change request".to_string(),
            ));
        }
        Ok(record)
    }
}

/// Company local offset; out-of-range values fall back to UTC
pub fn local_offset(utc_offset_hours: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or(Utc.fix())
}

/// Punch type for an instant in company local time
pub fn punch_type_at(at: DateTime<Utc>, offset: FixedOffset) -> PunchType {
    PunchType::for_hour(at.with_timezone(&offset).hour())
}

/// UTC bounds `[start, end)` for an inclusive local date range
pub fn day_bounds(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    offset: FixedOffset,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let midnight = |date: NaiveDate| {
        offset
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    };
    (
        start.and_then(midnight),
        end.and_then(|d| d.succ_opt()).and_then(midnight),
    )
}

const RECORD_SELECT: &str = r#"
    SELECT p.id, p.emp_id, COALESCE(e.name, p.name) AS name, p.punch_type, p.punch_time,
           p.client_ip, p.device_mac, p.device_source, p.login_device, p.status, p.created_at
    FROM punch_records p
    LEFT JOIN employees e ON e.emp_id = p.emp_id
"#;

const RECORD_FILTER: &str = r#"
    WHERE ($1::text IS NULL OR p.emp_id ILIKE '%' || $1 || '%')
      AND ($2::text IS NULL OR COALESCE(e.name, p.name) ILIKE '%' || $2 || '%')
      AND ($3::punch_type IS NULL OR p.punch_type = $3)
      AND ($4::punch_status IS NULL OR p.status = $4)
      AND ($5::timestamptz IS NULL OR p.punch_time >= $5)
      AND ($6::timestamptz IS NULL OR p.punch_time < $6)
"#;

#[allow(clippy::too_many_arguments)]
async fn insert_punch(
    tx: &mut Transaction<'_, Postgres>,
    employee: &Employee,
    punch_type: PunchType,
    status: PunchStatus,
    at: DateTime<Utc>,
    device: &ResolvedDevice,
    client: &ClientInfo,
    login_device: &str,
) -> AppResult<PunchRecord> {
    let record = sqlx::query_as::<_, PunchRecord>(&format!(
        r#"
        INSERT INTO punch_records
            (emp_id, name, punch_type, punch_time, client_ip, device_mac, device_source, login_device, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        PUNCH_COLUMNS
    ))
    .bind(&employee.emp_id)
    .bind(&employee.name)
    .bind(punch_type)
    .bind(at)
    .bind(client.ip.to_string())
    .bind(&device.identity)
    .bind(device.source)
    .bind(login_device)
    .bind(status)
    .fetch_one(&mut **tx)
    .await?;

    Ok(record)
}

/// Reject deactivated employees before any punch or device request
pub fn ensure_can_punch(employee: &Employee) -> AppResult<()> {
    if employee.status.allows_punch() {
        return Ok(());
    }
    tracing::warn!(emp_id = %employee.emp_id, "Punch rejected: account inactive");
    Err(AppError::Forbidden {
        message: "Account is inactive".to_string(),
        message_zh: "账号已停用".to_string(),
    })
}

fn ensure_temporary(emp_id: &str) -> AppResult<()> {
    if is_temporary_emp_id(emp_id) {
        Ok(())
    } else {
        Err(AppError::validation(
            "temp_emp_id",
            "Only temporary (TEMP_) accounts can be replaced or removed here",
            "只能操作临时账号",
        ))
    }
}

fn device_taken(emp_id: &str, name: &str) -> AppError {
    AppError::Conflict {
        resource: "device_mac".to_string(),
        message: format!("Device is already bound to {} ({})", name, emp_id),
        message_zh: format!("该设备已绑定给 {}（{}）", name, emp_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punch_type_uses_local_offset() {
        let offset = local_offset(8);
        // 01:30 UTC is 09:30 in UTC+8
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 1, 30, 0).unwrap();
        assert_eq!(punch_type_at(at, offset), PunchType::ClockIn);
        // 14:00 UTC is 22:00 in UTC+8
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 14, 0, 0).unwrap();
        assert_eq!(punch_type_at(at, offset), PunchType::OffHours);
    }

    #[test]
    fn test_day_bounds_are_inclusive_local_days() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let (from, until) = day_bounds(Some(day), Some(day), local_offset(8));
        assert_eq!(from, Some(Utc.with_ymd_and_hms(2025, 3, 2, 16, 0, 0).unwrap()));
        assert_eq!(until, Some(Utc.with_ymd_and_hms(2025, 3, 3, 16, 0, 0).unwrap()));
        assert_eq!(day_bounds(None, None, local_offset(8)), (None, None));
    }

    #[test]
    fn test_invalid_offset_falls_back_to_utc() {
        assert_eq!(local_offset(30).local_minus_utc(), 0);
        assert_eq!(local_offset(-5).local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_only_temporary_accounts_accepted() {
        assert!(ensure_temporary("TEMP_AB12CD34").is_ok());
        assert!(ensure_temporary("E1001").is_err());
    }
}
