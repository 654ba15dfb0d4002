//! Employee management HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::PageQuery;
use crate::middleware::CurrentUser;
use crate::services::employee::{
    CreateEmployeeInput, CreatedEmployee, EmployeeBasicInfo, EmployeeFilter, UpdateEmployeeInput,
};
use crate::services::EmployeeService;
use crate::AppState;
use shared::models::Employee;
use shared::types::PaginatedResponse;

#[derive(Deserialize)]
pub struct RemarksRequest {
    pub remarks: Option<String>,
}

pub async fn list_employees(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<EmployeeFilter>,
) -> AppResult<Json<PaginatedResponse<Employee>>> {
    let service = EmployeeService::new(state.db.clone());
    Ok(Json(service.list(&filter, &page.pagination()).await?))
}

pub async fn create_employee(
    State(state): State<AppState>,
    Json(input): Json<CreateEmployeeInput>,
) -> AppResult<(StatusCode, Json<CreatedEmployee>)> {
    let service = EmployeeService::new(state.db.clone());
    let created = service.create(input, &state.config.totp).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Full profile; the employee themselves or an admin
pub async fn get_employee(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(emp_id): Path<String>,
) -> AppResult<Json<Employee>> {
    user.require_self_or_admin(&emp_id)?;
    let service = EmployeeService::new(state.db.clone());
    Ok(Json(service.get_by_emp_id(&emp_id).await?))
}

/// Public name lookup used by the punch page
pub async fn get_basic_info(
    State(state): State<AppState>,
    Path(emp_id): Path<String>,
) -> AppResult<Json<EmployeeBasicInfo>> {
    let service = EmployeeService::new(state.db.clone());
    Ok(Json(service.basic_info(emp_id.trim()).await?))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Path(emp_id): Path<String>,
    Json(input): Json<UpdateEmployeeInput>,
) -> AppResult<Json<Employee>> {
    let service = EmployeeService::new(state.db.clone());
    Ok(Json(service.update(&emp_id, input).await?))
}

pub async fn update_remarks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(emp_id): Path<String>,
    Json(body): Json<RemarksRequest>,
) -> AppResult<Json<Employee>> {
    user.require_self_or_admin(&emp_id)?;
    let service = EmployeeService::new(state.db.clone());
    Ok(Json(service.update_remarks(&emp_id, body.remarks).await?))
}

pub async fn unbind_device(
    State(state): State<AppState>,
    Path(emp_id): Path<String>,
) -> AppResult<Json<Employee>> {
    let service = EmployeeService::new(state.db.clone());
    Ok(Json(service.unbind_device(&emp_id).await?))
}

pub async fn delete_employee(
    State(state): State<AppState>,
    Path(emp_id): Path<String>,
) -> AppResult<StatusCode> {
    let service = EmployeeService::new(state.db.clone());
    service.delete(&emp_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
