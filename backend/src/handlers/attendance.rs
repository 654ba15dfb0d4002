//! Attendance HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::{csv_attachment, PageQuery};
use crate::middleware::ClientInfo;
use crate::services::attendance::{
    local_offset, ClockInRequest, ClockInResponse, DeviceBinding, DeviceReplacement,
    PunchRecordFilter,
};
use crate::services::{export, AttendanceService};
use crate::AppState;
use shared::models::PunchRecord;
use shared::types::PaginatedResponse;

#[derive(Deserialize)]
pub struct DeviceChangeRequest {
    pub emp_id: String,
    pub device_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ReplaceDeviceRequest {
    pub temp_emp_id: String,
    pub target_emp_id: String,
}

fn service(state: &AppState) -> AttendanceService {
    AttendanceService::new(state.db.clone(), state.config.attendance.clone())
}

/// Punch in from an office device
pub async fn clock_in(
    State(state): State<AppState>,
    client: ClientInfo,
    body: Option<Json<ClockInRequest>>,
) -> AppResult<Json<ClockInResponse>> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(service(&state).clock_in(request, &client).await?))
}

pub async fn request_device_change(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<DeviceChangeRequest>,
) -> AppResult<(StatusCode, Json<PunchRecord>)> {
    let record = service(&state)
        .request_device_change(body.emp_id.trim(), body.device_id.as_deref(), &client)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn approve_device_change(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> AppResult<Json<PunchRecord>> {
    Ok(Json(service(&state).approve_device_change(record_id).await?))
}

pub async fn reject_device_change(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    service(&state).reject_device_change(record_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_punch_records(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<PunchRecordFilter>,
) -> AppResult<Json<PaginatedResponse<PunchRecord>>> {
    Ok(Json(service(&state).list_records(&filter, &page.pagination()).await?))
}

/// Punch records as a CSV download
pub async fn export_punch_records(
    State(state): State<AppState>,
    Query(filter): Query<PunchRecordFilter>,
) -> AppResult<Response> {
    let records = service(&state).export_records(&filter).await?;
    let offset = local_offset(state.config.attendance.utc_offset_hours);
    let body = export::punch_records_csv(&records, offset)?;

    Ok(csv_attachment("punch_records", body).into_response())
}

pub async fn list_devices(State(state): State<AppState>) -> AppResult<Json<Vec<DeviceBinding>>> {
    Ok(Json(service(&state).list_devices().await?))
}

/// Move a temporary device to the real employee
pub async fn replace_device(
    State(state): State<AppState>,
    Json(body): Json<ReplaceDeviceRequest>,
) -> AppResult<Json<DeviceReplacement>> {
    let replacement = service(&state)
        .replace_temp_device(body.temp_emp_id.trim(), body.target_emp_id.trim())
        .await?;
    Ok(Json(replacement))
}

pub async fn delete_temp_device(
    State(state): State<AppState>,
    Path(temp_emp_id): Path<String>,
) -> AppResult<StatusCode> {
    service(&state).delete_temp_device(&temp_emp_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
