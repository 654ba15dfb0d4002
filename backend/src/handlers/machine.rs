//! Machine and part catalog HTTP handlers
//!
//! Reads are open to every logged-in employee with purchase prices hidden
//! from non-admins. Writes and imports are admin-only.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::error::{AppError, AppResult};
use crate::handlers::{upload::MultipartForm, PageQuery};
use crate::middleware::CurrentUser;
use crate::services::machine::{MachineFilter, PartFilter};
use crate::services::MachineService;
use crate::AppState;
use shared::models::{ImportReport, Machine, MachineInput, PartType, PartTypeInput};
use shared::types::PaginatedResponse;
use shared::validation::file_extension;

// ============================================================================
// Machines
// ============================================================================

pub async fn list_machines(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageQuery>,
    Query(filter): Query<MachineFilter>,
) -> AppResult<Json<PaginatedResponse<Machine>>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(
        service
            .list_machines(&filter, &page.pagination(), user.role)
            .await?,
    ))
}

pub async fn get_machine(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(model): Path<String>,
) -> AppResult<Json<Machine>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.get_machine(&model, user.role).await?))
}

pub async fn create_machine(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<MachineInput>,
) -> AppResult<(StatusCode, Json<Machine>)> {
    let service = MachineService::new(state.db.clone());
    let machine = service.create_machine(input, user.role).await?;
    Ok((StatusCode::CREATED, Json(machine)))
}

pub async fn update_machine(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(model): Path<String>,
    Json(input): Json<MachineInput>,
) -> AppResult<Json<Machine>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.update_machine(&model, input, user.role).await?))
}

pub async fn delete_machine(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> AppResult<StatusCode> {
    MachineService::new(state.db.clone())
        .delete_machine(&model)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Import machines from a JSON body (object or array)
pub async fn import_machines_json(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<Json<ImportReport>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.import_machines(payload).await?))
}

/// Import machines from an uploaded `.json` file (multipart `file`)
pub async fn import_machines_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<ImportReport>> {
    let mut form = MultipartForm::read(multipart).await?;
    let (filename, data) = form.take_file()?;
    let payload = parse_json_upload(&filename, &data)?;

    let service = MachineService::new(state.db.clone());
    Ok(Json(service.import_machines(payload).await?))
}

pub async fn export_machines(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<Machine>>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.export_machines(user.role).await?))
}

// ============================================================================
// Part types
// ============================================================================

pub async fn list_parts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageQuery>,
    Query(filter): Query<PartFilter>,
) -> AppResult<Json<PaginatedResponse<PartType>>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(
        service
            .list_parts(&filter, &page.pagination(), user.role)
            .await?,
    ))
}

pub async fn get_part(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(part_type_id): Path<i32>,
) -> AppResult<Json<PartType>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.get_part(part_type_id, user.role).await?))
}

pub async fn create_part(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<PartTypeInput>,
) -> AppResult<(StatusCode, Json<PartType>)> {
    let service = MachineService::new(state.db.clone());
    let part = service.create_part(input, user.role).await?;
    Ok((StatusCode::CREATED, Json(part)))
}

pub async fn update_part(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(part_type_id): Path<i32>,
    Json(input): Json<PartTypeInput>,
) -> AppResult<Json<PartType>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.update_part(part_type_id, input, user.role).await?))
}

pub async fn delete_part(
    State(state): State<AppState>,
    Path(part_type_id): Path<i32>,
) -> AppResult<StatusCode> {
    MachineService::new(state.db.clone())
        .delete_part(part_type_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn import_parts_json(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<Json<ImportReport>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.import_parts(payload).await?))
}

pub async fn export_parts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<PartType>>> {
    let service = MachineService::new(state.db.clone());
    Ok(Json(service.export_parts(user.role).await?))
}

/// Decode an uploaded catalog file; only `.json` is accepted
pub fn parse_json_upload(filename: &str, data: &[u8]) -> AppResult<serde_json::Value> {
    if file_extension(filename).as_deref() != Some("json") {
        return Err(AppError::validation(
            "file",
            "Only .json files can be imported",
            "只支持JSON文件",
        ));
    }
    serde_json::from_slice(data)
        .map_err(|_| AppError::validation("file", "File is not valid JSON", "JSON文件格式错误"))
}
