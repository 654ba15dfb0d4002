//! Inspection checklist HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::PageQuery;
use crate::services::inspection::{
    BatchResult, InspectionDetail, InspectionFilter, InspectionListRow, InspectionReport,
    ItemInput, StageLogView,
};
use crate::services::InspectionService;
use crate::AppState;
use shared::models::{BatchItemInput, InspectionItem, OrderInspection};
use shared::types::PaginatedResponse;

#[derive(Deserialize)]
pub struct CreateInspectionRequest {
    pub order_id: Uuid,
}

#[derive(Deserialize)]
pub struct InspectionRemarksRequest {
    pub remarks: Option<String>,
}

#[derive(Deserialize)]
pub struct StageRequest {
    pub stage: i16,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub items: Vec<BatchItemInput>,
}

pub async fn list_inspections(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<InspectionFilter>,
) -> AppResult<Json<PaginatedResponse<InspectionListRow>>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.list(&filter, &page.pagination()).await?))
}

pub async fn create_inspection(
    State(state): State<AppState>,
    Json(body): Json<CreateInspectionRequest>,
) -> AppResult<(StatusCode, Json<OrderInspection>)> {
    let service = InspectionService::new(state.db.clone());
    Ok((StatusCode::CREATED, Json(service.create(body.order_id).await?)))
}

/// Inspection with its order summary and item tree
pub async fn get_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<Json<InspectionDetail>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.detail(inspection_id).await?))
}

pub async fn update_inspection_remarks(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
    Json(body): Json<InspectionRemarksRequest>,
) -> AppResult<Json<OrderInspection>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.update_remarks(inspection_id, body.remarks).await?))
}

pub async fn delete_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let service = InspectionService::new(state.db.clone());
    service.delete(inspection_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_inspection_progress(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<Json<OrderInspection>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.refresh_progress(inspection_id).await?))
}

pub async fn get_inspection_report(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<Json<InspectionReport>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.report(inspection_id).await?))
}

pub async fn set_inspection_stage(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
    Json(body): Json<StageRequest>,
) -> AppResult<Json<OrderInspection>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.set_stage(inspection_id, body.stage).await?))
}

pub async fn list_stage_logs(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<Json<Vec<StageLogView>>> {
    let service = InspectionService::new(state.db.clone());
    let logs = service.stage_logs(inspection_id).await?;
    Ok(Json(logs.into_iter().map(StageLogView::from).collect()))
}

pub async fn create_inspection_item(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
    Json(input): Json<ItemInput>,
) -> AppResult<(StatusCode, Json<InspectionItem>)> {
    let service = InspectionService::new(state.db.clone());
    let item = service.create_item(inspection_id, input).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_inspection_item(
    State(state): State<AppState>,
    Path((inspection_id, item_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ItemInput>,
) -> AppResult<Json<InspectionItem>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.update_item(inspection_id, item_id, input).await?))
}

pub async fn delete_inspection_item(
    State(state): State<AppState>,
    Path((inspection_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let service = InspectionService::new(state.db.clone());
    service.delete_item(inspection_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Apply a checklist edit session in one transaction
pub async fn batch_inspection_items(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
    Json(body): Json<BatchRequest>,
) -> AppResult<Json<BatchResult>> {
    let service = InspectionService::new(state.db.clone());
    Ok(Json(service.batch(inspection_id, body.items).await?))
}
