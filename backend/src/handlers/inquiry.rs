//! Inquiry HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::PageQuery;
use crate::middleware::CurrentUser;
use crate::services::inquiry::{
    CommunicationInput, InquiryDetail, InquiryFilter, InquiryInput, InquiryLogFilter, InquiryStats,
};
use crate::services::InquiryService;
use crate::AppState;
use shared::models::{Inquiry, InquiryCommunication, InquiryLog};
use shared::types::PaginatedResponse;

pub async fn list_inquiries(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageQuery>,
    Query(filter): Query<InquiryFilter>,
) -> AppResult<Json<PaginatedResponse<Inquiry>>> {
    let service = InquiryService::new(state.db.clone());
    Ok(Json(service.list(&user, &filter, &page.pagination()).await?))
}

pub async fn create_inquiry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<InquiryInput>,
) -> AppResult<(StatusCode, Json<Inquiry>)> {
    let service = InquiryService::new(state.db.clone());
    Ok((StatusCode::CREATED, Json(service.create(&user, input).await?)))
}

pub async fn get_inquiry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(inquiry_id): Path<Uuid>,
) -> AppResult<Json<InquiryDetail>> {
    let service = InquiryService::new(state.db.clone());
    Ok(Json(service.detail(&user, inquiry_id).await?))
}

pub async fn update_inquiry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(inquiry_id): Path<Uuid>,
    Json(input): Json<InquiryInput>,
) -> AppResult<Json<Inquiry>> {
    let service = InquiryService::new(state.db.clone());
    Ok(Json(service.update(&user, inquiry_id, input).await?))
}

pub async fn delete_inquiry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(inquiry_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let service = InquiryService::new(state.db.clone());
    service.delete(&user, inquiry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Totals scoped to what the caller may see
pub async fn inquiry_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<InquiryStats>> {
    let service = InquiryService::new(state.db.clone());
    Ok(Json(service.stats(&user).await?))
}

pub async fn list_communications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(inquiry_id): Path<Uuid>,
) -> AppResult<Json<Vec<InquiryCommunication>>> {
    let service = InquiryService::new(state.db.clone());
    Ok(Json(service.list_communications(&user, inquiry_id).await?))
}

pub async fn add_communication(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(inquiry_id): Path<Uuid>,
    Json(input): Json<CommunicationInput>,
) -> AppResult<(StatusCode, Json<InquiryCommunication>)> {
    let service = InquiryService::new(state.db.clone());
    let row = service.add_communication(&user, inquiry_id, input).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update_communication(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((inquiry_id, communication_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<CommunicationInput>,
) -> AppResult<Json<InquiryCommunication>> {
    let service = InquiryService::new(state.db.clone());
    let row = service
        .update_communication(&user, inquiry_id, communication_id, input)
        .await?;
    Ok(Json(row))
}

pub async fn delete_communication(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((inquiry_id, communication_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let service = InquiryService::new(state.db.clone());
    service
        .delete_communication(&user, inquiry_id, communication_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_inquiry_logs(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<InquiryLogFilter>,
) -> AppResult<Json<PaginatedResponse<InquiryLog>>> {
    let service = InquiryService::new(state.db.clone());
    Ok(Json(service.logs(&filter, &page.pagination()).await?))
}
