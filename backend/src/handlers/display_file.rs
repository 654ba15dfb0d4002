//! Display file HTTP handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::{upload::MultipartForm, PageQuery};
use crate::middleware::CurrentUser;
use crate::services::display_file::{DisplayFileFilter, DisplayFileUpload};
use crate::services::{DisplayFileService, Storage};
use crate::AppState;
use shared::models::DisplayFileType;

fn service(state: &AppState) -> DisplayFileService {
    DisplayFileService::new(
        state.db.clone(),
        Storage::new(state.config.storage.assets_dir.clone()),
    )
}

/// Upload a display file (multipart: file, title, file_type, page_count)
pub async fn upload_display_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<shared::models::DisplayFile>)> {
    let mut form = MultipartForm::read(multipart).await?;
    let title = form.required("title")?.to_string();
    let file_type = form
        .required("file_type")?
        .parse::<DisplayFileType>()
        .map_err(|e| AppError::validation("file_type", &e.to_string(), "展示类型无效"))?;
    let page_count = form.number::<i32>("page_count")?;
    let (original_filename, data) = form.take_file()?;

    let file = service(&state)
        .upload(
            DisplayFileUpload {
                title,
                file_type,
                page_count,
                original_filename,
                data,
            },
            &user.emp_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn list_display_files(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DisplayFileFilter>,
) -> impl IntoResponse {
    match service(&state).list(&filter, &page.pagination()).await {
        Ok(files) => (StatusCode::OK, Json(files)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_display_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> impl IntoResponse {
    match service(&state).get(file_id).await {
        Ok(file) => (StatusCode::OK, Json(file)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Image list for the display screens (public)
pub async fn get_display_images(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> impl IntoResponse {
    match service(&state).images(file_id).await {
        Ok(images) => (StatusCode::OK, Json(images)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_display_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    service(&state).delete(file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
