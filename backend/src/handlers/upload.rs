//! Upload HTTP handlers

use std::collections::HashMap;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::services::storage::{ChunkStatus, ChunkUpload, StoredFile};
use crate::services::Storage;
use crate::AppState;
use shared::validation::validate_upload_extension;

/// Multipart body split into its file part and text fields
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub file_name: Option<String>,
    pub file: Option<Vec<u8>>,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.file_name = field.file_name().map(str::to_string);
                form.file = Some(field.bytes().await.map_err(malformed)?.to_vec());
            } else {
                let value = field.text().await.map_err(malformed)?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, name: &str) -> AppResult<&str> {
        self.text(name).ok_or_else(|| {
            AppError::validation(name, &format!("{} is required", name), &format!("缺少字段 {}", name))
        })
    }

    pub fn number<T: std::str::FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        self.text(name)
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    AppError::validation(name, &format!("{} must be a number", name), "必须为数字")
                })
            })
            .transpose()
    }

    /// The uploaded file and its client-side name
    pub fn take_file(&mut self) -> AppResult<(String, Vec<u8>)> {
        let data = self
            .file
            .take()
            .ok_or_else(|| AppError::validation("file", "No file uploaded", "未上传文件"))?;
        let name = self
            .file_name
            .take()
            .or_else(|| self.text("filename").map(str::to_string))
            .unwrap_or_else(|| "file".to_string());
        Ok((name, data))
    }
}

fn malformed(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::validation("file", &format!("Malformed upload: {}", err), "上传内容格式错误")
}

#[derive(Deserialize)]
pub struct MoveRequest {
    pub source_path: String,
    pub target_dir: String,
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub file_path: String,
}

fn storage(state: &AppState) -> Storage {
    Storage::new(state.config.storage.assets_dir.clone())
}

/// Store a single uploaded file
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<StoredFile>)> {
    let mut form = MultipartForm::read(multipart).await?;
    let (name, data) = form.take_file()?;
    validate_upload_extension(&name)
        .map_err(|msg| AppError::validation("file", msg, "不支持的文件类型"))?;

    let stored = storage(&state)
        .save(form.text("target_dir"), &name, &data)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn move_file(
    State(state): State<AppState>,
    Json(body): Json<MoveRequest>,
) -> AppResult<Json<StoredFile>> {
    Ok(Json(storage(&state).move_file(&body.source_path, &body.target_dir).await?))
}

/// Soft delete into `DeleteFiles/`
pub async fn delete_file(
    State(state): State<AppState>,
    Json(body): Json<DeleteRequest>,
) -> AppResult<Json<StoredFile>> {
    Ok(Json(storage(&state).soft_delete(&body.file_path).await?))
}

pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<ChunkStatus>> {
    let mut form = MultipartForm::read(multipart).await?;
    let chunk_index = form
        .number::<u32>("chunk_index")?
        .ok_or_else(|| AppError::validation("chunk_index", "chunk_index is required", "缺少分片序号"))?;
    let total_chunks = form
        .number::<u32>("total_chunks")?
        .ok_or_else(|| AppError::validation("total_chunks", "total_chunks is required", "缺少分片总数"))?;
    let file_identifier = form.required("file_identifier")?.to_string();
    let filename = form.required("filename")?.to_string();
    validate_upload_extension(&filename)
        .map_err(|msg| AppError::validation("filename", msg, "不支持的文件类型"))?;
    let (_, data) = form.take_file()?;

    let status = storage(&state)
        .store_chunk(ChunkUpload {
            file_identifier: &file_identifier,
            chunk_index,
            total_chunks,
            filename: &filename,
            data: &data,
        })
        .await?;
    Ok(Json(status))
}
