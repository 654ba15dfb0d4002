//! Display files for the office screens

use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::storage::{to_slash_path, Storage, DISPLAY_DIR};
use shared::models::{DisplayFile, DisplayFileType};
use shared::types::{PaginatedResponse, Pagination};
use shared::validation::file_extension;

const DISPLAY_FILE_COLUMNS: &str = "id, title, file_type, file_path, original_filename, \
     page_count, created_by, created_at, updated_at";

#[derive(Clone)]
pub struct DisplayFileService {
    db: PgPool,
    storage: Storage,
}

/// Parsed multipart upload for a display file
#[derive(Debug)]
pub struct DisplayFileUpload {
    pub title: String,
    pub file_type: DisplayFileType,
    pub page_count: Option<i32>,
    pub original_filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DisplayFileFilter {
    pub file_type: Option<DisplayFileType>,
    pub title: Option<String>,
}

/// Image list of an image group
#[derive(Debug, Serialize)]
pub struct DisplayImages {
    pub id: Uuid,
    pub title: String,
    pub images: Vec<String>,
    pub urls: Vec<String>,
}

impl DisplayFileService {
    pub fn new(db: PgPool, storage: Storage) -> Self {
        Self { db, storage }
    }

    pub async fn upload(&self, upload: DisplayFileUpload, created_by: &str) -> AppResult<DisplayFile> {
        let title = upload.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("title", "Title is required", "标题不能为空"));
        }
        if upload.data.is_empty() {
            return Err(AppError::validation("file", "File is empty", "文件为空"));
        }
        let ext = file_extension(&upload.original_filename).unwrap_or_default();
        upload
            .file_type
            .accepts_extension(&ext)
            .map_err(|msg| AppError::validation("file", msg, "文件类型与展示类型不符"))?;
        if matches!(upload.page_count, Some(n) if n < 0) {
            return Err(AppError::validation("page_count", "Page count must be non-negative", "页数不能为负"));
        }

        let stored = self
            .storage
            .save(Some(DISPLAY_DIR), &upload.original_filename, &upload.data)
            .await?;

        let inserted = sqlx::query_as::<_, DisplayFile>(&format!(
            r#"
            INSERT INTO display_files (title, file_type, file_path, original_filename, page_count, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            DISPLAY_FILE_COLUMNS
        ))
        .bind(title)
        .bind(upload.file_type)
        .bind(&stored.path)
        .bind(&upload.original_filename)
        .bind(upload.page_count)
        .bind(created_by)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(file) => {
                tracing::info!(id = %file.id, path = %file.file_path, "Display file uploaded");
                Ok(file)
            }
            Err(e) => {
                // Drop the orphaned upload
                if let Err(cleanup) = self.storage.remove_with_extracted(&stored.path).await {
                    tracing::warn!(error = %cleanup, path = %stored.path, "Failed to remove orphaned upload");
                }
                Err(e.into())
            }
        }
    }

    pub async fn list(
        &self,
        filter: &DisplayFileFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<DisplayFile>> {
        const WHERE: &str = r#"
            WHERE ($1::display_file_type IS NULL OR file_type = $1)
              AND ($2::text IS NULL OR title ILIKE '%' || $2 || '%')
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM display_files {}", WHERE))
            .bind(filter.file_type)
            .bind(&filter.title)
            .fetch_one(&self.db)
            .await?;

        let files = sqlx::query_as::<_, DisplayFile>(&format!(
            "SELECT {} FROM display_files {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            DISPLAY_FILE_COLUMNS, WHERE
        ))
        .bind(filter.file_type)
        .bind(&filter.title)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(files, pagination, total))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<DisplayFile> {
        sqlx::query_as::<_, DisplayFile>(&format!(
            "SELECT {} FROM display_files WHERE id = $1",
            DISPLAY_FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Display file".to_string()))
    }

    /// Images of an image group; archives are extracted on first request
    pub async fn images(&self, id: Uuid) -> AppResult<DisplayImages> {
        let file = self.get(id).await?;
        if file.file_type != DisplayFileType::ImageGroup {
            return Err(AppError::validation(
                "file_type",
                "Only image groups have an image list",
                "只有图片组可以获取图片列表",
            ));
        }

        let images = self.storage.image_group(&file.file_path).await?;
        let urls = images
            .iter()
            .map(|p| format!("{}/{}", crate::services::storage::ASSETS_URL_PREFIX, p))
            .collect();

        Ok(DisplayImages {
            id: file.id,
            title: file.title,
            images,
            urls,
        })
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let file = self.get(id).await?;

        sqlx::query("DELETE FROM display_files WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        // The record is gone either way; a leftover file is only logged
        if let Err(e) = self.storage.remove_with_extracted(&file.file_path).await {
            tracing::warn!(error = %e, path = %file.file_path, "Failed to remove display file from disk");
        }

        tracing::info!(
            id = %id,
            path = %to_slash_path(Path::new(&file.file_path)),
            "Display file deleted"
        );
        Ok(())
    }
}
