//! File storage under the assets directory
//!
//! Layout:
//! - `TempFiles/` new uploads
//! - `DeleteFiles/` soft-deleted files
//! - `DisplayFiles/` display assets
//! - `Chunks/{file_identifier}/` partial chunked uploads

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::validation::{is_image_filename, sanitize_filename, split_extension};

pub const TEMP_DIR: &str = "TempFiles";
pub const DELETE_DIR: &str = "DeleteFiles";
pub const DISPLAY_DIR: &str = "DisplayFiles";
pub const CHUNK_DIR: &str = "Chunks";

/// Upper bound on `total_chunks` for one chunked upload
pub const MAX_TOTAL_CHUNKS: u32 = 10_000;

/// URL prefix the assets directory is served under
pub const ASSETS_URL_PREFIX: &str = "/assets";

/// A file written to storage
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the assets directory, `/`-separated
    pub path: String,
    pub url: String,
    pub size: u64,
    pub original_name: String,
}

/// Progress of a chunked upload
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    Partial { received: u32, total: u32 },
    Complete { file: StoredFile },
}

/// One piece of a chunked upload
#[derive(Debug)]
pub struct ChunkUpload<'a> {
    pub file_identifier: &'a str,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub filename: &'a str,
    pub data: &'a [u8],
}

/// Validate a client-supplied relative path
///
/// Absolute paths, drive prefixes and `..` components are rejected.
pub fn safe_relative_path(raw: &str) -> AppResult<PathBuf> {
    let normalized = raw.trim().replace('\\', "/");
    let unsafe_path = || {
        AppError::validation(
            "path",
            "Path must be relative to the assets directory",
            "文件路径无效",
        )
    };

    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains(':') {
        return Err(unsafe_path());
    }

    let mut clean = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path())
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(unsafe_path());
    }
    Ok(clean)
}

/// `/`-separated form of a relative path
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Stored name for an upload: random hex prefix plus the sanitized name
pub fn stored_file_name(original: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), sanitize_filename(original))
}

/// Name a file gets when soft-deleted: `_YYYYMMDDHHMMSS` before the extension
pub fn deleted_file_name(filename: &str, at: DateTime<Local>) -> String {
    let (stem, ext) = split_extension(filename);
    format!("{}_{}{}", stem, at.format("%Y%m%d%H%M%S"), ext)
}

/// Number of distinct chunk files below `total` in a chunk directory
async fn count_chunks(chunk_dir: &Path, total: u32) -> AppResult<u32> {
    let mut received = 0;
    let mut entries = tokio::fs::read_dir(chunk_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_chunk = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
            .is_some_and(|index| index < total);
        if is_chunk {
            received += 1;
        }
    }
    Ok(received)
}

fn validate_identifier(identifier: &str) -> AppResult<()> {
    let valid = !identifier.is_empty()
        && identifier.len() <= 128
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::validation(
            "file_identifier",
            "File identifier may only contain letters, digits, '-' and '_'",
            "文件标识无效",
        ))
    }
}

/// Files under the assets root
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a validated relative path
    pub fn resolve(&self, relative: &str) -> AppResult<PathBuf> {
        Ok(self.root.join(safe_relative_path(relative)?))
    }

    fn stored(&self, relative: &Path, size: u64, original_name: &str) -> StoredFile {
        let path = to_slash_path(relative);
        StoredFile {
            url: format!("{}/{}", ASSETS_URL_PREFIX, path),
            path,
            size,
            original_name: original_name.to_string(),
        }
    }

    /// Save uploaded bytes into `target_dir` (default `TempFiles`)
    pub async fn save(&self, target_dir: Option<&str>, original_name: &str, data: &[u8]) -> AppResult<StoredFile> {
        let dir = match target_dir.map(str::trim).filter(|d| !d.is_empty()) {
            Some(dir) => safe_relative_path(dir)?,
            None => PathBuf::from(TEMP_DIR),
        };
        let relative = dir.join(stored_file_name(original_name));

        let absolute = self.root.join(&relative);
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, data).await?;

        tracing::debug!(path = %absolute.display(), size = data.len(), "File stored");
        Ok(self.stored(&relative, data.len() as u64, original_name))
    }

    /// Move a stored file into another directory, keeping its name
    pub async fn move_file(&self, source: &str, target_dir: &str) -> AppResult<StoredFile> {
        let source_rel = safe_relative_path(source)?;
        let target_rel = safe_relative_path(target_dir)?;
        let file_name = source_rel
            .file_name()
            .ok_or_else(|| AppError::validation("source_path", "Source is not a file", "源文件无效"))?;
        let dest_rel = target_rel.join(file_name);

        let source_abs = self.root.join(&source_rel);
        if !tokio::fs::try_exists(&source_abs).await? {
            return Err(AppError::NotFound(format!("File {}", to_slash_path(&source_rel))));
        }
        let dest_abs = self.root.join(&dest_rel);
        tokio::fs::create_dir_all(self.root.join(&target_rel)).await?;
        tokio::fs::rename(&source_abs, &dest_abs).await?;

        let size = tokio::fs::metadata(&dest_abs).await?.len();
        Ok(self.stored(&dest_rel, size, &file_name.to_string_lossy()))
    }

    /// Move a file into `DeleteFiles/` with a timestamp suffix
    pub async fn soft_delete(&self, relative: &str) -> AppResult<StoredFile> {
        let source_rel = safe_relative_path(relative)?;
        let source_abs = self.root.join(&source_rel);
        if !tokio::fs::try_exists(&source_abs).await? {
            return Err(AppError::NotFound(format!("File {}", to_slash_path(&source_rel))));
        }

        let file_name = source_rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let dest_rel = Path::new(DELETE_DIR).join(deleted_file_name(&file_name, Local::now()));
        let dest_abs = self.root.join(&dest_rel);

        tokio::fs::create_dir_all(self.root.join(DELETE_DIR)).await?;
        tokio::fs::rename(&source_abs, &dest_abs).await?;

        tracing::info!(from = %to_slash_path(&source_rel), to = %to_slash_path(&dest_rel), "File deleted");
        let size = tokio::fs::metadata(&dest_abs).await?.len();
        Ok(self.stored(&dest_rel, size, &file_name))
    }

    /// Store one chunk; merge into `TempFiles/` once every chunk is present
    pub async fn store_chunk(&self, chunk: ChunkUpload<'_>) -> AppResult<ChunkStatus> {
        validate_identifier(chunk.file_identifier)?;
        if chunk.total_chunks == 0 || chunk.total_chunks > MAX_TOTAL_CHUNKS {
            return Err(AppError::validation(
                "total_chunks",
                &format!("total_chunks must be between 1 and {}", MAX_TOTAL_CHUNKS),
                "分片总数无效",
            ));
        }
        if chunk.chunk_index >= chunk.total_chunks {
            return Err(AppError::validation(
                "chunk_index",
                "Chunk index must be below total_chunks",
                "分片序号无效",
            ));
        }

        let chunk_dir = self.root.join(CHUNK_DIR).join(chunk.file_identifier);
        tokio::fs::create_dir_all(&chunk_dir).await?;
        tokio::fs::write(chunk_dir.join(chunk.chunk_index.to_string()), chunk.data).await?;

        let received = count_chunks(&chunk_dir, chunk.total_chunks).await?;
        if received < chunk.total_chunks {
            return Ok(ChunkStatus::Partial {
                received,
                total: chunk.total_chunks,
            });
        }

        let relative = Path::new(TEMP_DIR).join(stored_file_name(chunk.filename));
        let absolute = self.root.join(&relative);
        tokio::fs::create_dir_all(self.root.join(TEMP_DIR)).await?;

        let mut out = tokio::fs::File::create(&absolute).await?;
        let mut size = 0u64;
        for index in 0..chunk.total_chunks {
            let part = tokio::fs::read(chunk_dir.join(index.to_string())).await?;
            size += part.len() as u64;
            out.write_all(&part).await?;
        }
        out.flush().await?;
        drop(out);

        tokio::fs::remove_dir_all(&chunk_dir).await?;

        tracing::info!(
            identifier = chunk.file_identifier,
            chunks = chunk.total_chunks,
            size,
            "Chunked upload merged"
        );
        Ok(ChunkStatus::Complete {
            file: self.stored(&relative, size, chunk.filename),
        })
    }

    /// Remove a file and, if present, its extracted image directory
    pub async fn remove_with_extracted(&self, relative: &str) -> AppResult<()> {
        let absolute = self.resolve(relative)?;
        if tokio::fs::try_exists(&absolute).await? {
            tokio::fs::remove_file(&absolute).await?;
        }
        let extracted = extracted_dir_for(&absolute);
        if tokio::fs::try_exists(&extracted).await? {
            tokio::fs::remove_dir_all(&extracted).await?;
        }
        Ok(())
    }

    /// Image paths for an image group, extracting a zip archive on first use
    pub async fn image_group(&self, relative: &str) -> AppResult<Vec<String>> {
        let source_rel = safe_relative_path(relative)?;
        let absolute = self.root.join(&source_rel);
        if !tokio::fs::try_exists(&absolute).await? {
            return Err(AppError::NotFound(format!("File {}", to_slash_path(&source_rel))));
        }

        let file_name = source_rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_image_filename(&file_name) {
            return Ok(vec![to_slash_path(&source_rel)]);
        }

        let extracted = extracted_dir_for(&absolute);
        if !tokio::fs::try_exists(&extracted).await? {
            let archive = absolute.clone();
            let target = extracted.clone();
            tokio::task::spawn_blocking(move || extract_images(&archive, &target))
                .await
                .map_err(|e| AppError::Internal(format!("Extraction task failed: {}", e)))??;
        }

        let extracted_rel = extracted_dir_for(&source_rel);
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&extracted).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_file() && is_image_filename(&name) {
                names.push(name);
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| to_slash_path(&extracted_rel.join(name)))
            .collect())
    }
}

/// `{stem}_images/` next to an archive
pub fn extracted_dir_for(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    archive.with_file_name(format!("{}_images", stem))
}

/// Extract the image entries of a zip archive into a flat directory
pub fn extract_images(archive: &Path, target: &Path) -> AppResult<usize> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| AppError::validation("file", &format!("Invalid zip archive: {}", e), "压缩包无效"))?;

    // Staged, then renamed into place once complete
    let staging = target.with_extension("partial");
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let mut count = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| AppError::StorageError(format!("Corrupt zip entry: {}", e)))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            continue;
        };
        if name.starts_with('.') || !is_image_filename(&name) {
            continue;
        }

        let mut out = std::fs::File::create(staging.join(sanitize_filename(&name)))?;
        std::io::copy(&mut entry, &mut out)?;
        count += 1;
    }

    std::fs::rename(&staging, target)?;
    tracing::info!(archive = %archive.display(), images = count, "Image archive extracted");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_safe_relative_path_rejects_escapes() {
        assert!(safe_relative_path("../etc/passwd").is_err());
        assert!(safe_relative_path("TempFiles/../../x").is_err());
        assert!(safe_relative_path("/etc/passwd").is_err());
        assert!(safe_relative_path("C:\\Windows").is_err());
        assert!(safe_relative_path("..\\secret").is_err());
        assert!(safe_relative_path("").is_err());
        assert!(safe_relative_path("./").is_err());
    }

    #[test]
    fn test_safe_relative_path_normalizes() {
        let p = safe_relative_path("TempFiles\\./a.png").unwrap();
        assert_eq!(to_slash_path(&p), "TempFiles/a.png");
    }

    #[test]
    fn test_deleted_file_name() {
        let at = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(deleted_file_name("report.pdf", at), "report_20250102030405.pdf");
        assert_eq!(deleted_file_name("README", at), "README_20250102030405");
    }

    #[test]
    fn test_stored_file_name_prefix() {
        let name = stored_file_name("a<b>.png");
        let (prefix, rest) = name.split_at(32);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "_a_b_.png");
    }

    #[test]
    fn test_extracted_dir_for() {
        assert_eq!(
            extracted_dir_for(Path::new("DisplayFiles/abc_brochure.zip")),
            PathBuf::from("DisplayFiles/abc_brochure_images")
        );
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("abc-123_X").is_ok());
        assert!(validate_identifier("../x").is_err());
        assert!(validate_identifier("").is_err());
    }
}
