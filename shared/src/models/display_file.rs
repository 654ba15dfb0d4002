//! Display files shown on the office screens (image galleries and PDFs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::IMAGE_EXTENSIONS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DisplayFile {
    pub id: Uuid,
    pub title: String,
    pub file_type: DisplayFileType,
    /// Path relative to the assets directory
    pub file_path: String,
    pub original_filename: String,
    pub page_count: Option<i32>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "display_file_type", rename_all = "snake_case")
)]
pub enum DisplayFileType {
    /// A single image or a zip archive of images
    ImageGroup,
    Pdf,
}

impl std::str::FromStr for DisplayFileType {
    type Err = crate::types::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "image_group" => Ok(DisplayFileType::ImageGroup),
            "pdf" => Ok(DisplayFileType::Pdf),
            other => Err(crate::types::ParseEnumError::new("display_file_type", other)),
        }
    }
}

impl DisplayFileType {
    /// Check that an upload's extension fits this display type
    pub fn accepts_extension(&self, ext: &str) -> Result<(), &'static str> {
        let ext = ext.to_ascii_lowercase();
        match self {
            DisplayFileType::Pdf if ext == "pdf" => Ok(()),
            DisplayFileType::Pdf => Err("PDF display files must be .pdf"),
            DisplayFileType::ImageGroup
                if ext == "zip" || IMAGE_EXTENSIONS.contains(&ext.as_str()) =>
            {
                Ok(())
            }
            DisplayFileType::ImageGroup => {
                Err("Image groups must be an image or a .zip of images")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_rules() {
        assert!(DisplayFileType::Pdf.accepts_extension("PDF").is_ok());
        assert!(DisplayFileType::Pdf.accepts_extension("png").is_err());
        assert!(DisplayFileType::ImageGroup.accepts_extension("jpg").is_ok());
        assert!(DisplayFileType::ImageGroup.accepts_extension("zip").is_ok());
        assert!(DisplayFileType::ImageGroup.accepts_extension("pdf").is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "image_group".parse::<DisplayFileType>().unwrap(),
            DisplayFileType::ImageGroup
        );
        assert!("waterfall".parse::<DisplayFileType>().is_err());
    }
}
