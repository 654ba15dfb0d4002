//! Validation utilities for the OA platform

use rust_decimal::Decimal;

use crate::models::is_temporary_emp_id;

// ============================================================================
// Accounts
// ============================================================================

/// Validate an employee number
pub fn validate_emp_id(emp_id: &str) -> Result<(), &'static str> {
    let len = emp_id.chars().count();
    if len == 0 || len > 20 {
        return Err("Employee ID must be 1-20 characters");
    }
    if emp_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Employee ID cannot contain whitespace");
    }
    if is_temporary_emp_id(emp_id) {
        return Err("Employee ID prefix TEMP_ is reserved for unknown devices");
    }
    Ok(())
}

/// Employee numbers are compared without regard to case
pub fn same_emp_id(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Validate email format
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if validator::validate_email(email) {
        Ok(())
    } else {
        Err("Invalid email format")
    }
}

// ============================================================================
// Money and dates
// ============================================================================

/// Validate that an amount is not negative
pub fn validate_non_negative(amount: Decimal) -> Result<(), &'static str> {
    if amount < Decimal::ZERO {
        return Err("Amount cannot be negative");
    }
    Ok(())
}

/// Validate a bookkeeping year
pub fn validate_year(year: i32) -> Result<(), &'static str> {
    if !(2000..=2100).contains(&year) {
        return Err("Year must be between 2000 and 2100");
    }
    Ok(())
}

// ============================================================================
// Files
// ============================================================================

/// Extensions accepted by the general upload endpoint
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "pdf", "doc", "docx", "xls", "xlsx", "mp4", "mov",
];

/// Image extensions
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

const MAX_STEM_CHARS: usize = 100;
const MAX_EXTENSION_CHARS: usize = 10;

/// Split a filename into stem and extension (including the dot)
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

/// Lower-case extension without the dot
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = split_extension(filename);
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Check a filename against the upload allow-list, returning its extension
pub fn validate_upload_extension(filename: &str) -> Result<String, &'static str> {
    let ext = file_extension(filename).ok_or("File has no extension")?;
    if ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err("File type is not allowed")
    }
}

pub fn is_image_filename(filename: &str) -> bool {
    file_extension(filename).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Make a client filename safe to store on any filesystem
///
/// Reserved characters and control characters become `_`, directory parts are
/// dropped, the stem is capped at 100 characters and the extension at 10.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);

    let replaced: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim().trim_start_matches('.').trim_start();
    let (stem, ext) = split_extension(trimmed);

    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    let ext: String = ext.chars().take(MAX_EXTENSION_CHARS).collect();

    if stem.trim().is_empty() {
        format!("file{}", ext)
    } else {
        format!("{}{}", stem, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emp_id_comparison_ignores_case() {
        assert!(same_emp_id("E1001", "e1001"));
        assert!(same_emp_id(" e1001", "E1001 "));
        assert!(!same_emp_id("E1001", "E1002"));
    }

    #[test]
    fn test_emp_id_rules() {
        assert!(validate_emp_id("E1001").is_ok());
        assert!(validate_emp_id("").is_err());
        assert!(validate_emp_id("has space").is_err());
        assert!(validate_emp_id("TEMP_ABCD").is_err());
        assert!(validate_emp_id(&"x".repeat(21)).is_err());
        assert!(validate_emp_id("temp_abcd").is_err());
    }

    #[test]
    fn test_email() {
        assert!(validate_email("buyer@example.com").is_ok());
        assert!(validate_email("not-an-email").is_err());
    }

    #[test]
    fn test_non_negative_and_year() {
        assert!(validate_non_negative(Decimal::ZERO).is_ok());
        assert!(validate_non_negative(Decimal::new(-1, 2)).is_err());
        assert!(validate_year(2025).is_ok());
        assert!(validate_year(1999).is_err());
    }

    #[test]
    fn test_extension_helpers() {
        assert_eq!(split_extension("report.final.PDF"), ("report.final", ".PDF"));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(file_extension("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(validate_upload_extension("a.xlsx"), Ok("xlsx".to_string()));
        assert!(validate_upload_extension("a.exe").is_err());
        assert!(validate_upload_extension("noext").is_err());
        assert!(is_image_filename("x.png"));
        assert!(!is_image_filename("x.pdf"));
    }

    #[test]
    fn test_sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a<b>c:d|e?.png"), "a_b_c_d_e_.png");
        assert_eq!(sanitize_filename("..\\..\\etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("合同 2024.pdf"), "合同 2024.pdf");
        assert_eq!(sanitize_filename("...png"), "png");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn test_sanitize_limits_length() {
        let long = format!("{}.{}", "n".repeat(150), "e".repeat(20));
        let out = sanitize_filename(&long);
        let (stem, ext) = split_extension(&out);
        assert_eq!(stem.chars().count(), 100);
        assert_eq!(ext.chars().count(), 10);
    }
}
