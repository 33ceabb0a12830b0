use regex::Regex;
use reqwest::Url;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

/// Largest file accepted for submission (100MB)
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

pub struct InputValidator;

impl InputValidator {
    pub fn validate_endpoint_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("upload_endpoint", "Endpoint URL cannot be empty"));
        }

        let parsed = Url::parse(trimmed)
            .map_err(|e| AppError::validation("upload_endpoint", &e.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::validation(
                "upload_endpoint",
                "Endpoint must use http or https",
            ));
        }

        if parsed.host_str().is_none() {
            return Err(AppError::validation("upload_endpoint", "Endpoint must have a host"));
        }

        Ok(())
    }

    pub fn validate_file_path(path: &Path) -> AppResult<()> {
        if path.as_os_str().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        if !path.exists() {
            return Err(AppError::validation(
                "file_path",
                &format!("File not found: {}", path.display()),
            ));
        }

        if !path.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        let size = FileSystemGuard::get_file_size(path)?;
        if size > MAX_FILE_SIZE {
            return Err(AppError::validation(
                "file_path",
                &format!("File too large: {} (maximum is 100MB)", path.display()),
            ));
        }

        Ok(())
    }

    pub fn validate_compression_settings(max_width: u32, max_height: u32, quality: f32) -> AppResult<()> {
        if max_width == 0 {
            return Err(AppError::validation("max_width", "Must be greater than 0"));
        }

        if max_height == 0 {
            return Err(AppError::validation("max_height", "Must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&quality) {
            return Err(AppError::validation("quality", "Must be between 0 and 1"));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();
        let unsafe_chars = UNSAFE_CHARS.get_or_init(|| {
            Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static filename pattern is valid")
        });
        let sanitized = unsafe_chars.replace_all(filename.trim(), "_");

        // Limit length
        if sanitized.len() > 255 {
            let mut end = 252;
            while !sanitized.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &sanitized[..end])
        } else {
            sanitized.to_string()
        }
    }
}

// File system utilities
pub struct FileSystemGuard;

impl FileSystemGuard {
    pub fn get_file_size(path: &Path) -> AppResult<u64> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint_url() {
        assert!(InputValidator::validate_endpoint_url("http://localhost:3333/uploads").is_ok());
        assert!(InputValidator::validate_endpoint_url("https://cdn.example.com/uploads").is_ok());
        assert!(InputValidator::validate_endpoint_url("").is_err());
        assert!(InputValidator::validate_endpoint_url("ftp://example.com/uploads").is_err());
        assert!(InputValidator::validate_endpoint_url("not a url").is_err());
    }

    #[test]
    fn test_validate_compression_settings() {
        assert!(InputValidator::validate_compression_settings(1000, 1000, 0.8).is_ok());
        assert!(InputValidator::validate_compression_settings(1000, 1000, 0.0).is_ok());
        assert!(InputValidator::validate_compression_settings(0, 1000, 0.8).is_err());
        assert!(InputValidator::validate_compression_settings(1000, 0, 0.8).is_err());
        assert!(InputValidator::validate_compression_settings(1000, 1000, 1.5).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        let sanitized = InputValidator::sanitize_filename("  ../../etc/passwd<script>.png ");
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.contains('<'));
        assert!(!sanitized.contains('>'));
        assert!(sanitized.ends_with(".png"));

        let long_name = "a".repeat(300);
        assert_eq!(InputValidator::sanitize_filename(&long_name).len(), 255);
    }

    #[test]
    fn test_validate_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("photo.png");
        std::fs::write(&file_path, b"data").unwrap();

        assert!(InputValidator::validate_file_path(&file_path).is_ok());
        assert!(InputValidator::validate_file_path(dir.path()).is_err());
        assert!(InputValidator::validate_file_path(&dir.path().join("missing.png")).is_err());
        assert!(InputValidator::validate_file_path(Path::new("")).is_err());
    }
}
