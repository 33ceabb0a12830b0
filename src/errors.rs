use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Image format not supported: {mime_type}")]
    UnsupportedFormat { mime_type: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Transfer failed: {reason}")]
    Transfer { reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upload canceled during {phase}")]
    Canceled { phase: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn unsupported_format(mime_type: &str) -> Self {
        Self::UnsupportedFormat {
            mime_type: mime_type.to_string(),
        }
    }

    pub fn codec(message: &str) -> Self {
        Self::Codec(message.to_string())
    }

    pub fn transfer(reason: impl Into<String>) -> Self {
        Self::Transfer {
            reason: reason.into(),
        }
    }

    pub fn canceled(phase: &str) -> Self {
        Self::Canceled {
            phase: phase.to_string(),
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// User-initiated abort. Never reported as a failed upload.
    pub fn is_canceled(&self) -> bool {
        matches!(self, AppError::Canceled { .. })
    }

    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            AppError::UnsupportedFormat { .. } | AppError::Codec(_) | AppError::Image(_)
        )
    }

    pub fn is_transfer_error(&self) -> bool {
        matches!(self, AppError::Transfer { .. } | AppError::Network(_))
    }
}
