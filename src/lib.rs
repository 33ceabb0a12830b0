pub mod config;
pub mod errors;
pub mod image_processor;
pub mod models;
pub mod security;
pub mod uploader;

pub use errors::{AppError, AppResult};
pub use models::{AggregateProgress, FileArtifact, Upload, UploadId, UploadStatus};
pub use uploader::UploadRegistry;
