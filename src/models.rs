use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::AppResult;

/// An in-memory file: the unit handed to the compressor and the uploader.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileArtifact {
    pub name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Bytes,
    pub last_modified: DateTime<Utc>,
}

impl FileArtifact {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
            last_modified: Utc::now(),
        }
    }

    /// Read a file from disk, declaring its media type from the extension.
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let last_modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        log::debug!("Read {} ({} bytes)", path.display(), contents.len());

        Ok(Self {
            name,
            mime_type: mime_type_for_path(path).to_string(),
            bytes: Bytes::from(contents),
            last_modified,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Success,
    Error,
    Canceled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadStatus::Pending)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Success => "success",
            UploadStatus::Error => "error",
            UploadStatus::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: UploadId,
    pub name: String,
    pub file: FileArtifact,
    pub original_size_in_bytes: u64,
    pub compressed_size_in_bytes: Option<u64>,
    pub uploaded_size_in_bytes: u64,
    #[serde(skip)]
    pub cancel: CancellationToken,
    pub status: UploadStatus,
    pub remote_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(file: FileArtifact) -> Self {
        Self {
            id: UploadId::new(),
            name: file.name.clone(),
            original_size_in_bytes: file.size(),
            file,
            compressed_size_in_bytes: None,
            uploaded_size_in_bytes: 0,
            cancel: CancellationToken::new(),
            status: UploadStatus::Pending,
            remote_url: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Compressed size once known, else the original size.
    pub fn effective_size_in_bytes(&self) -> u64 {
        self.compressed_size_in_bytes
            .unwrap_or(self.original_size_in_bytes)
    }

    /// Bytes counted toward progress. Nothing counts until compression has finished.
    pub fn effective_uploaded_in_bytes(&self) -> u64 {
        if self.compressed_size_in_bytes.is_some() {
            self.uploaded_size_in_bytes
        } else {
            0
        }
    }

    /// Merge a patch into this record, returning whether anything changed.
    ///
    /// Terminal records are frozen, uploaded bytes only grow and the
    /// compressed size is written once.
    pub fn apply(&mut self, patch: UploadPatch) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let mut changed = false;

        if let Some(size) = patch.compressed_size_in_bytes {
            if self.compressed_size_in_bytes.is_none() {
                self.compressed_size_in_bytes = Some(size);
                changed = true;
            }
        }

        if let Some(uploaded) = patch.uploaded_size_in_bytes {
            if uploaded > self.uploaded_size_in_bytes {
                self.uploaded_size_in_bytes = uploaded;
                changed = true;
            }
        }

        if let Some(url) = patch.remote_url {
            self.remote_url = Some(url);
            changed = true;
        }

        if let Some(error) = patch.error {
            self.error = Some(error);
            changed = true;
        }

        if let Some(status) = patch.status {
            if status != self.status {
                self.status = status;
                changed = true;
            }
        }

        changed
    }
}

/// Partial update merged into an `Upload` by the registry's mutator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPatch {
    pub status: Option<UploadStatus>,
    pub compressed_size_in_bytes: Option<u64>,
    pub uploaded_size_in_bytes: Option<u64>,
    pub remote_url: Option<String>,
    pub error: Option<String>,
}

impl UploadPatch {
    pub fn compressed(size: u64) -> Self {
        Self {
            compressed_size_in_bytes: Some(size),
            ..Default::default()
        }
    }

    pub fn uploaded(bytes: u64) -> Self {
        Self {
            uploaded_size_in_bytes: Some(bytes),
            ..Default::default()
        }
    }

    pub fn succeeded(remote_url: String) -> Self {
        Self {
            status: Some(UploadStatus::Success),
            remote_url: Some(remote_url),
            ..Default::default()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: Some(UploadStatus::Error),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: Some(UploadStatus::Canceled),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateProgress {
    pub is_there_any_pending_uploads: bool,
    pub global_percentage: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub error: usize,
    pub canceled: usize,
}

impl UploadSummary {
    pub fn record(&mut self, status: UploadStatus) {
        self.total += 1;
        match status {
            UploadStatus::Pending => self.pending += 1,
            UploadStatus::Success => self.success += 1,
            UploadStatus::Error => self.error += 1,
            UploadStatus::Canceled => self.canceled += 1,
        }
    }
}

/// Rounded percentage clamped to 0..=100; a zero total counts as 0%.
pub fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = (done as f64 * 100.0 / total as f64).round();
    value.clamp(0.0, 100.0) as u8
}
