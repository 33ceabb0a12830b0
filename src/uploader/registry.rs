use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::image_processor::ImageCompressor;
use crate::models::{
    AggregateProgress, FileArtifact, Upload, UploadId, UploadPatch, UploadStatus, UploadSummary,
};

use super::progress_tracker::{compute_aggregate_progress, summarize, ProgressSubscription};
use super::storage_client::{ProgressCallback, StorageUploader};

/// Owns every upload record and drives each one through
/// compress -> transfer -> terminal status.
#[derive(Clone)]
pub struct UploadRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    uploads: Mutex<UploadTable>,
    changes: watch::Sender<u64>,
    compressor: Arc<dyn ImageCompressor>,
    uploader: Arc<dyn StorageUploader>,
}

impl UploadRegistry {
    pub fn new<C, U>(compressor: C, uploader: U) -> Self
    where
        C: ImageCompressor + 'static,
        U: StorageUploader + 'static,
    {
        Self::with_shared(Arc::new(compressor), Arc::new(uploader))
    }

    pub fn with_shared(
        compressor: Arc<dyn ImageCompressor>,
        uploader: Arc<dyn StorageUploader>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                uploads: Mutex::new(UploadTable::default()),
                changes,
                compressor,
                uploader,
            }),
        }
    }

    /// Register each file as a pending upload and start its pipeline.
    ///
    /// Returns without waiting on any upload. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, files: Vec<FileArtifact>) -> Vec<UploadId> {
        let mut ids = Vec::with_capacity(files.len());

        for file in files {
            let upload = Upload::new(file);
            let id = upload.id;

            log::info!(
                "Queued upload {} for {} ({} bytes)",
                id,
                upload.name,
                upload.original_size_in_bytes
            );

            if !self.inner.insert(upload) {
                continue;
            }
            ids.push(id);

            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                process_upload(inner, id).await;
            });
        }

        ids
    }

    /// Signal cancellation for one upload. Returns whether a live handle was
    /// triggered.
    pub fn cancel(&self, id: UploadId) -> bool {
        let token = self.inner.read(&id, "cancel", |upload| {
            if upload.status.is_terminal() || upload.cancel.is_cancelled() {
                None
            } else {
                Some(upload.cancel.clone())
            }
        });

        match token.flatten() {
            Some(token) => {
                token.cancel();
                log::info!("Cancellation requested for upload {}", id);
                true
            }
            None => {
                log::debug!("Ignoring cancel for upload {} (absent or not live)", id);
                false
            }
        }
    }

    pub fn cancel_all(&self) -> usize {
        let ids: Vec<UploadId> = self
            .snapshot()
            .into_iter()
            .filter(|upload| upload.status == UploadStatus::Pending)
            .map(|upload| upload.id)
            .collect();

        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn aggregate_progress(&self) -> AggregateProgress {
        self.inner
            .with_uploads("aggregate progress", |uploads| {
                compute_aggregate_progress(uploads.records.values())
            })
            .unwrap_or(AggregateProgress {
                is_there_any_pending_uploads: false,
                global_percentage: 100,
            })
    }

    pub fn summary(&self) -> UploadSummary {
        self.inner
            .with_uploads("summary", |uploads| summarize(uploads.records.values()))
            .unwrap_or_default()
    }

    pub fn get(&self, id: UploadId) -> Option<Upload> {
        self.inner.read(&id, "get", Upload::clone)
    }

    /// All uploads in submission order.
    pub fn snapshot(&self) -> Vec<Upload> {
        self.inner
            .with_uploads("snapshot", |uploads| {
                uploads
                    .order
                    .iter()
                    .filter_map(|id| uploads.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .with_uploads("len", |uploads| uploads.records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription::new(self.clone(), self.inner.changes.subscribe())
    }

    pub async fn wait_until_settled(&self) -> AggregateProgress {
        self.subscribe().wait_until_settled().await
    }

    /// Merge a partial update into one record. No-op for absent or terminal
    /// records.
    pub fn update(&self, id: UploadId, patch: UploadPatch) -> bool {
        self.inner.update(&id, patch)
    }
}

/// Records keyed by id, plus the order they were submitted in.
#[derive(Default)]
struct UploadTable {
    records: HashMap<UploadId, Upload>,
    order: Vec<UploadId>,
}

impl RegistryInner {
    fn with_uploads<F, R>(&self, operation: &str, f: F) -> Option<R>
    where
        F: FnOnce(&UploadTable) -> R,
    {
        match self.uploads.lock() {
            Ok(uploads) => Some(f(&uploads)),
            Err(e) => {
                log::error!(
                    "Failed to acquire registry lock for {} (non-critical): {}",
                    operation,
                    e
                );
                None
            }
        }
    }

    fn read<F, R>(&self, id: &UploadId, operation: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Upload) -> R,
    {
        self.with_uploads(operation, |uploads| uploads.records.get(id).map(f))
            .flatten()
    }

    fn insert(&self, upload: Upload) -> bool {
        let inserted = match self.uploads.lock() {
            Ok(mut uploads) => {
                if uploads.records.contains_key(&upload.id) {
                    log::error!("Duplicate upload id {}", upload.id);
                    false
                } else {
                    uploads.order.push(upload.id);
                    uploads.records.insert(upload.id, upload);
                    true
                }
            }
            Err(e) => {
                log::error!("Failed to acquire registry lock for insert (non-critical): {}", e);
                false
            }
        };

        if inserted {
            self.notify();
        }
        inserted
    }

    /// Read-merge-write under the lock: the stored record is replaced whole,
    /// never edited in place.
    fn update(&self, id: &UploadId, patch: UploadPatch) -> bool {
        let written = match self.uploads.lock() {
            Ok(mut uploads) => match uploads.records.get(id).cloned() {
                Some(mut next) => {
                    if next.apply(patch) {
                        uploads.records.insert(*id, next);
                        true
                    } else {
                        if next.status.is_terminal() {
                            log::debug!("Upload {} is {}, ignoring update", id, next.status);
                        }
                        false
                    }
                }
                None => {
                    log::warn!("Upload {} not found for update", id);
                    false
                }
            },
            Err(e) => {
                log::error!(
                    "Failed to acquire registry lock for update of {} (non-critical): {}",
                    id,
                    e
                );
                false
            }
        };

        if written {
            self.notify();
        }
        written
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }
}

/// Per-upload pipeline. Every failure ends in a terminal status on the record.
async fn process_upload(inner: Arc<RegistryInner>, id: UploadId) {
    let Some((file, cancel)) = inner.read(&id, "pipeline start", |upload| {
        (upload.file.clone(), upload.cancel.clone())
    }) else {
        log::debug!("Upload {} no longer registered, skipping", id);
        return;
    };

    log::debug!("Compressing {} for upload {}", file.name, id);

    let compressed = match inner.compressor.compress(&file).await {
        Ok(compressed) => compressed,
        Err(e) => {
            log::warn!("Compression failed for {} ({}): {}", file.name, id, e);
            inner.update(&id, UploadPatch::failed(e.to_string()));
            return;
        }
    };

    inner.update(&id, UploadPatch::compressed(compressed.size()));

    let progress_inner = Arc::clone(&inner);
    let on_progress: ProgressCallback = Arc::new(move |bytes| {
        progress_inner.update(&id, UploadPatch::uploaded(bytes));
    });

    match inner.uploader.upload(compressed, on_progress, cancel).await {
        Ok(remote_url) => {
            log::info!("Uploaded {} ({}) to {}", file.name, id, remote_url);
            inner.update(&id, UploadPatch::succeeded(remote_url));
        }
        Err(e) if e.is_canceled() => {
            log::info!("Upload of {} ({}) canceled", file.name, id);
            inner.update(&id, UploadPatch::canceled());
        }
        Err(e) => {
            log::warn!("Upload of {} ({}) failed: {}", file.name, id, e);
            inner.update(&id, UploadPatch::failed(e.to_string()));
        }
    }
}
