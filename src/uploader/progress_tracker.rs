use tokio::sync::watch;

use crate::models::{percentage, AggregateProgress, Upload, UploadStatus, UploadSummary};

use super::registry::UploadRegistry;

/// Derive the global progress view from the current set of uploads.
///
/// With nothing pending (including an empty registry) progress is 100%.
/// Otherwise the denominator is the sum of effective sizes and only bytes
/// sent after compression count toward the numerator. A pending upload caps
/// the result at 99, so 100 always means settled.
pub fn compute_aggregate_progress<'a, I>(uploads: I) -> AggregateProgress
where
    I: IntoIterator<Item = &'a Upload>,
{
    let mut is_there_any_pending_uploads = false;
    let mut total_bytes: u64 = 0;
    let mut uploaded_bytes: u64 = 0;

    for upload in uploads {
        if upload.status == UploadStatus::Pending {
            is_there_any_pending_uploads = true;
        }
        total_bytes += upload.effective_size_in_bytes();
        uploaded_bytes += upload.effective_uploaded_in_bytes();
    }

    if !is_there_any_pending_uploads {
        return AggregateProgress {
            is_there_any_pending_uploads,
            global_percentage: 100,
        };
    }

    AggregateProgress {
        is_there_any_pending_uploads,
        global_percentage: percentage(uploaded_bytes, total_bytes).min(99),
    }
}

pub fn summarize<'a, I>(uploads: I) -> UploadSummary
where
    I: IntoIterator<Item = &'a Upload>,
{
    let mut summary = UploadSummary::default();
    for upload in uploads {
        summary.record(upload.status);
    }
    summary
}

/// Change feed over a registry. Each notification is turned into a freshly
/// computed `AggregateProgress`.
pub struct ProgressSubscription {
    registry: UploadRegistry,
    receiver: watch::Receiver<u64>,
}

impl ProgressSubscription {
    pub(crate) fn new(registry: UploadRegistry, receiver: watch::Receiver<u64>) -> Self {
        Self { registry, receiver }
    }

    pub fn current(&self) -> AggregateProgress {
        self.registry.aggregate_progress()
    }

    /// Wait for the next registry mutation and recompute progress.
    ///
    /// Several mutations landing between polls collapse into one notification.
    pub async fn changed(&mut self) -> Option<AggregateProgress> {
        self.receiver.changed().await.ok()?;
        Some(self.registry.aggregate_progress())
    }

    /// Resolve once no upload is pending.
    pub async fn wait_until_settled(&mut self) -> AggregateProgress {
        loop {
            self.receiver.borrow_and_update();
            let progress = self.registry.aggregate_progress();
            if !progress.is_there_any_pending_uploads {
                return progress;
            }
            if self.receiver.changed().await.is_err() {
                return self.registry.aggregate_progress();
            }
        }
    }
}
