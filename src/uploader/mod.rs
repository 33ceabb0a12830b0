// Upload pipeline: the registry owns upload records and drives each file
// through compression and transfer to the storage endpoint.

pub mod progress_tracker;
pub mod registry;
pub mod storage_client;

pub use progress_tracker::{compute_aggregate_progress, ProgressSubscription};
pub use registry::UploadRegistry;
pub use storage_client::{ProgressCallback, StorageClient, StorageUploader};
