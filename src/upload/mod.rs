//! The upload engine: admission scheduling, per-item transfer tasks,
//! progress aggregation, and the batch coordinator tying them together.

mod coordinator;
mod progress;
mod result;
mod scheduler;
mod task;

pub use coordinator::{
    BatchCoordinator, BatchHooks, UploadOptions, DEFAULT_MAX_CONCURRENT,
};
pub use progress::{average_throughput, batch_progress, BatchProgress};
pub use result::{BatchUploadResult, CompletedItem, FailedItem};
pub use scheduler::{UploadPermit, UploadScheduler};
