//! Batch upload orchestration for media assets.
//!
//! `packhorse` takes a set of local files, binds each one to an
//! externally-supplied metadata record by file name, and uploads the batch
//! concurrently: admission is FIFO and bounded by `max_concurrent`,
//! progress is tracked per item and batch-wide, items can be cancelled or
//! retried individually without disturbing the rest, and the run always
//! ends with a deterministic success/failure summary — a failed item never
//! aborts the batch.
//!
//! The byte-moving backend sits behind the [`transport::UploadTransport`]
//! trait; [`transport::HttpTransport`] is a reqwest-backed reference
//! implementation and [`transport::ScriptedTransport`] a deterministic one
//! for tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use packhorse::binding::{bind, MetadataRecord};
//! use packhorse::model::{Batch, SourceFile};
//! use packhorse::transport::HttpTransport;
//! use packhorse::upload::{BatchCoordinator, BatchHooks, UploadOptions};
//!
//! # async fn run() -> Result<(), packhorse::error::UploadError> {
//! let files = vec![SourceFile::from_path("covers/front.png", 48_213)];
//! let records = vec![MetadataRecord::new("front.png", "artwork")];
//! let outcome = bind(files, records);
//!
//! let transport = HttpTransport::new(
//!     Arc::new(reqwest::Client::new()),
//!     url::Url::parse("https://assets.example.net").unwrap(),
//! );
//! let coordinator = BatchCoordinator::new(Arc::new(transport));
//!
//! let options = UploadOptions::new()
//!     .max_concurrent(2)
//!     .hooks(BatchHooks::new().on_item_progress(|id, pct| {
//!         println!("{id}: {pct}%");
//!     }));
//! let summary = coordinator.start(Batch::new(outcome.items)?, options).await?;
//! println!("{} of {} uploaded", summary.success_count, summary.total_count);
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod error;
pub mod model;
pub mod transport;
pub mod upload;

pub use error::UploadError;
pub use model::{Batch, BatchItem, ItemId, ItemStatus, RunState, SourceFile, UploadReceipt};
pub use upload::{BatchCoordinator, BatchHooks, BatchUploadResult, UploadOptions};
