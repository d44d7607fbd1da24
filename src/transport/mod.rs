//! The transfer seam: how batches reach a storage backend.
//!
//! The orchestration core never talks to a backend directly — it drives an
//! [`UploadTransport`], which performs one transfer, reports progress
//! through a [`ProgressSink`], and honors a cancellation token. This keeps
//! the coordinator testable against fakes and lets callers plug in their
//! own backend.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpTransport`]: reqwest-backed reference transport (register the
//!   asset, then stream its bytes).
//! - [`ScriptedTransport`]: deterministic in-process transport for tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::model::{AssetMetadata, SourceFile, UploadReceipt};

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{ScriptedOutcome, ScriptedTransport};

// ─────────────────────────────────────────────────────────────────────────────
// ProgressSink
// ─────────────────────────────────────────────────────────────────────────────

/// Per-transfer progress callback handle.
///
/// Transports call [`report`](Self::report) with a 0–100 percentage as the
/// transfer advances. Values are clamped and made monotone by the
/// coordinator, so transports may report approximations freely.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(u8) + Send + Sync>);

impl ProgressSink {
    /// Wraps a callback.
    pub fn new(callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// A sink that drops every report. Handy in tests.
    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    /// Reports transfer progress as a percentage.
    pub fn report(&self, percent: u8) {
        (self.0)(percent);
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UploadTransport
// ─────────────────────────────────────────────────────────────────────────────

/// One-file transfer to a storage backend.
///
/// Contract:
///
/// - Progress is reported through `progress`; the transport need not reach
///   100 — completion is signalled by the returned receipt.
/// - Cancellation is cooperative: the transport must observe `cancel` and
///   return [`UploadError::Cancelled`] promptly once it fires. It is never
///   force-terminated, but anything it reports after its item was cancelled
///   is ignored by the coordinator.
/// - Timeout policy belongs to the transport, not the orchestration layer.
pub trait UploadTransport: Send + Sync + 'static {
    /// Transfers one file with its metadata.
    fn upload<'a>(
        &'a self,
        file: &'a SourceFile,
        metadata: &'a AssetMetadata,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt, UploadError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sink_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(move |p| seen.lock().unwrap().push(p))
        };

        sink.report(10);
        sink.clone().report(90);
        assert_eq!(*seen.lock().unwrap(), vec![10, 90]);
    }
}
