use thiserror::Error;

use crate::model::ItemId;

/// Crate-wide error type.
///
/// Per-item transport failures are captured on the failed item itself and
/// never abort the batch; this type surfaces them from transports and
/// reports the few batch-level failure modes (which are programmer errors
/// and fail fast).
#[derive(Debug, Error)]
pub enum UploadError {
    // ── Batch orchestration ───────────────────────────────────────────────────
    #[error("batch is already running")]
    BatchRunning,

    #[error("duplicate item id in batch: {0}")]
    DuplicateItemId(ItemId),

    // ── Transfer ──────────────────────────────────────────────────────────────
    #[error("transfer cancelled")]
    Cancelled,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("source file unreadable: {0}")]
    SourceUnreadable(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}
