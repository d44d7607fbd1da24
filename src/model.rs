//! Core data model: batch items, their upload state machine, and batches.
//!
//! A `BatchItem` pairs one source file with its bound metadata and carries
//! the item's upload state. State transitions are only performed by the
//! coordinator's event loop; callers observe items through snapshots.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UploadError;

// ─────────────────────────────────────────────────────────────────────────────
// ItemId
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque identifier for a batch item, unique within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SourceFile
// ─────────────────────────────────────────────────────────────────────────────

/// Backing data for a source file.
#[derive(Debug, Clone)]
pub enum FileData {
    /// File on disk, streamed at upload time.
    Path(PathBuf),
    /// In-memory bytes (shared, cheap to clone).
    Memory(Arc<Vec<u8>>),
}

/// A raw input file: name, size, optional content type, and a data handle.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// File name, the key used for metadata binding.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type, if known.
    pub content_type: Option<String>,
    /// Where the bytes live.
    pub data: FileData,
}

impl SourceFile {
    /// Creates a file-backed source. The name is taken from the path's
    /// final component.
    pub fn from_path(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            size,
            content_type: None,
            data: FileData::Path(path),
        }
    }

    /// Creates an in-memory source.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            name: name.into(),
            size,
            content_type: None,
            data: FileData::Memory(Arc::new(bytes)),
        }
    }

    /// Sets the content type.
    pub fn content_type(mut self, mime: impl Into<String>) -> Self {
        self.content_type = Some(mime.into());
        self
    }

    /// Returns the backing path for file-backed sources.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            FileData::Path(p) => Some(p),
            FileData::Memory(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AssetMetadata
// ─────────────────────────────────────────────────────────────────────────────

/// Taxonomy metadata owned by one item after binding.
///
/// Known taxonomy fields are typed; layer-specific attributes travel in the
/// open `extra` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    /// Top taxonomy level.
    pub layer: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Position within the subcategory, if assigned.
    pub sequence: Option<u32>,
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Layer-specific attributes not covered by the typed fields.
    #[serde(default)]
    pub extra: std::collections::HashMap<String, String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ItemStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Upload state of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for admission.
    Pending,
    /// Transfer in flight.
    Uploading,
    /// Transfer finished successfully.
    Completed,
    /// Transfer failed; retryable.
    Error,
    /// Cancelled by the caller.
    Cancelled,
}

impl ItemStatus {
    /// String form, for logs and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no further automatic transition can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Error | ItemStatus::Cancelled
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UploadReceipt
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque success payload returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// Identifier assigned by the backend.
    pub asset_id: String,
    /// Where the stored asset can be addressed, if the backend reports it.
    #[serde(default)]
    pub location: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchItem
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of work: a source file plus its bound metadata and upload state.
///
/// The coordinator exclusively owns `status`/`progress`/`result`/`error`;
/// the transition methods below are the only way they change, and each
/// enforces the legal transition graph:
///
/// ```text
/// pending → uploading → { completed | error | cancelled }
/// error → pending        (explicit retry only)
/// ```
///
/// Illegal transitions are no-ops that return `false`.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Unique id within the batch.
    pub id: ItemId,
    /// The raw file.
    pub source: SourceFile,
    /// Metadata bound to this item.
    pub metadata: AssetMetadata,
    status: ItemStatus,
    progress: u8,
    result: Option<UploadReceipt>,
    error: Option<String>,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl BatchItem {
    /// Creates a pending item with a fresh id.
    pub fn new(source: SourceFile, metadata: AssetMetadata) -> Self {
        Self {
            id: ItemId::new(),
            source,
            metadata,
            status: ItemStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    /// Transfer progress, 0–100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Success payload; present only when completed.
    pub fn result(&self) -> Option<&UploadReceipt> {
        self.result.as_ref()
    }

    /// Failure message; present only when in error.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    // ── Transitions (coordinator only) ───────────────────────────────────────

    /// `pending → uploading`; records the start timestamp.
    pub(crate) fn begin_upload(&mut self) -> bool {
        if self.status != ItemStatus::Pending {
            return false;
        }
        self.status = ItemStatus::Uploading;
        self.progress = 0;
        self.started_at = Some(Instant::now());
        true
    }

    /// Applies a transport progress report while uploading.
    ///
    /// The value is clamped to 0–100 and progress never decreases.
    /// Returns the updated value, or `None` if the item is not uploading.
    pub(crate) fn apply_progress(&mut self, percent: u8) -> Option<u8> {
        if self.status != ItemStatus::Uploading {
            return None;
        }
        self.progress = self.progress.max(percent.min(100));
        Some(self.progress)
    }

    /// `uploading → completed`; pins progress to 100.
    pub(crate) fn complete(&mut self, receipt: UploadReceipt) -> bool {
        if self.status != ItemStatus::Uploading {
            return false;
        }
        self.status = ItemStatus::Completed;
        self.progress = 100;
        self.result = Some(receipt);
        self.ended_at = Some(Instant::now());
        true
    }

    /// `uploading → error`; stores the failure message.
    pub(crate) fn fail(&mut self, message: String) -> bool {
        if self.status != ItemStatus::Uploading {
            return false;
        }
        self.status = ItemStatus::Error;
        self.error = Some(message);
        self.ended_at = Some(Instant::now());
        true
    }

    /// `pending | uploading → cancelled`. Idempotent: cancelling an item
    /// already in a terminal state is a no-op.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ItemStatus::Cancelled;
        self.ended_at = Some(Instant::now());
        true
    }

    /// `error → pending`; resets progress and clears the stored error so
    /// the item can be re-admitted.
    pub(crate) fn reset_for_retry(&mut self) -> bool {
        if self.status != ItemStatus::Error {
            return false;
        }
        self.status = ItemStatus::Pending;
        self.progress = 0;
        self.error = None;
        self.started_at = None;
        self.ended_at = None;
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RunState
// ─────────────────────────────────────────────────────────────────────────────

/// Run-level state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run in progress.
    Idle,
    /// Items are being admitted and transferred.
    Running,
    /// Transfers in flight continue; new admissions are held back.
    Paused,
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered sequence of items. Insertion order is preserved and determines
/// FIFO admission (not completion order).
#[derive(Debug)]
pub struct Batch {
    items: Vec<BatchItem>,
}

impl Batch {
    /// Builds a batch, verifying that item ids are unique.
    ///
    /// # Errors
    ///
    /// `UploadError::DuplicateItemId` if two items share an id.
    pub fn new(items: Vec<BatchItem>) -> Result<Self, UploadError> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id) {
                return Err(UploadError::DuplicateItemId(item.id));
            }
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub(crate) fn into_items(self) -> Vec<BatchItem> {
        self.items
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
