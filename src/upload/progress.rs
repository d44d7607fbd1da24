//! Batch-level progress and throughput metrics, derived from item state.

use serde::Serialize;

use crate::model::BatchItem;

/// Batch completion progress.
///
/// Measures completion, not bytes: an item counts as finished once it
/// reaches any terminal state, successful or not, so `overall_percent`
/// only hits 100 when every item has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Items in a terminal state.
    pub finished: usize,
    /// Items in the batch.
    pub total: usize,
    /// `round(100 * finished / total)`; 100 for an empty batch.
    pub overall_percent: u8,
}

/// Derives batch progress from the items.
pub fn batch_progress(items: &[BatchItem]) -> BatchProgress {
    let total = items.len();
    let finished = items.iter().filter(|i| i.status().is_terminal()).count();
    let overall_percent = if total == 0 {
        100
    } else {
        ((finished * 100 + total / 2) / total) as u8
    };
    BatchProgress {
        finished,
        total,
        overall_percent,
    }
}

/// Average transfer throughput in bytes per second, computed over items
/// that both started and ended. `None` when no item qualifies (reported to
/// callers as "not available").
pub fn average_throughput(items: &[BatchItem]) -> Option<f64> {
    let mut bytes: u64 = 0;
    let mut seconds: f64 = 0.0;

    for item in items {
        if let (Some(started), Some(ended)) = (item.started_at(), item.ended_at()) {
            bytes += item.source.size;
            seconds += ended.duration_since(started).as_secs_f64();
        }
    }

    if seconds > 0.0 {
        Some(bytes as f64 / seconds)
    } else {
        None
    }
}
