//! Batch completion summary.

use serde::Serialize;

use crate::model::{BatchItem, ItemId, ItemStatus, UploadReceipt};

/// A successfully uploaded item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedItem {
    pub id: ItemId,
    pub file_name: String,
    pub receipt: UploadReceipt,
}

/// A failed item and its error message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub id: ItemId,
    pub file_name: String,
    pub error: String,
}

/// Deterministic summary produced once every item has reached a terminal
/// state.
///
/// Cancelled items appear in neither list but count toward `total_count`,
/// so `success_count + failure_count` may be less than `total_count`;
/// `success_count + failure_count + cancelled_count == total_count` always
/// holds.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadResult {
    /// Completed items, in batch insertion order.
    pub successful: Vec<CompletedItem>,
    /// Failed items, in batch insertion order.
    pub failed: Vec<FailedItem>,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub cancelled_count: usize,
}

/// Assembles the summary from settled items.
pub(crate) fn assemble(items: &[BatchItem]) -> BatchUploadResult {
    let mut successful = Vec::new();
    let mut failed = Vec::new();
    let mut cancelled_count = 0;

    for item in items {
        match item.status() {
            ItemStatus::Completed => {
                if let Some(receipt) = item.result() {
                    successful.push(CompletedItem {
                        id: item.id,
                        file_name: item.source.name.clone(),
                        receipt: receipt.clone(),
                    });
                }
            }
            ItemStatus::Error => failed.push(FailedItem {
                id: item.id,
                file_name: item.source.name.clone(),
                error: item.error().unwrap_or("unknown error").to_string(),
            }),
            ItemStatus::Cancelled => cancelled_count += 1,
            // Only called once every item is terminal.
            ItemStatus::Pending | ItemStatus::Uploading => {}
        }
    }

    BatchUploadResult {
        success_count: successful.len(),
        failure_count: failed.len(),
        cancelled_count,
        total_count: items.len(),
        successful,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetMetadata, SourceFile};

    fn item(name: &str) -> BatchItem {
        BatchItem::new(
            SourceFile::from_bytes(name, vec![0u8; 8]),
            AssetMetadata::default(),
        )
    }

    #[test]
    fn partitions_by_terminal_state() {
        let mut items = vec![item("ok.png"), item("bad.png"), item("gone.png")];
        items[0].begin_upload();
        items[0].complete(UploadReceipt {
            asset_id: "a-0".into(),
            location: None,
        });
        items[1].begin_upload();
        items[1].fail("network timeout".into());
        items[2].cancel();

        let result = assemble(&items);
        assert_eq!(result.total_count, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.cancelled_count, 1);
        assert_eq!(result.successful[0].file_name, "ok.png");
        assert_eq!(result.failed[0].error, "network timeout");
        assert_eq!(
            result.success_count + result.failure_count + result.cancelled_count,
            result.total_count
        );
    }

    #[test]
    fn empty_batch_summarizes_to_zeroes() {
        let result = assemble(&[]);
        assert_eq!(result.total_count, 0);
        assert!(result.successful.is_empty());
        assert!(result.failed.is_empty());
    }
}
