//! File/metadata matching.
//!
//! Metadata records arrive from an external source (the tabular-file parser
//! is not this crate's concern) and declare which file they describe via
//! `file_name`. Binding pairs each input file with its record by exact name
//! match, one-to-one: a matched record is consumed and cannot bind a second
//! file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{AssetMetadata, BatchItem, SourceFile};

// ─────────────────────────────────────────────────────────────────────────────
// MetadataRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One externally-supplied metadata record.
///
/// `file_name` is the matching key; the remaining fields become the bound
/// item's [`AssetMetadata`]. Attributes specific to one taxonomy layer
/// travel in the open `extra` map rather than as dynamic fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// Name of the file this record describes.
    pub file_name: String,
    /// Top taxonomy level.
    pub layer: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub sequence: Option<u32>,
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl MetadataRecord {
    /// Minimal record: a file name and a layer.
    pub fn new(file_name: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            layer: layer.into(),
            category: None,
            subcategory: None,
            sequence: None,
            title: None,
            tags: Vec::new(),
            extra: HashMap::new(),
        }
    }

    fn into_metadata(self) -> AssetMetadata {
        AssetMetadata {
            layer: self.layer,
            category: self.category,
            subcategory: self.subcategory,
            sequence: self.sequence,
            title: self.title,
            tags: self.tags,
            extra: self.extra,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome types
// ─────────────────────────────────────────────────────────────────────────────

/// Non-fatal oddities observed while binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindWarning {
    /// More than one record declared the same file name; the last one won.
    DuplicateRecord { file_name: String },
}

/// Result of a binding pass.
#[derive(Debug)]
pub struct BindOutcome {
    /// Bound items, in input-file order, all pending.
    pub items: Vec<BatchItem>,
    /// Files with no matching record, in input order.
    pub unmatched_files: Vec<SourceFile>,
    /// Records that matched no file, in input order.
    pub unmatched_records: Vec<MetadataRecord>,
    /// Warnings; never fatal.
    pub warnings: Vec<BindWarning>,
}

// ─────────────────────────────────────────────────────────────────────────────
// bind
// ─────────────────────────────────────────────────────────────────────────────

/// Matches files to metadata records by exact file name.
///
/// Duplicate records for one name are reported as warnings and the last
/// record wins. Neither unmatched set is an error; the caller decides
/// whether a partial batch is acceptable.
pub fn bind(files: Vec<SourceFile>, records: Vec<MetadataRecord>) -> BindOutcome {
    let mut warnings = Vec::new();

    // First-seen order of record names, so the unmatched set comes back
    // deterministically.
    let mut record_order: Vec<String> = Vec::new();
    let mut lookup: HashMap<String, MetadataRecord> = HashMap::with_capacity(records.len());

    for record in records {
        let name = record.file_name.clone();
        if lookup.insert(name.clone(), record).is_some() {
            warnings.push(BindWarning::DuplicateRecord { file_name: name });
        } else {
            record_order.push(name);
        }
    }

    let mut items = Vec::new();
    let mut unmatched_files = Vec::new();

    for file in files {
        match lookup.remove(&file.name) {
            Some(record) => {
                items.push(BatchItem::new(file, record.into_metadata()));
            }
            None => unmatched_files.push(file),
        }
    }

    let unmatched_records: Vec<MetadataRecord> = record_order
        .into_iter()
        .filter_map(|name| lookup.remove(&name))
        .collect();

    debug!(
        bound = items.len(),
        unmatched_files = unmatched_files.len(),
        unmatched_records = unmatched_records.len(),
        warnings = warnings.len(),
        "[BINDING] bind pass complete"
    );

    BindOutcome {
        items,
        unmatched_files,
        unmatched_records,
        warnings,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemStatus;

    fn file(name: &str) -> SourceFile {
        SourceFile::from_bytes(name, vec![0u8; 16])
    }

    #[test]
    fn binds_by_exact_name() {
        let outcome = bind(
            vec![file("a.png"), file("b.png"), file("c.png")],
            vec![
                MetadataRecord::new("a.png", "artwork"),
                MetadataRecord::new("b.png", "artwork"),
            ],
        );

        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.unmatched_files.len(), 1);
        assert_eq!(outcome.unmatched_files[0].name, "c.png");
        assert!(outcome.unmatched_records.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn bound_items_are_pending_with_owned_metadata() {
        let mut record = MetadataRecord::new("a.png", "artwork");
        record.category = Some("covers".into());
        record.tags = vec!["scan".into()];
        record.extra.insert("dpi".into(), "300".into());

        let outcome = bind(vec![file("a.png")], vec![record]);
        let item = &outcome.items[0];
        assert_eq!(item.status(), ItemStatus::Pending);
        assert_eq!(item.progress(), 0);
        assert_eq!(item.metadata.layer, "artwork");
        assert_eq!(item.metadata.category.as_deref(), Some("covers"));
        assert_eq!(item.metadata.extra.get("dpi").map(String::as_str), Some("300"));
    }

    #[test]
    fn leftover_records_are_reported_in_input_order() {
        let outcome = bind(
            vec![file("b.png")],
            vec![
                MetadataRecord::new("z.png", "artwork"),
                MetadataRecord::new("b.png", "artwork"),
                MetadataRecord::new("a.png", "artwork"),
            ],
        );

        assert_eq!(outcome.items.len(), 1);
        let leftover: Vec<&str> = outcome
            .unmatched_records
            .iter()
            .map(|r| r.file_name.as_str())
            .collect();
        assert_eq!(leftover, vec!["z.png", "a.png"]);
    }

    #[test]
    fn duplicate_records_warn_and_last_wins() {
        let mut first = MetadataRecord::new("a.png", "artwork");
        first.title = Some("first".into());
        let mut second = MetadataRecord::new("a.png", "artwork");
        second.title = Some("second".into());

        let outcome = bind(vec![file("a.png")], vec![first, second]);

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].metadata.title.as_deref(), Some("second"));
        assert_eq!(
            outcome.warnings,
            vec![BindWarning::DuplicateRecord {
                file_name: "a.png".into()
            }]
        );
    }

    #[test]
    fn matched_record_is_consumed_once() {
        // Two files with the same name: only the first binds.
        let outcome = bind(
            vec![file("a.png"), file("a.png")],
            vec![MetadataRecord::new("a.png", "artwork")],
        );
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.unmatched_files.len(), 1);
    }

    #[test]
    fn empty_inputs_produce_empty_outcome() {
        let outcome = bind(Vec::new(), Vec::new());
        assert!(outcome.items.is_empty());
        assert!(outcome.unmatched_files.is_empty());
        assert!(outcome.unmatched_records.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: MetadataRecord = serde_json::from_str(
            r#"{"fileName": "a.png", "layer": "artwork", "category": null,
                "subcategory": null, "sequence": null, "title": null}"#,
        )
        .unwrap();
        assert_eq!(record.file_name, "a.png");
        assert!(record.tags.is_empty());
        assert!(record.extra.is_empty());
    }
}
