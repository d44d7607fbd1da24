//! Metadata binding: matching raw input files to externally-supplied
//! metadata records by file name.
//!
//! Binding is best-effort: unmatched files and records are reported as
//! sets, never as errors — the caller decides whether to proceed with a
//! partial batch.

mod binder;

pub use binder::{bind, BindOutcome, BindWarning, MetadataRecord};
