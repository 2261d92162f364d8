//! Data models for the ingestion pipeline
//!
//! Transient per-entry types (`ArchiveEntry`, `ValidationOutcome`) and the
//! batch-level types handed back to the caller (`UploadedObject`,
//! `ExtractionResult`).

mod entry;
mod outcome;
mod result;

pub use entry::{compression_ratio, ArchiveEntry, FileCategory};
pub use outcome::{AcceptedEntry, Rejection, RejectionCode, SkipReason, ValidationOutcome};
pub use result::{ExtractionResult, FailedEntry, SkippedEntry, UploadedObject};
