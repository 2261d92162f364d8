//! Ingestor Services Library
//!
//! This crate provides the archive ingestion pipeline: archive readers,
//! streaming uploads with checksums, and the batch orchestrator that ties
//! the filter, the security validator and the object store together.

pub mod archive;
pub mod ingest;
pub mod upload;

// Re-export commonly used types
pub use archive::{detect_format, open_reader, ArchiveFormat, ArchiveInput, ArchiveReader};
pub use ingest::{
    commit_or_rollback, ArchiveIngestor, BatchState, CommitError, MetadataCommitter,
};
pub use upload::{StreamingUploader, UploadError, UploadReceipt};
