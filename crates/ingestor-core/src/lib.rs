//! Ingestor Core Library
//!
//! This crate provides the domain model, error taxonomy, configuration and
//! batch context shared by every component of the archive ingestion pipeline.

pub mod audit;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use audit::{AuditSink, BatchAuditEvent, NoOpAuditSink, TracingAuditSink};
pub use config::{IngestConfig, SkipPattern, StorageConfig};
pub use context::BatchContext;
pub use error::{ErrorMetadata, IngestError, LogLevel};
pub use models::{
    AcceptedEntry, ArchiveEntry, ExtractionResult, FailedEntry, FileCategory, Rejection,
    RejectionCode, SkipReason, SkippedEntry, UploadedObject, ValidationOutcome,
};
pub use storage_types::StorageBackend;
