//! Error types module
//!
//! Batch-fatal errors of the ingestion pipeline. Per-entry problems are not
//! errors: they are recorded in the `ExtractionResult` and the batch moves on.
//! Anything surfaced as an `IngestError` aborts the whole batch.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like resource limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be presented to callers
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INVALID_ARCHIVE")
    fn error_code(&self) -> &'static str;

    /// Whether re-running the same batch may succeed
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unsupported archive format")]
    UnsupportedFormat,

    #[error("Archive read error: {0}")]
    Io(#[from] io::Error),

    #[error("Entry count limit exceeded: {count} > {max}")]
    EntryCountExceeded { count: usize, max: usize },

    #[error("Total extracted size limit exceeded: {current} bytes > {max} bytes")]
    TotalSizeExceeded { current: u64, max: u64 },

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    /// A fatal error after objects may already have been written.
    ///
    /// `orphaned_keys` lists objects that reached the store before the abort
    /// and are referenced by no metadata.
    #[error("Batch aborted: {cause}")]
    Aborted {
        #[source]
        cause: Box<IngestError>,
        orphaned_keys: Vec<String>,
    },
}

impl IngestError {
    pub fn aborted(cause: IngestError, orphaned_keys: Vec<String>) -> Self {
        match cause {
            // Never nest aborts
            IngestError::Aborted {
                cause,
                orphaned_keys: mut inner,
            } => {
                inner.extend(orphaned_keys);
                IngestError::Aborted {
                    cause,
                    orphaned_keys: inner,
                }
            }
            other => IngestError::Aborted {
                cause: Box::new(other),
                orphaned_keys,
            },
        }
    }

    /// The error that caused the batch to stop
    pub fn root_cause(&self) -> &IngestError {
        match self {
            IngestError::Aborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Keys written before the abort, for a reconciliation sweep
    pub fn orphaned_keys(&self) -> &[String] {
        match self {
            IngestError::Aborted { orphaned_keys, .. } => orphaned_keys,
            _ => &[],
        }
    }

    /// Whether the error is a resource-ceiling breach
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self.root_cause(),
            IngestError::EntryCountExceeded { .. } | IngestError::TotalSizeExceeded { .. }
        )
    }
}

impl ErrorMetadata for IngestError {
    fn error_code(&self) -> &'static str {
        match self {
            IngestError::InvalidArchive(_) | IngestError::Io(_) => "INVALID_ARCHIVE",
            IngestError::UnsupportedFormat => "UNSUPPORTED_ARCHIVE_FORMAT",
            IngestError::EntryCountExceeded { .. } => "ENTRY_COUNT_EXCEEDED",
            IngestError::TotalSizeExceeded { .. } => "TOTAL_SIZE_EXCEEDED",
            IngestError::Cancelled => "BATCH_CANCELLED",
            IngestError::Internal(_) => "INTERNAL_ERROR",
            IngestError::Aborted { cause, .. } => cause.error_code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            IngestError::Cancelled | IngestError::Internal(_) => true,
            IngestError::Aborted { cause, .. } => cause.is_recoverable(),
            _ => false,
        }
    }

    fn client_message(&self) -> String {
        match self {
            IngestError::InvalidArchive(_) | IngestError::Io(_) => {
                "The archive is corrupt or truncated and could not be read".to_string()
            }
            IngestError::UnsupportedFormat => {
                "Unsupported archive format. Upload a ZIP, TAR or TAR.GZ archive".to_string()
            }
            IngestError::EntryCountExceeded { max, .. } => {
                format!("The archive contains more than {} files", max)
            }
            IngestError::TotalSizeExceeded { max, .. } => {
                format!("The archive expands to more than {} bytes", max)
            }
            IngestError::Cancelled => "The upload was cancelled".to_string(),
            IngestError::Internal(_) => "An internal error occurred".to_string(),
            IngestError::Aborted { cause, .. } => cause.client_message(),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            IngestError::Internal(_) => LogLevel::Error,
            IngestError::Cancelled => LogLevel::Debug,
            IngestError::Aborted { cause, .. } => cause.log_level(),
            _ => LogLevel::Warn,
        }
    }
}
