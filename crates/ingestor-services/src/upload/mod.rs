//! Streaming uploads of accepted entries.
//!
//! Content arrives as a bounded channel of chunks produced on the archive
//! thread and is streamed straight into the object store while a SHA-256
//! is computed over the bytes actually transferred.

mod hashing;

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::stream;
use ingestor_core::{ErrorMetadata, LogLevel};
use ingestor_storage::{Storage, StorageError};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

pub use hashing::{HashReport, HashingReader};

/// Chunks of one entry's content, in order. An `Err` item means the source
/// failed and the upload must not complete.
pub type ChunkReceiver = mpsc::Receiver<io::Result<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The store failed in a way that may clear up on a second attempt
    #[error("Transient storage failure: {0}")]
    Transient(#[source] StorageError),

    /// The store refused the object; retrying will not help
    #[error("Storage rejected the object: {0}")]
    Rejected(#[source] StorageError),

    /// The entry's own bytes were unreadable or had the wrong length
    #[error("Entry content is corrupt: {0}")]
    Corrupt(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }
}

impl ErrorMetadata for UploadError {
    fn error_code(&self) -> &'static str {
        match self {
            UploadError::Transient(_) => "UPLOAD_FAILED",
            UploadError::Rejected(_) => "STORAGE_REJECTED",
            UploadError::Corrupt(_) => "ENTRY_CORRUPT",
        }
    }

    fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }

    fn client_message(&self) -> String {
        match self {
            UploadError::Transient(_) => "Storage was temporarily unavailable".to_string(),
            UploadError::Rejected(_) => "Storage rejected the file".to_string(),
            UploadError::Corrupt(msg) => format!("File content is corrupt: {}", msg),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            UploadError::Transient(_) => LogLevel::Warn,
            UploadError::Rejected(_) => LogLevel::Error,
            UploadError::Corrupt(_) => LogLevel::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub url: String,
    pub checksum: String,
    pub byte_count: u64,
}

/// Adapt a chunk channel into an `AsyncRead`
pub fn chunk_reader(chunks: ChunkReceiver) -> impl AsyncRead + Send + Unpin + 'static {
    let chunks = stream::unfold(chunks, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    StreamReader::new(Box::pin(chunks))
}

#[derive(Clone)]
pub struct StreamingUploader {
    storage: Arc<dyn Storage>,
}

impl StreamingUploader {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stream `content` to `key`, verifying it is exactly `declared_size`
    /// bytes long.
    ///
    /// On any failure no object is left under `key`; the backends only
    /// publish an object once its stream completed.
    #[tracing::instrument(skip_all, fields(key = %key, declared_size = declared_size))]
    pub async fn upload<R>(
        &self,
        key: &str,
        content_type: &str,
        declared_size: u64,
        content: R,
    ) -> Result<UploadReceipt, UploadError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let started = Instant::now();
        let (reader, mut report) = HashingReader::new(content, Some(declared_size));

        let stored = self
            .storage
            .upload_stream(key, content_type, Some(declared_size), Box::pin(reader))
            .await;

        // The reader was consumed by the backend, so the report is final
        let report = report.try_recv().ok();
        match (stored, report) {
            (
                Ok(url),
                Some(HashReport::Complete {
                    checksum,
                    byte_count,
                }),
            ) => {
                tracing::debug!(
                    bytes = byte_count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Entry uploaded"
                );
                Ok(UploadReceipt {
                    url,
                    checksum,
                    byte_count,
                })
            }
            (Ok(_), _) => {
                // Treat as a store fault: it claimed success without draining
                // the content
                if let Err(e) = self.storage.delete(key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to delete short-read object");
                }
                Err(UploadError::Rejected(StorageError::BackendError(
                    "store finished before reading the whole entry".to_string(),
                )))
            }
            (Err(_), Some(HashReport::SourceFailed { message })) => {
                Err(UploadError::Corrupt(message))
            }
            (Err(e), _) if e.is_transient() => Err(UploadError::Transient(e)),
            (Err(e), _) => Err(UploadError::Rejected(e)),
        }
    }
}
