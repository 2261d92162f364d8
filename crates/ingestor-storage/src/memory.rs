//! In-memory storage backend
//!
//! Used by tests and dry runs. Supports injecting transient failures for the
//! next N writes and permanent rejection of specific keys, and counts every
//! write attempt so callers can assert that an upload never happened.

use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, StoredObject>>,
    rejected_keys: RwLock<HashSet<String>>,
    fail_next: AtomicUsize,
    write_attempts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a transient error.
    ///
    /// A failing write consumes part of the stream first, like a connection
    /// dropped mid-transfer.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Permanently refuse writes to `key`
    pub async fn reject_key(&self, key: impl Into<String>) {
        self.rejected_keys.write().await.insert(key.into());
    }

    /// Number of `upload_stream` calls, successful or not
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        content_length: Option<u64>,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        if self.rejected_keys.read().await.contains(storage_key) {
            return Err(StorageError::UploadFailed(format!(
                "write to {} refused by store policy",
                storage_key
            )));
        }

        if self.take_injected_failure() {
            let mut scratch = [0u8; 16];
            let _ = reader.read(&mut scratch).await;
            return Err(StorageError::Unavailable(format!(
                "injected failure writing {}",
                storage_key
            )));
        }

        let mut data = Vec::with_capacity(content_length.unwrap_or(0).min(1 << 20) as usize);
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Failed to read from stream: {}", e)))?;

        tracing::debug!(
            key = %storage_key,
            size_bytes = data.len(),
            "Memory storage stream upload successful"
        );

        self.objects.write().await.insert(
            storage_key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                data: Bytes::from(data),
            },
        );

        Ok(format!("memory://{}", storage_key))
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(storage_key)
            .map(|o| o.data.to_vec())
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(storage_key);
        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(storage_key))
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        self.objects
            .read()
            .await
            .get(storage_key)
            .map(|o| o.data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
