use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult, WriteMultipart};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes read from the source per iteration
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Parts in flight per multipart upload
const MAX_PART_CONCURRENCY: usize = 2;

/// S3 storage implementation
///
/// Streams are written as multipart uploads, so memory use per upload is
/// bounded by the part size times `MAX_PART_CONCURRENCY`.
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket,
            region,
            endpoint_url,
        })
    }

    /// Generate public URL for S3 object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style on the endpoint URL
    fn generate_url(&self, key: &str) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            let base_url = endpoint.trim_end_matches('/');
            format!("{}/{}/{}", base_url, self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    async fn stream_parts(
        &self,
        location: &Path,
        first: &[u8],
        reader: &mut Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let upload = self
            .store
            .put_multipart(location)
            .await
            .map_err(classify_store_error)?;
        let mut writer = WriteMultipart::new(upload);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut total = first.len() as u64;

        writer.write(first);

        loop {
            let read = match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StorageError::UploadFailed(format!(
                        "Failed to read from stream: {}",
                        e
                    )));
                }
            };

            if let Err(e) = writer.wait_for_capacity(MAX_PART_CONCURRENCY).await {
                let _ = writer.abort().await;
                return Err(classify_store_error(e));
            }
            writer.write(&buffer[..read]);
            total += read as u64;
        }

        writer.finish().await.map_err(classify_store_error)?;
        Ok(total)
    }
}

/// Maps object_store errors onto transient/permanent storage errors.
fn classify_store_error(e: ObjectStoreError) -> StorageError {
    match e {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(e.to_string()),
        ObjectStoreError::InvalidPath { .. } => StorageError::InvalidKey(e.to_string()),
        ObjectStoreError::AlreadyExists { .. }
        | ObjectStoreError::Precondition { .. }
        | ObjectStoreError::PermissionDenied { .. }
        | ObjectStoreError::Unauthenticated { .. }
        | ObjectStoreError::NotSupported { .. } => StorageError::UploadFailed(e.to_string()),
        // Network, throttling and 5xx errors surface as generic errors after
        // the client's own retries are exhausted
        other => StorageError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload_stream(
        &self,
        storage_key: &str,
        _content_type: &str,
        content_length: Option<u64>,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<String> {
        let start = std::time::Instant::now();
        let location = Path::from(storage_key.to_string());

        let mut first = vec![0u8; READ_BUFFER_SIZE];
        let first_len = reader.read(&mut first).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        first.truncate(first_len);

        // Multipart uploads need at least one part; empty objects use a plain put
        let result = if first_len == 0 {
            let put: ObjectResult<_> = self.store.put(&location, PutPayload::default()).await;
            put.map(|_| 0).map_err(classify_store_error)
        } else {
            self.stream_parts(&location, &first, &mut reader).await
        };

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    declared_bytes = ?content_length,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream upload failed"
                );
                return Err(e);
            }
        };

        let url = self.generate_url(storage_key);

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 stream upload successful"
        );

        Ok(url)
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let location = Path::from(storage_key.to_string());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(storage_key.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let location = Path::from(storage_key.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %storage_key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 delete failed"
            );
            StorageError::DeleteFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let location = Path::from(storage_key.to_string());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        let location = Path::from(storage_key.to_string());
        match self.store.head(&location).await {
            Ok(meta) => Ok(meta.size),
            Err(ObjectStoreError::NotFound { .. }) => {
                Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_url_formats() {
        let aws = S3Storage::new("media".into(), "eu-west-1".into(), None)
            .await
            .unwrap();
        assert_eq!(
            aws.generate_url("ingest/t/a.pdf"),
            "https://media.s3.eu-west-1.amazonaws.com/ingest/t/a.pdf"
        );

        let minio = S3Storage::new(
            "media".into(),
            "us-east-1".into(),
            Some("http://localhost:9000/".into()),
        )
        .await
        .unwrap();
        assert_eq!(
            minio.generate_url("ingest/t/a.pdf"),
            "http://localhost:9000/media/ingest/t/a.pdf"
        );
    }

    #[test]
    fn test_error_classification() {
        let not_found = ObjectStoreError::NotFound {
            path: "a".into(),
            source: "missing".into(),
        };
        assert!(matches!(classify_store_error(not_found), StorageError::NotFound(_)));

        let generic = ObjectStoreError::Generic {
            store: "S3",
            source: "connection reset".into(),
        };
        assert!(classify_store_error(generic).is_transient());
    }
}
