//! End-to-end ingestion of well-formed archives.
//!
//! Run with: `cargo test -p ingestor-services --test ingest_test`

mod helpers;

use std::sync::Arc;

use async_trait::async_trait;
use helpers::*;
use ingestor_core::{
    AuditSink, BatchAuditEvent, IngestConfig, RejectionCode, SkipReason,
};
use ingestor_services::archive::ArchiveInput;
use ingestor_services::{commit_or_rollback, ArchiveIngestor, MetadataCommitter};
use ingestor_storage::{LocalStorage, Storage};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

fn mixed_archive() -> Vec<u8> {
    zip(vec![
        ("docs/", Vec::new()),
        ("docs/document.pdf", pdf(2 * 1024 * 1024)),
        (".DS_Store", noise(6148, 3)),
        ("malware.exe", pe_executable(4096)),
        ("image.jpg", with_magic(PNG_MAGIC, 8192)),
    ])
}

#[tokio::test]
async fn test_mixed_archive_is_fully_accounted() {
    let (ingestor, storage) = memory_ingestor();
    let ctx = context(IngestConfig::default());

    let result = ingestor
        .ingest(&ctx, ArchiveInput::bytes(mixed_archive()))
        .await
        .unwrap();

    assert_eq!(result.extracted_count, 1);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.failed_count, 2);
    assert!(result.is_consistent(4));

    let object = &result.created_objects[0];
    assert_eq!(object.source_name, "docs/document.pdf");
    assert_eq!(object.mime_type, "application/pdf");
    assert_eq!(object.object_key, format!("{}/docs/document.pdf", ctx.key_prefix));
    assert_eq!(object.byte_count, 2 * 1024 * 1024);
    assert_eq!(
        object.checksum,
        hex::encode(Sha256::digest(pdf(2 * 1024 * 1024)))
    );

    assert_eq!(result.skipped_entries[0].name, ".DS_Store");
    assert_eq!(result.skipped_entries[0].reason, SkipReason::OsMetadata);

    let exe = result.failure_for("malware.exe").unwrap();
    assert!(
        exe.error_code == RejectionCode::MimeTypeNotAllowed.as_str()
            || exe.error_code == RejectionCode::ExecutableContent.as_str(),
        "unexpected code {}",
        exe.error_code
    );
    assert_eq!(
        result.failure_for("image.jpg").unwrap().error_code,
        "SIGNATURE_MISMATCH"
    );

    assert_eq!(storage.keys().await, vec![object.object_key.clone()]);
    let stored = storage.object(&object.object_key).await.unwrap();
    assert_eq!(stored.content_type, "application/pdf");
    assert_eq!(stored.data.len(), 2 * 1024 * 1024);
}

#[tokio::test]
async fn test_double_extension_is_dangerous() {
    let (ingestor, storage) = memory_ingestor();
    let archive = zip(vec![
        ("document.pdf", pdf(50_000)),
        (".DS_Store", noise(6148, 3)),
        ("notes.pdf.exe", pdf(3000)),
        ("photo.jpg", with_magic(JPEG_MAGIC, 20_000)),
    ]);
    let ctx = context(IngestConfig::default());

    let result = ingestor
        .ingest(&ctx, ArchiveInput::bytes(archive))
        .await
        .unwrap();

    assert_eq!(result.extracted_count, 2);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.failed_count, 1);
    assert_eq!(
        result.failure_for("notes.pdf.exe").unwrap().error_code,
        "DANGEROUS_FILENAME"
    );
    assert_eq!(storage.len().await, 2);
}

#[tokio::test]
async fn test_streamed_input_matches_seekable_input() {
    let (seekable, _) = memory_ingestor();
    let (streamed, _) = memory_ingestor();
    let tenant = Uuid::new_v4();
    let config = Arc::new(IngestConfig::default());
    let ctx = ingestor_core::BatchContext::new(tenant, config.clone());

    let a = seekable
        .ingest(&ctx, ArchiveInput::bytes(mixed_archive()))
        .await
        .unwrap();
    let b = streamed
        .ingest(&ctx, ArchiveInput::stream(std::io::Cursor::new(mixed_archive())))
        .await
        .unwrap();

    assert_eq!(a, b);
}

#[tokio::test]
async fn test_rerun_produces_same_keys_and_checksums() {
    let (ingestor, storage) = memory_ingestor();
    let archive = zip(vec![
        ("a/one.txt", text(3000, 1)),
        ("a/two.txt", text(5000, 2)),
        ("photo.jpg", with_magic(JPEG_MAGIC, 10_000)),
    ]);
    let ctx = context(IngestConfig::default());

    let first = ingestor
        .ingest(&ctx, ArchiveInput::bytes(archive.clone()))
        .await
        .unwrap();
    let second = ingestor
        .ingest(&ctx, ArchiveInput::bytes(archive))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.extracted_count, 3);
    assert_eq!(storage.len().await, 3);
}

#[tokio::test]
async fn test_upload_concurrency_does_not_change_result() {
    let entries: Vec<(String, Vec<u8>)> = (0..12)
        .map(|i| (format!("batch/file-{:02}.txt", i), text(20_000 + i * 100, i as u32)))
        .collect();
    let archive = zip(entries.iter().map(|(n, d)| (n.as_str(), d.clone())).collect());

    let mut results = Vec::new();
    for slots in [1, 4] {
        let (ingestor, _) = memory_ingestor();
        let config = IngestConfig {
            max_concurrent_uploads: slots,
            chunk_size: 4096,
            ..Default::default()
        };
        let ctx = context(config).with_key_prefix("fixed/prefix");
        results.push(
            ingestor
                .ingest(&ctx, ArchiveInput::bytes(archive.clone()))
                .await
                .unwrap(),
        );
    }

    assert_eq!(results[0].extracted_count, 12);
    assert_eq!(results[0], results[1]);
    let keys: Vec<&str> = results[0]
        .created_objects
        .iter()
        .map(|o| o.object_key.as_str())
        .collect();
    assert_eq!(keys[0], "fixed/prefix/batch/file-00.txt");
}

#[tokio::test]
async fn test_tar_gz_archive() {
    let (ingestor, storage) = memory_ingestor();
    let archive = gzip(&tar(vec![
        ("notes/readme.txt", text(1500, 4)),
        ("Thumbs.db", noise(512, 5)),
        ("cover.jpg", with_magic(JPEG_MAGIC, 4000)),
    ]));
    let ctx = context(IngestConfig::default());

    let result = ingestor
        .ingest(&ctx, ArchiveInput::stream(std::io::Cursor::new(archive)))
        .await
        .unwrap();

    assert_eq!(result.extracted_count, 2);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.skipped_entries[0].reason, SkipReason::ThumbnailCache);
    assert_eq!(storage.len().await, 2);
}

#[tokio::test]
async fn test_symlinks_are_not_extracted() {
    let (ingestor, storage) = memory_ingestor();
    let ctx = context(IngestConfig::default());

    let result = ingestor
        .ingest(&ctx, ArchiveInput::bytes(tar_with_symlink("latest", "/etc/passwd")))
        .await
        .unwrap();

    assert_eq!(result.extracted_count, 1);
    assert_eq!(
        result.failure_for("latest").unwrap().error_code,
        "UNSUPPORTED_ENTRY_TYPE"
    );
    assert_eq!(storage.len().await, 1);
}

#[tokio::test]
async fn test_zip_symlinks_are_not_extracted_from_a_stream() {
    let archive = zip_with_symlink("latest.txt", "secret/target.txt");
    let ctx = context(IngestConfig::default());

    let (seekable, _) = memory_ingestor();
    let expected = seekable
        .ingest(&ctx, ArchiveInput::bytes(archive.clone()))
        .await
        .unwrap();

    let (streamed, storage) = memory_ingestor();
    let result = streamed
        .ingest(&ctx, ArchiveInput::stream(std::io::Cursor::new(archive)))
        .await
        .unwrap();

    assert_eq!(result, expected);
    assert_eq!(result.extracted_count, 1);
    assert_eq!(
        result.failure_for("latest.txt").unwrap().error_code,
        "UNSUPPORTED_ENTRY_TYPE"
    );
    assert!(result.is_consistent(2));
    // Whatever the stream stored before the link was known is gone
    assert_eq!(
        storage.keys().await,
        vec![format!("{}/notes.txt", ctx.key_prefix)]
    );
}

#[tokio::test]
async fn test_local_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(dir.path(), "http://localhost/objects".to_string())
            .await
            .unwrap(),
    );
    let ingestor = ArchiveIngestor::new(storage.clone());
    let ctx = context(IngestConfig::default()).with_key_prefix("tenant-a");
    let body = text(70_000, 9);

    let result = ingestor
        .ingest(&ctx, ArchiveInput::bytes(zip(vec![("deep/dir/file.txt", body.clone())])))
        .await
        .unwrap();

    assert_eq!(result.extracted_count, 1);
    let key = &result.created_objects[0].object_key;
    assert_eq!(key, "tenant-a/deep/dir/file.txt");
    assert_eq!(storage.download(key).await.unwrap(), body);
    assert!(dir.path().join("tenant-a/deep/dir/file.txt").exists());
}

#[derive(Default)]
struct CapturingAudit {
    batches: Mutex<Vec<BatchAuditEvent>>,
    entries: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AuditSink for CapturingAudit {
    async fn record_batch(&self, event: &BatchAuditEvent) -> Result<(), String> {
        self.batches.lock().await.push(event.clone());
        Ok(())
    }

    async fn record_entry(
        &self,
        _batch_id: Uuid,
        entry_name: &str,
        code: &str,
    ) -> Result<(), String> {
        self.entries
            .lock()
            .await
            .push((entry_name.to_string(), code.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_audit_sink_sees_batch_and_security_rejections() {
    let (ingestor, _) = memory_ingestor();
    let audit = Arc::new(CapturingAudit::default());
    let ingestor = ingestor.with_audit_sink(audit.clone());
    let initiator = Uuid::new_v4();
    let ctx = context(IngestConfig::default()).with_initiator(initiator);

    ingestor
        .ingest(&ctx, ArchiveInput::bytes(mixed_archive()))
        .await
        .unwrap();

    let batches = audit.batches.lock().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].batch_id, ctx.batch_id);
    assert_eq!(batches[0].initiated_by, Some(initiator));
    assert_eq!(batches[0].extracted_count, 1);
    assert!(batches[0].abort_code.is_none());

    let entries = audit.entries.lock().await;
    assert!(entries
        .iter()
        .any(|(name, code)| name == "image.jpg" && code == "SIGNATURE_MISMATCH"));
}

struct FailingCommitter;

#[async_trait]
impl MetadataCommitter for FailingCommitter {
    async fn commit(
        &self,
        _ctx: &ingestor_core::BatchContext,
        _objects: &[ingestor_core::UploadedObject],
    ) -> Result<(), String> {
        Err("constraint violation".to_string())
    }
}

#[tokio::test]
async fn test_failed_commit_rolls_back_ingested_objects() {
    let (ingestor, storage) = memory_ingestor();
    let ctx = context(IngestConfig::default());
    let result = ingestor
        .ingest(
            &ctx,
            ArchiveInput::bytes(zip(vec![("a.txt", text(100, 1)), ("b.txt", text(200, 2))])),
        )
        .await
        .unwrap();
    assert_eq!(storage.len().await, 2);

    let err = commit_or_rollback(storage.as_ref(), &FailingCommitter, &ctx, &result)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("constraint violation"));
    assert!(storage.is_empty().await);
}
