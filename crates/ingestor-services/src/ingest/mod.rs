//! Batch orchestration.
//!
//! One call to [`ArchiveIngestor::ingest`] is one batch:
//!
//! ```text
//! Opening -> Iterating -> Aggregating -> (caller commits) Committed
//!     \          \
//!      `----------`--> Aborted
//! ```
//!
//! The archive is read on a blocking thread (see `producer`). The async
//! side owns the `ExtractionResult`, runs uploads under a concurrency
//! limit and is the only writer of the aggregate.

mod commit;
mod producer;

use std::sync::Arc;
use std::time::Instant;

use ingestor_core::{
    AuditSink, BatchAuditEvent, BatchContext, ErrorMetadata, ExtractionResult, IngestError,
    LogLevel, NoOpAuditSink, UploadedObject,
};
use ingestor_storage::{Storage, StorageError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::archive::ArchiveInput;
use crate::upload::{chunk_reader, StreamingUploader, UploadError, UploadReceipt};

pub use commit::{commit_or_rollback, CommitError, MetadataCommitter};
use producer::{link_rejection, EntryDecision, EntryProducer, ProducerEvent, UploadJob};

/// Decisions and upload jobs buffered between the reader thread and the
/// orchestrator
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Opening,
    Iterating,
    Aggregating,
    Committed,
    Aborted,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Opening => "opening",
            BatchState::Iterating => "iterating",
            BatchState::Aggregating => "aggregating",
            BatchState::Committed => "committed",
            BatchState::Aborted => "aborted",
        }
    }
}

/// Finished upload, as seen by the orchestrator
struct UploadDone {
    index: usize,
    name: String,
    key: String,
    mime_type: String,
    attempt: u32,
    outcome: Result<UploadReceipt, UploadError>,
}

async fn run_upload(
    uploader: StreamingUploader,
    slots: Arc<Semaphore>,
    job: UploadJob,
) -> UploadDone {
    let UploadJob {
        index,
        name,
        key,
        mime_type,
        declared_size,
        attempt,
        chunks,
    } = job;

    let outcome = match slots.acquire_owned().await {
        Ok(_permit) => {
            uploader
                .upload(&key, &mime_type, declared_size, chunk_reader(chunks))
                .await
        }
        Err(_) => Err(UploadError::Transient(StorageError::Unavailable(
            "upload slots closed".to_string(),
        ))),
    };

    UploadDone {
        index,
        name,
        key,
        mime_type,
        attempt,
        outcome,
    }
}

fn keep_first(slot: &mut Option<IngestError>, err: IngestError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// Single-writer accumulator for one batch
struct BatchRun<'a> {
    ctx: &'a BatchContext,
    audit: &'a dyn AuditSink,
    result: ExtractionResult,
    opened: bool,
    indexed: bool,
    /// Entries waiting for their second attempt: (archive index, name)
    retries: Vec<(usize, String)>,
    /// Written objects no longer in the result that could not be deleted
    stray_keys: Vec<String>,
}

impl<'a> BatchRun<'a> {
    fn new(ctx: &'a BatchContext, audit: &'a dyn AuditSink) -> Self {
        Self {
            ctx,
            audit,
            result: ExtractionResult::new(),
            opened: false,
            indexed: false,
            retries: Vec::new(),
            stray_keys: Vec::new(),
        }
    }

    async fn apply_decision(&mut self, name: String, decision: EntryDecision) {
        match decision {
            EntryDecision::Skipped(reason) => self.result.record_skipped(name, reason),
            EntryDecision::Rejected(rejection) => {
                if rejection.code.is_security_violation() {
                    tracing::warn!(
                        entry = %name,
                        code = rejection.code.as_str(),
                        reason = %rejection.message,
                        "Archive entry failed a security check"
                    );
                    if let Err(e) = self
                        .audit
                        .record_entry(self.ctx.batch_id, &name, rejection.code.as_str())
                        .await
                    {
                        tracing::error!(error = %e, "Failed to record entry audit event");
                    }
                }
                self.result.record_rejected(name, &rejection);
            }
            EntryDecision::Failed { code, message } => {
                tracing::debug!(entry = %name, code = code, reason = %message, "Entry failed");
                self.result.record_failed(name, code, message);
            }
        }
    }

    fn apply_joined(&mut self, joined: Result<UploadDone, JoinError>) -> Result<(), IngestError> {
        let done =
            joined.map_err(|e| IngestError::Internal(format!("upload task failed: {}", e)))?;
        self.apply_upload(done);
        Ok(())
    }

    fn apply_upload(&mut self, done: UploadDone) {
        let UploadDone {
            index,
            name,
            key,
            mime_type,
            attempt,
            outcome,
        } = done;

        match outcome {
            Ok(receipt) => {
                tracing::debug!(entry = %name, key = %key, url = %receipt.url, attempt, "Entry stored");
                self.result.record_uploaded(UploadedObject {
                    object_key: key,
                    checksum: receipt.checksum,
                    byte_count: receipt.byte_count,
                    mime_type,
                    source_name: name,
                });
            }
            Err(e) if e.is_retryable() && self.indexed && attempt == 1 => {
                tracing::warn!(entry = %name, key = %key, error = %e, "Upload failed, will retry once");
                self.retries.push((index, name));
            }
            Err(e) => {
                let message = match (&e, attempt) {
                    (UploadError::Transient(_), 1) => {
                        format!("{} (single-pass input, not retried)", e)
                    }
                    (UploadError::Transient(_), _) => format!("{} (after retry)", e),
                    _ => e.to_string(),
                };
                match e.log_level() {
                    LogLevel::Error => tracing::error!(entry = %name, key = %key, error = %e, "Upload failed"),
                    LogLevel::Warn => tracing::warn!(entry = %name, key = %key, error = %e, "Upload failed"),
                    LogLevel::Debug => tracing::debug!(entry = %name, key = %key, error = %e, "Upload failed"),
                }
                self.result.record_failed(name, e.error_code(), message);
            }
        }
    }

    /// Turn an entry revealed as a link into a link rejection, deleting
    /// anything already stored for it.
    async fn revoke(&mut self, name: String, storage: &dyn Storage) -> Result<(), IngestError> {
        if let Some(object) = self.result.retract(&name) {
            if let Err(e) = storage.delete(&object.object_key).await {
                tracing::error!(
                    entry = %name,
                    key = %object.object_key,
                    error = %e,
                    "Failed to delete object stored from a link"
                );
                let cause = IngestError::Internal(format!(
                    "object {} stored from link {} could not be deleted: {}",
                    object.object_key, name, e
                ));
                self.stray_keys.push(object.object_key);
                return Err(cause);
            }
            tracing::debug!(entry = %name, key = %object.object_key, "Deleted object stored from a link");
        }
        self.apply_decision(name, EntryDecision::Rejected(link_rejection()))
            .await;
        Ok(())
    }

    /// Entries that were due a retry the reader will no longer perform
    fn fail_pending_retries(&mut self, pending: Vec<(usize, String)>) {
        for (_, name) in pending {
            self.result.record_failed(
                name,
                "UPLOAD_FAILED",
                "Transient storage failure; batch ended before the retry",
            );
        }
    }
}

/// Streams archive entries into tenant-scoped object storage.
#[derive(Clone)]
pub struct ArchiveIngestor {
    uploader: StreamingUploader,
    audit: Arc<dyn AuditSink>,
}

impl ArchiveIngestor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            uploader: StreamingUploader::new(storage),
            audit: Arc::new(NoOpAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.uploader.storage()
    }

    /// Run one batch over `input`.
    ///
    /// Per-entry problems are recorded in the returned result. An `Err` means
    /// the batch aborted; once the archive was opened the error is
    /// [`IngestError::Aborted`] and lists the keys already written.
    #[tracing::instrument(skip_all, fields(batch_id = %ctx.batch_id, tenant_id = %ctx.tenant_id))]
    pub async fn ingest(
        &self,
        ctx: &BatchContext,
        input: ArchiveInput,
    ) -> Result<ExtractionResult, IngestError> {
        let started = Instant::now();
        ctx.config
            .validate()
            .map_err(|e| IngestError::Internal(format!("invalid ingest configuration: {}", e)))?;

        tracing::info!(
            state = BatchState::Opening.as_str(),
            seekable = input.is_seekable(),
            key_prefix = %ctx.key_prefix,
            "Archive ingestion started"
        );

        let batch_cancel = ctx.cancel.child_token();
        let (events_tx, mut events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let producer = EntryProducer::new(
            ctx.config.clone(),
            ctx.key_prefix.clone(),
            batch_cancel.clone(),
            events_tx,
        )?;
        let span = tracing::Span::current();
        let reader_task = tokio::task::spawn_blocking(move || span.in_scope(|| producer.run(input)));

        let slots = Arc::new(Semaphore::new(ctx.config.max_concurrent_uploads));
        let mut in_flight: JoinSet<UploadDone> = JoinSet::new();
        let mut run = BatchRun::new(ctx, self.audit.as_ref());
        let mut fatal: Option<IngestError> = None;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        ProducerEvent::Opened { format, indexed } => {
                            run.opened = true;
                            run.indexed = indexed;
                            tracing::info!(
                                state = BatchState::Iterating.as_str(),
                                format = %format,
                                indexed,
                                "Archive opened"
                            );
                        }
                        ProducerEvent::Decided { name, decision } => {
                            run.apply_decision(name, decision).await;
                        }
                        ProducerEvent::Upload(job) => {
                            let task = run_upload(self.uploader.clone(), slots.clone(), job);
                            in_flight.spawn(task.in_current_span());
                        }
                        ProducerEvent::Revoked { name } => {
                            // The link's own upload may still be settling
                            while let Some(joined) = in_flight.join_next().await {
                                if let Err(e) = run.apply_joined(joined) {
                                    batch_cancel.cancel();
                                    keep_first(&mut fatal, e);
                                }
                            }
                            if let Err(e) = run.revoke(name, self.storage().as_ref()).await {
                                batch_cancel.cancel();
                                keep_first(&mut fatal, e);
                            }
                        }
                        ProducerEvent::PassComplete { retries } => {
                            // Every job is fully pumped by now, so this drains
                            while let Some(joined) = in_flight.join_next().await {
                                if let Err(e) = run.apply_joined(joined) {
                                    batch_cancel.cancel();
                                    keep_first(&mut fatal, e);
                                }
                            }
                            let pending = std::mem::take(&mut run.retries);
                            let indexes = pending.iter().map(|(index, _)| *index).collect();
                            if fatal.is_some() || retries.send(indexes).is_err() {
                                run.fail_pending_retries(pending);
                            }
                        }
                    }
                }
                Some(joined) = in_flight.join_next() => {
                    if let Err(e) = run.apply_joined(joined) {
                        batch_cancel.cancel();
                        keep_first(&mut fatal, e);
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = run.apply_joined(joined) {
                keep_first(&mut fatal, e);
            }
        }

        let produced = reader_task.await.map_err(|e| {
            IngestError::Internal(format!("archive reader stopped unexpectedly: {}", e))
        });
        let summary = match (fatal, produced) {
            (Some(cause), _) | (None, Err(cause)) | (None, Ok(Err(cause))) => {
                return Err(self.abort(run, cause).await);
            }
            (None, Ok(Ok(summary))) => summary,
        };

        let pending = std::mem::take(&mut run.retries);
        run.fail_pending_retries(pending);

        tracing::debug!(state = BatchState::Aggregating.as_str(), "Aggregating batch result");
        let mut result = run.result;
        result.sort_entries();
        if !result.is_consistent(summary.file_entries) {
            let cause = IngestError::Internal(format!(
                "accounted for {} of {} entries",
                result.total_entries(),
                summary.file_entries
            ));
            run.result = result;
            return Err(self.abort(run, cause).await);
        }

        tracing::info!(
            format = %summary.format,
            extracted = result.extracted_count,
            skipped = result.skipped_count,
            failed = result.failed_count,
            bytes = result.bytes_extracted,
            duration_ms = started.elapsed().as_millis() as u64,
            "Archive ingestion finished"
        );
        if let Err(e) = self
            .audit
            .record_batch(&BatchAuditEvent::completed(ctx, &result))
            .await
        {
            tracing::error!(error = %e, "Failed to record batch audit event");
        }

        Ok(result)
    }

    async fn abort(&self, run: BatchRun<'_>, cause: IngestError) -> IngestError {
        let orphaned_keys: Vec<String> = run
            .result
            .created_objects
            .iter()
            .map(|o| o.object_key.clone())
            .chain(run.stray_keys.iter().cloned())
            .collect();

        match cause.log_level() {
            LogLevel::Error => tracing::error!(
                state = BatchState::Aborted.as_str(),
                code = cause.error_code(),
                error = %cause,
                orphaned = orphaned_keys.len(),
                "Archive ingestion aborted"
            ),
            _ => tracing::warn!(
                state = BatchState::Aborted.as_str(),
                code = cause.error_code(),
                error = %cause,
                orphaned = orphaned_keys.len(),
                "Archive ingestion aborted"
            ),
        }

        let event = BatchAuditEvent::aborted(run.ctx, cause.error_code());
        if let Err(e) = self.audit.record_batch(&event).await {
            tracing::error!(error = %e, "Failed to record batch audit event");
        }

        if run.opened {
            IngestError::aborted(cause, orphaned_keys)
        } else {
            cause
        }
    }
}
