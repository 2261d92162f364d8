//! Blocking side of a batch.
//!
//! Runs on a blocking thread next to the archive reader. Every entry is
//! filtered and validated here, and accepted entries are pumped chunk by
//! chunk into a bounded channel that an upload task drains. Only decisions
//! and chunk channels cross over to the async side.

use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use ingestor_core::constants::{CHUNK_CHANNEL_CAPACITY, SIGNATURE_WINDOW};
use ingestor_core::{
    ArchiveEntry, IngestConfig, IngestError, Rejection, RejectionCode, SkipReason,
    ValidationOutcome,
};
use ingestor_processing::{mime, EntryFilter, SecurityValidator};
use ingestor_storage::keys;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::archive::{self, ArchiveFormat, ArchiveInput, EntryVisitor, VisitControl};
use crate::upload::ChunkReceiver;

/// Per-entry decision that needs no upload
#[derive(Debug)]
pub(crate) enum EntryDecision {
    Skipped(SkipReason),
    Rejected(Rejection),
    Failed { code: &'static str, message: String },
}

/// Accepted entry whose content is being pumped into `chunks`
pub(crate) struct UploadJob {
    pub index: usize,
    pub name: String,
    pub key: String,
    pub mime_type: String,
    pub declared_size: u64,
    pub attempt: u32,
    pub chunks: ChunkReceiver,
}

pub(crate) enum ProducerEvent {
    Opened {
        format: ArchiveFormat,
        indexed: bool,
    },
    Decided {
        name: String,
        decision: EntryDecision,
    },
    Upload(UploadJob),
    /// An entry already decided or uploaded is a link after all. Its
    /// outcome is replaced with the link rejection.
    Revoked { name: String },
    /// First pass finished. The orchestrator answers with the entry indexes
    /// to re-open for a second attempt once every upload has settled.
    PassComplete { retries: oneshot::Sender<Vec<usize>> },
}

#[derive(Debug, Clone)]
pub(crate) struct ProducerSummary {
    pub format: ArchiveFormat,
    /// Non-directory entries seen on the first pass
    pub file_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    First,
    Retry,
}

/// How pumping an entry ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    Completed,
    /// Content was unreadable or had the wrong length; the upload side has
    /// been told through the channel
    SourceFailed,
    /// The upload side stopped listening
    ConsumerGone,
}

pub(crate) struct EntryProducer {
    config: Arc<IngestConfig>,
    key_prefix: String,
    cancel: CancellationToken,
    filter: EntryFilter,
    validator: SecurityValidator,
    events: mpsc::Sender<ProducerEvent>,
    pass: Pass,
    /// Entries of every kind seen on the first pass
    entries_seen: usize,
    file_entries: usize,
    declared_total: u64,
    actual_total: u64,
    keys_seen: HashSet<String>,
}

impl EntryProducer {
    pub(crate) fn new(
        config: Arc<IngestConfig>,
        key_prefix: String,
        cancel: CancellationToken,
        events: mpsc::Sender<ProducerEvent>,
    ) -> Result<Self, IngestError> {
        let filter = EntryFilter::new(&config.skip_patterns)
            .map_err(|e| IngestError::Internal(format!("invalid skip pattern: {}", e)))?;
        Ok(Self {
            filter,
            validator: SecurityValidator::new(config.clone()),
            config,
            key_prefix,
            cancel,
            events,
            pass: Pass::First,
            entries_seen: 0,
            file_entries: 0,
            declared_total: 0,
            actual_total: 0,
            keys_seen: HashSet::new(),
        })
    }

    /// Open the archive and drive it to the end.
    ///
    /// Returns once every entry has been decided or handed to an upload, or
    /// with the fatal error that ended the batch.
    pub(crate) fn run(mut self, input: ArchiveInput) -> Result<ProducerSummary, IngestError> {
        let mut reader = archive::open_reader(input, self.config.max_total_size)?;
        let format = reader.format();
        let indexed = reader.is_indexed();
        if !self.emit(ProducerEvent::Opened { format, indexed }) {
            return Err(IngestError::Cancelled);
        }

        if let Some(count) = reader.entry_count_hint() {
            let max = self.config.max_entry_count;
            if count > max {
                return Err(IngestError::EntryCountExceeded { count, max });
            }
        }

        reader.visit_entries(&mut self)?;
        let summary = ProducerSummary {
            format,
            file_entries: self.file_entries,
        };

        if !indexed {
            return Ok(summary);
        }

        let (reply, retries) = oneshot::channel();
        if !self.emit(ProducerEvent::PassComplete { retries: reply }) {
            return Ok(summary);
        }
        let retries = retries.blocking_recv().unwrap_or_default();
        if retries.is_empty() {
            return Ok(summary);
        }

        tracing::debug!(entries = retries.len(), "Re-opening entries for a second attempt");
        std::thread::sleep(self.config.upload_retry_delay);
        self.pass = Pass::Retry;
        for index in retries {
            if self.cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            reader.reopen(index, &mut self)?;
        }
        Ok(summary)
    }

    fn emit(&self, event: ProducerEvent) -> bool {
        self.events.blocking_send(event).is_ok()
    }

    fn decide(&self, name: &str, decision: EntryDecision) -> VisitControl {
        let delivered = self.emit(ProducerEvent::Decided {
            name: name.to_string(),
            decision,
        });
        if delivered {
            VisitControl::Continue
        } else {
            VisitControl::Stop
        }
    }

    fn first_pass(
        &mut self,
        index: usize,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> Result<VisitControl, IngestError> {
        let name = entry.name.as_str();
        self.file_entries += 1;

        if entry.is_special {
            tracing::debug!(entry = %name, state = "rejected", "Link or special file");
            return Ok(self.decide(name, EntryDecision::Rejected(link_rejection())));
        }

        if let Some(reason) = self.filter.should_skip(name) {
            tracing::debug!(entry = %name, state = "skipped", reason = reason.as_str());
            return Ok(self.decide(name, EntryDecision::Skipped(reason)));
        }

        let declared_mime = mime::guess_from_name(name);
        if let Err(rejection) = self.validator.precheck(
            name,
            declared_mime,
            entry.declared_size,
            entry.compressed_size,
        ) {
            tracing::debug!(entry = %name, state = "rejected", code = rejection.code.as_str());
            return Ok(self.decide(name, EntryDecision::Rejected(rejection)));
        }

        let head = match read_head(content) {
            Ok(head) => head,
            Err(e) => {
                return Ok(self.decide(name, corrupt(format!("unreadable content: {}", e))));
            }
        };

        let mime_type = match self.validator.validate(
            name,
            declared_mime,
            entry.declared_size,
            entry.compressed_size,
            &head,
        ) {
            ValidationOutcome::Accepted(accepted) => accepted.mime_type,
            ValidationOutcome::Rejected(rejection) => {
                tracing::debug!(entry = %name, state = "rejected", code = rejection.code.as_str());
                return Ok(self.decide(name, EntryDecision::Rejected(rejection)));
            }
            ValidationOutcome::Skipped(reason) => {
                return Ok(self.decide(name, EntryDecision::Skipped(reason)));
            }
        };

        let key = match self.object_key(name) {
            Ok(key) => key,
            Err(rejection) => return Ok(self.decide(name, EntryDecision::Rejected(rejection))),
        };
        if !self.keys_seen.insert(key.clone()) {
            return Ok(self.decide(
                name,
                EntryDecision::Failed {
                    code: "STORAGE_REJECTED",
                    message: format!("an earlier entry already maps to key {}", key),
                },
            ));
        }

        self.declared_total = self.declared_total.saturating_add(entry.declared_size);
        let max_total = self.config.max_total_size;
        if self.declared_total > max_total {
            return Err(IngestError::TotalSizeExceeded {
                current: self.declared_total,
                max: max_total,
            });
        }

        tracing::debug!(entry = %name, state = "uploading", key = %key, mime_type = %mime_type);
        self.start_upload(index, entry, key, mime_type, head, content, 1)
    }

    fn retry_pass(
        &mut self,
        index: usize,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> Result<VisitControl, IngestError> {
        let name = entry.name.as_str();
        let head = match read_head(content) {
            Ok(head) => head,
            Err(e) => return Ok(self.decide(name, corrupt(format!("unreadable content: {}", e)))),
        };
        // Validation is deterministic; this only recovers the resolved type
        let mime_type = match self.validator.validate(
            name,
            mime::guess_from_name(name),
            entry.declared_size,
            entry.compressed_size,
            &head,
        ) {
            ValidationOutcome::Accepted(accepted) => accepted.mime_type,
            ValidationOutcome::Rejected(rejection) => {
                return Ok(self.decide(name, EntryDecision::Rejected(rejection)))
            }
            ValidationOutcome::Skipped(reason) => {
                return Ok(self.decide(name, EntryDecision::Skipped(reason)))
            }
        };
        let key = match self.object_key(name) {
            Ok(key) => key,
            Err(rejection) => return Ok(self.decide(name, EntryDecision::Rejected(rejection))),
        };

        tracing::debug!(entry = %name, state = "uploading", key = %key, attempt = 2);
        self.start_upload(index, entry, key, mime_type, head, content, 2)
    }

    fn object_key(&self, name: &str) -> Result<String, Rejection> {
        keys::sanitize_relative_path(name)
            .map(|relative| keys::scoped_key(&self.key_prefix, &relative))
            .map_err(|e| Rejection::new(RejectionCode::PathTraversal, e.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn start_upload(
        &mut self,
        index: usize,
        entry: &ArchiveEntry,
        key: String,
        mime_type: String,
        head: Vec<u8>,
        content: &mut dyn Read,
        attempt: u32,
    ) -> Result<VisitControl, IngestError> {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let job = UploadJob {
            index,
            name: entry.name.clone(),
            key,
            mime_type,
            declared_size: entry.declared_size,
            attempt,
            chunks: rx,
        };
        if !self.emit(ProducerEvent::Upload(job)) {
            return Ok(VisitControl::Stop);
        }

        match self.pump(head, content, entry.declared_size, &tx)? {
            PumpEnd::Completed => {}
            PumpEnd::SourceFailed => {
                tracing::debug!(entry = %entry.name, "Content did not match its header")
            }
            PumpEnd::ConsumerGone => {
                tracing::debug!(entry = %entry.name, "Upload stopped before the content ended")
            }
        }
        Ok(VisitControl::Continue)
    }

    /// Move an entry's content into the chunk channel.
    ///
    /// Reads at most one chunk past the declared size. Every early exit
    /// pushes an error into the channel first so the upload cannot mistake
    /// a cut-off stream for a complete one.
    fn pump(
        &mut self,
        head: Vec<u8>,
        content: &mut dyn Read,
        declared_size: u64,
        tx: &mpsc::Sender<io::Result<Bytes>>,
    ) -> Result<PumpEnd, IngestError> {
        let send = |item: io::Result<Bytes>| tx.blocking_send(item).is_ok();
        let counts_toward_total = self.pass == Pass::First;
        let max_total = self.config.max_total_size;

        let mut sent = head.len() as u64;
        if counts_toward_total {
            self.actual_total += sent;
        }
        if !head.is_empty() && !send(Ok(Bytes::from(head))) {
            return Ok(PumpEnd::ConsumerGone);
        }

        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        loop {
            if self.cancel.is_cancelled() {
                send(Err(io::Error::new(io::ErrorKind::Interrupted, "batch cancelled")));
                return Err(IngestError::Cancelled);
            }

            let n = match content.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    send(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unreadable content: {}", e),
                    )));
                    return Ok(PumpEnd::SourceFailed);
                }
            };

            sent += n as u64;
            if sent > declared_size {
                send(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("content exceeds its declared size of {} bytes", declared_size),
                )));
                return Ok(PumpEnd::SourceFailed);
            }

            if counts_toward_total {
                self.actual_total += n as u64;
                if self.actual_total > max_total {
                    send(Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "batch size limit reached",
                    )));
                    return Err(IngestError::TotalSizeExceeded {
                        current: self.actual_total,
                        max: max_total,
                    });
                }
            }

            if !send(Ok(Bytes::copy_from_slice(&buf[..n]))) {
                return Ok(PumpEnd::ConsumerGone);
            }
        }

        if sent < declared_size {
            send(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("content ended after {} of {} declared bytes", sent, declared_size),
            )));
            return Ok(PumpEnd::SourceFailed);
        }
        Ok(PumpEnd::Completed)
    }
}

impl EntryVisitor for EntryProducer {
    fn visit(
        &mut self,
        index: usize,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> Result<VisitControl, IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        if self.pass == Pass::First {
            // Directories and links count; a header is work whatever it holds
            self.entries_seen += 1;
            let max = self.config.max_entry_count;
            if self.entries_seen > max {
                return Err(IngestError::EntryCountExceeded {
                    count: self.entries_seen,
                    max,
                });
            }
        }
        if entry.is_directory {
            return Ok(VisitControl::Continue);
        }
        match self.pass {
            Pass::First => self.first_pass(index, entry, content),
            Pass::Retry => self.retry_pass(index, entry, content),
        }
    }

    fn revoke(&mut self, _index: usize, entry: &ArchiveEntry) -> Result<(), IngestError> {
        tracing::debug!(entry = %entry.name, state = "rejected", "Link found in central directory");
        if self.emit(ProducerEvent::Revoked {
            name: entry.name.clone(),
        }) {
            Ok(())
        } else {
            Err(IngestError::Cancelled)
        }
    }
}

pub(crate) fn link_rejection() -> Rejection {
    Rejection::new(
        RejectionCode::UnsupportedEntryType,
        "Links and special files are not extracted",
    )
}

fn corrupt(message: String) -> EntryDecision {
    EntryDecision::Failed {
        code: "ENTRY_CORRUPT",
        message,
    }
}

/// Leading bytes for signature detection; shorter only at end of content.
fn read_head(content: &mut dyn Read) -> io::Result<Vec<u8>> {
    archive::read_prefix(content, SIGNATURE_WINDOW)
}
