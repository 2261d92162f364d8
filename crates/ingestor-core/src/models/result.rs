use serde::{Deserialize, Serialize};

use super::outcome::{Rejection, SkipReason};

/// Object written to the store for an accepted entry
///
/// Handed to the caller by value; the pipeline keeps no reference to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedObject {
    /// Tenant-scoped storage key
    pub object_key: String,
    /// Hex SHA-256 over the bytes actually transferred
    pub checksum: String,
    /// Bytes actually transferred
    pub byte_count: u64,
    /// Type resolved by the validator
    pub mime_type: String,
    /// Entry name as it appeared in the archive
    pub source_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub name: String,
    pub error_code: String,
    pub message: String,
}

/// Aggregate outcome of one batch
///
/// Built empty at batch start and mutated only by the orchestrator.
/// `extracted_count + skipped_count + failed_count` always equals the number
/// of non-directory entries processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub extracted_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    /// Sum of `byte_count` over `created_objects`
    pub bytes_extracted: u64,
    pub skipped_entries: Vec<SkippedEntry>,
    pub failed_entries: Vec<FailedEntry>,
    pub created_objects: Vec<UploadedObject>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skipped(&mut self, name: impl Into<String>, reason: SkipReason) {
        self.skipped_count += 1;
        self.skipped_entries.push(SkippedEntry {
            name: name.into(),
            reason,
        });
    }

    pub fn record_rejected(&mut self, name: impl Into<String>, rejection: &Rejection) {
        self.record_failed(name, rejection.code.as_str(), rejection.message.clone());
    }

    pub fn record_failed(
        &mut self,
        name: impl Into<String>,
        error_code: &str,
        message: impl Into<String>,
    ) {
        self.failed_count += 1;
        self.failed_entries.push(FailedEntry {
            name: name.into(),
            error_code: error_code.to_string(),
            message: message.into(),
        });
    }

    pub fn record_uploaded(&mut self, object: UploadedObject) {
        self.extracted_count += 1;
        self.bytes_extracted += object.byte_count;
        self.created_objects.push(object);
    }

    /// Removes whatever was recorded for `name`.
    ///
    /// Returns the object when the entry had been uploaded, so the caller can
    /// delete it.
    pub fn retract(&mut self, name: &str) -> Option<UploadedObject> {
        if let Some(pos) = self.created_objects.iter().position(|o| o.source_name == name) {
            let object = self.created_objects.remove(pos);
            self.extracted_count -= 1;
            self.bytes_extracted -= object.byte_count;
            return Some(object);
        }
        if let Some(pos) = self.skipped_entries.iter().position(|e| e.name == name) {
            self.skipped_entries.remove(pos);
            self.skipped_count -= 1;
        } else if let Some(pos) = self.failed_entries.iter().position(|e| e.name == name) {
            self.failed_entries.remove(pos);
            self.failed_count -= 1;
        }
        None
    }

    /// Number of entries accounted for so far
    pub fn total_entries(&self) -> usize {
        self.extracted_count + self.skipped_count + self.failed_count
    }

    /// Checks the accounting invariant against the archive's file count.
    pub fn is_consistent(&self, non_directory_entries: usize) -> bool {
        self.total_entries() == non_directory_entries
            && self.created_objects.len() == self.extracted_count
            && self.skipped_entries.len() == self.skipped_count
            && self.failed_entries.len() == self.failed_count
    }

    /// Looks up the failure recorded for an entry name.
    pub fn failure_for(&self, name: &str) -> Option<&FailedEntry> {
        self.failed_entries.iter().find(|f| f.name == name)
    }

    /// Orders the per-entry lists by name.
    ///
    /// Uploads may complete out of order when concurrency is enabled; sorting
    /// makes two runs over the same archive directly comparable.
    pub fn sort_entries(&mut self) {
        self.skipped_entries.sort_by(|a, b| a.name.cmp(&b.name));
        self.failed_entries.sort_by(|a, b| a.name.cmp(&b.name));
        self.created_objects
            .sort_by(|a, b| a.object_key.cmp(&b.object_key));
    }
}
