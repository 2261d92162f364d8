use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::entry::FileCategory;

/// Why an entry was recognised as system noise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Hidden OS metadata (`.DS_Store`, `desktop.ini`, ...)
    OsMetadata,
    /// AppleDouble resource forks (`__MACOSX/`, `._*`)
    ResourceFork,
    /// Thumbnail caches (`Thumbs.db`, ...)
    ThumbnailCache,
    /// Version-control metadata (`.git/`, `.svn/`, ...)
    VersionControl,
    /// Editor swap and backup files
    EditorArtifact,
    /// Transient lock files
    LockFile,
    /// Operator-supplied pattern
    Custom,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::OsMetadata => "os_metadata",
            SkipReason::ResourceFork => "resource_fork",
            SkipReason::ThumbnailCache => "thumbnail_cache",
            SkipReason::VersionControl => "version_control",
            SkipReason::EditorArtifact => "editor_artifact",
            SkipReason::LockFile => "lock_file",
            SkipReason::Custom => "custom",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable codes for per-entry validation rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    DangerousFilename,
    PathTraversal,
    MimeTypeMismatch,
    MimeTypeNotAllowed,
    ExecutableContent,
    MarkupContent,
    SignatureMismatch,
    CompressionRatioExceeded,
    FileTooLarge,
    EmptyFile,
    /// Links, device nodes and FIFOs are never extracted
    UnsupportedEntryType,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::DangerousFilename => "DANGEROUS_FILENAME",
            RejectionCode::PathTraversal => "PATH_TRAVERSAL",
            RejectionCode::MimeTypeMismatch => "MIME_TYPE_MISMATCH",
            RejectionCode::MimeTypeNotAllowed => "MIME_TYPE_NOT_ALLOWED",
            RejectionCode::ExecutableContent => "EXECUTABLE_CONTENT",
            RejectionCode::MarkupContent => "MARKUP_CONTENT",
            RejectionCode::SignatureMismatch => "SIGNATURE_MISMATCH",
            RejectionCode::CompressionRatioExceeded => "COMPRESSION_RATIO_EXCEEDED",
            RejectionCode::FileTooLarge => "FILE_TOO_LARGE",
            RejectionCode::EmptyFile => "EMPTY_FILE",
            RejectionCode::UnsupportedEntryType => "UNSUPPORTED_ENTRY_TYPE",
        }
    }

    /// Whether the code flags a deliberate attack rather than a policy miss.
    ///
    /// Security rejections are logged at warn level for monitoring.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            RejectionCode::DangerousFilename
                | RejectionCode::PathTraversal
                | RejectionCode::MimeTypeMismatch
                | RejectionCode::ExecutableContent
                | RejectionCode::MarkupContent
                | RejectionCode::SignatureMismatch
                | RejectionCode::CompressionRatioExceeded
                | RejectionCode::UnsupportedEntryType
        )
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured rejection of one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectionCode,
    /// Human-actionable message
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Type information resolved by the validator for an accepted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedEntry {
    pub mime_type: String,
    pub category: FileCategory,
}

/// Result of running the filter and the validator on one entry
///
/// Exactly one state holds. `Accepted` implies the declared size and the
/// content signature passed every check.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Skipped(SkipReason),
    Rejected(Rejection),
    Accepted(AcceptedEntry),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ValidationOutcome::Rejected(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ValidationOutcome::Skipped(_))
    }

    /// Rejection code, if the entry was rejected
    pub fn rejection_code(&self) -> Option<RejectionCode> {
        match self {
            ValidationOutcome::Rejected(rejection) => Some(rejection.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_code_strings_are_stable() {
        assert_eq!(
            RejectionCode::DangerousFilename.as_str(),
            "DANGEROUS_FILENAME"
        );
        assert_eq!(
            RejectionCode::CompressionRatioExceeded.to_string(),
            "COMPRESSION_RATIO_EXCEEDED"
        );
        let json = serde_json::to_string(&RejectionCode::PathTraversal).unwrap();
        assert_eq!(json, "\"PATH_TRAVERSAL\"");
    }

    #[test]
    fn test_rejection_details() {
        let rejection = Rejection::new(RejectionCode::FileTooLarge, "too big")
            .with_detail("size", 10)
            .with_detail("max", 5);
        assert_eq!(rejection.details.get("size").map(String::as_str), Some("10"));
        assert_eq!(rejection.to_string(), "FILE_TOO_LARGE: too big");
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = ValidationOutcome::Rejected(Rejection::new(RejectionCode::EmptyFile, "empty"));
        assert!(outcome.is_rejected());
        assert!(!outcome.is_accepted());
        assert_eq!(outcome.rejection_code(), Some(RejectionCode::EmptyFile));

        let skipped = ValidationOutcome::Skipped(SkipReason::LockFile);
        assert!(skipped.is_skipped());
        assert_eq!(skipped.rejection_code(), None);
    }

    #[test]
    fn test_security_violation_classification() {
        assert!(RejectionCode::ExecutableContent.is_security_violation());
        assert!(!RejectionCode::FileTooLarge.is_security_violation());
        assert!(!RejectionCode::MimeTypeNotAllowed.is_security_violation());
    }
}
