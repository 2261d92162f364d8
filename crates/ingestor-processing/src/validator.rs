//! Security validator for archive entries.
//!
//! Checks run in a fixed fail-fast order and stop at the first failure:
//!
//! 1. dangerous names and path traversal
//! 2. extension / declared type cross-check
//! 3. declared type allow-list
//! 4. content signature (executables, markup, spoofed content)
//! 5. compression ratio
//! 6. category size ceiling
//!
//! [`SecurityValidator::precheck`] runs every check that needs no content
//! bytes, so a probable bomb is rejected before anything is decompressed.

use std::sync::Arc;

use ingestor_core::config::normalize_content_type;
use ingestor_core::constants::MAX_NAME_COMPONENT_LEN;
use ingestor_core::models::compression_ratio;
use ingestor_core::{AcceptedEntry, IngestConfig, Rejection, RejectionCode, ValidationOutcome};

use crate::mime;
use crate::signature::{self, Signature};

/// Suffixes that execute on a client or on a web server
const DANGEROUS_EXTENSIONS: &[&str] = &[
    // Windows executables and installers
    "exe", "dll", "com", "scr", "pif", "msi", "msp", "cpl", "hta", "lnk", "reg", "jar",
    // Shell and scripting hosts
    "bat", "cmd", "ps1", "psm1", "vbs", "vbe", "js", "jse", "wsf", "wsh", "sh", "bash",
    // Server-side scripts
    "php", "php3", "php4", "php5", "phtml", "phar", "asp", "aspx", "jsp", "jspx", "cgi", "pl",
    "py", "rb", "shtml",
];

/// Bidirectional overrides, isolates and zero-width characters
fn is_invisible_control(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2066}'..='\u{2069}'
            | '\u{061C}'
            | '\u{FEFF}'
    )
}

pub struct SecurityValidator {
    config: Arc<IngestConfig>,
    markup_allowed: bool,
}

impl SecurityValidator {
    pub fn new(config: Arc<IngestConfig>) -> Self {
        let markup_allowed = config
            .allowed_content_types
            .iter()
            .any(|t| mime::is_markup_type(t));
        Self {
            config,
            markup_allowed,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Every check that does not need content bytes.
    ///
    /// Passing the precheck does not imply acceptance; [`Self::validate`]
    /// must still run on the leading bytes.
    pub fn precheck(
        &self,
        name: &str,
        declared_mime: &str,
        declared_size: u64,
        compressed_size: u64,
    ) -> Result<(), Rejection> {
        let declared = normalize_content_type(declared_mime);
        self.check_name(name)?;
        self.check_extension_matches(name, &declared)?;
        self.check_allowed(&declared)?;
        self.check_compression_ratio(declared_size, compressed_size)?;
        self.check_size(&declared, declared_size)?;
        Ok(())
    }

    /// Full validation in fail-fast order.
    ///
    /// `head` is the leading content of the entry; only the first
    /// [`signature::SIGNATURE_WINDOW`] bytes are looked at.
    pub fn validate(
        &self,
        name: &str,
        declared_mime: &str,
        declared_size: u64,
        compressed_size: u64,
        head: &[u8],
    ) -> ValidationOutcome {
        match self.run_all(name, declared_mime, declared_size, compressed_size, head) {
            Ok(accepted) => ValidationOutcome::Accepted(accepted),
            Err(rejection) => ValidationOutcome::Rejected(rejection),
        }
    }

    fn run_all(
        &self,
        name: &str,
        declared_mime: &str,
        declared_size: u64,
        compressed_size: u64,
        head: &[u8],
    ) -> Result<AcceptedEntry, Rejection> {
        let declared = normalize_content_type(declared_mime);
        self.check_name(name)?;
        self.check_extension_matches(name, &declared)?;
        self.check_allowed(&declared)?;
        self.check_signature(&declared, head)?;
        self.check_compression_ratio(declared_size, compressed_size)?;
        self.check_size(&declared, declared_size)?;

        Ok(AcceptedEntry {
            category: mime::category_for(&declared),
            mime_type: declared,
        })
    }

    fn check_name(&self, name: &str) -> Result<(), Rejection> {
        if name.is_empty() {
            return Err(Rejection::new(
                RejectionCode::DangerousFilename,
                "Entry has an empty name",
            ));
        }

        if name.contains('\0') {
            return Err(Rejection::new(
                RejectionCode::DangerousFilename,
                "File name contains an embedded null byte",
            ));
        }

        if let Some(c) = name.chars().find(|c| is_invisible_control(*c)) {
            return Err(Rejection::new(
                RejectionCode::DangerousFilename,
                "File name contains an invisible or bidirectional control character",
            )
            .with_detail("codepoint", format!("U+{:04X}", c as u32)));
        }

        if name.chars().any(char::is_control) {
            return Err(Rejection::new(
                RejectionCode::DangerousFilename,
                "File name contains a control character",
            ));
        }

        let normalized = name.replace('\\', "/");
        let is_absolute = normalized.starts_with('/')
            || normalized
                .as_bytes()
                .get(1)
                .is_some_and(|b| *b == b':' && normalized.as_bytes()[0].is_ascii_alphabetic());
        if is_absolute || normalized.split('/').any(|segment| segment == "..") {
            return Err(Rejection::new(
                RejectionCode::PathTraversal,
                "Path escapes the archive root; remove '..' segments and absolute paths",
            )
            .with_detail("name", name));
        }

        if let Some(long) = normalized
            .split('/')
            .find(|segment| segment.len() > MAX_NAME_COMPONENT_LEN)
        {
            return Err(Rejection::new(
                RejectionCode::DangerousFilename,
                format!(
                    "Path component is longer than {} bytes",
                    MAX_NAME_COMPONENT_LEN
                ),
            )
            .with_detail("length", long.len()));
        }

        let file_name = normalized.rsplit('/').next().unwrap_or_default();
        // Windows silently drops trailing dots and spaces
        let trimmed = file_name.trim_end_matches(['.', ' ']);
        let effective = trimmed.to_lowercase();
        let extensions: Vec<&str> = effective
            .split('.')
            .skip(1)
            .filter(|p| !p.is_empty())
            .collect();

        if let Some(last) = extensions.last() {
            let dangerous = DANGEROUS_EXTENSIONS.contains(last);
            let disguised = extensions.len() >= 2 || trimmed.len() != file_name.len();
            if dangerous && disguised {
                return Err(Rejection::new(
                    RejectionCode::DangerousFilename,
                    format!(
                        "File name hides an executable '.{}' extension behind another extension",
                        last
                    ),
                )
                .with_detail("extension", last));
            }
        }

        Ok(())
    }

    fn check_extension_matches(&self, name: &str, declared: &str) -> Result<(), Rejection> {
        let Some(extension) = mime::extension_of(name) else {
            return Ok(());
        };

        let Some(accepted) = mime::accepted_types_for_extension(&extension) else {
            tracing::debug!(
                extension = %extension,
                content_type = %declared,
                "Unknown extension, skipping Content-Type/extension cross-validation"
            );
            return Ok(());
        };

        if !accepted.contains(&declared) {
            return Err(Rejection::new(
                RejectionCode::MimeTypeMismatch,
                format!(
                    "Declared type {} does not match extension '.{}'. Expected one of: {}",
                    declared,
                    extension,
                    accepted.join(", ")
                ),
            )
            .with_detail("extension", &extension)
            .with_detail("declared", declared));
        }

        Ok(())
    }

    fn check_allowed(&self, declared: &str) -> Result<(), Rejection> {
        if !self.config.is_content_type_allowed(declared) {
            return Err(Rejection::new(
                RejectionCode::MimeTypeNotAllowed,
                format!("File type {} is not allowed", declared),
            )
            .with_detail("declared", declared));
        }
        Ok(())
    }

    fn check_signature(&self, declared: &str, head: &[u8]) -> Result<(), Rejection> {
        match signature::detect(head) {
            Some(sig) if sig.is_executable() => Err(Rejection::new(
                RejectionCode::ExecutableContent,
                format!("Content is an executable ({}); executables are never accepted", sig),
            )
            .with_detail("signature", sig)),
            Some(sig) if sig.is_markup() && !self.markup_allowed => Err(Rejection::new(
                RejectionCode::MarkupContent,
                format!("Content is active markup ({}) which is not allowed", sig),
            )
            .with_detail("signature", sig)),
            Some(sig) if !sig.is_compatible_with(declared) => Err(mismatch(declared, Some(sig))),
            None if signature::requires_signature(declared) => Err(mismatch(declared, None)),
            _ => Ok(()),
        }
    }

    fn check_compression_ratio(
        &self,
        declared_size: u64,
        compressed_size: u64,
    ) -> Result<(), Rejection> {
        let Some(ratio) = compression_ratio(declared_size, compressed_size) else {
            return Ok(());
        };

        if ratio > self.config.max_compression_ratio {
            return Err(Rejection::new(
                RejectionCode::CompressionRatioExceeded,
                format!(
                    "Compression ratio {:.1} exceeds the limit of {:.1}; probable decompression bomb",
                    ratio, self.config.max_compression_ratio
                ),
            )
            .with_detail("declared_size", declared_size)
            .with_detail("compressed_size", compressed_size));
        }
        Ok(())
    }

    fn check_size(&self, declared: &str, declared_size: u64) -> Result<(), Rejection> {
        if declared_size == 0 {
            return Err(Rejection::new(RejectionCode::EmptyFile, "File is empty"));
        }

        let category = mime::category_for(declared);
        let max = self.config.max_size_for(category);
        if declared_size > max {
            return Err(Rejection::new(
                RejectionCode::FileTooLarge,
                format!(
                    "File is {} bytes; the limit for {} files is {} bytes",
                    declared_size, category, max
                ),
            )
            .with_detail("size", declared_size)
            .with_detail("max", max));
        }
        Ok(())
    }
}

fn mismatch(declared: &str, detected: Option<Signature>) -> Rejection {
    let found = detected.map(|s| s.as_str()).unwrap_or("unrecognised content");
    Rejection::new(
        RejectionCode::SignatureMismatch,
        format!("Content ({}) does not match declared type {}", found, declared),
    )
    .with_detail("declared", declared)
    .with_detail("detected", found)
}
