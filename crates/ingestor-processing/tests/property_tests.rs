//! Property-based tests for the entry filter and the security validator.

use std::sync::Arc;

use ingestor_core::config::default_skip_patterns;
use ingestor_core::{IngestConfig, RejectionCode};
use ingestor_processing::mime;
use ingestor_processing::{EntryFilter, SecurityValidator};
use proptest::prelude::*;

const NOISE_FILES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "._photo.jpg",
    "draft.txt.swp",
    "~$report.docx",
    ".gitignore",
];

const NOISE_DIRS: &[&str] = &["__MACOSX", ".git", ".svn", ".idea", ".Trashes"];

const KNOWN_EXTENSIONS: &[&str] = &[
    "jpg", "png", "gif", "webp", "mp4", "mov", "mp3", "wav", "flac", "pdf", "doc", "docx",
    "xlsx", "txt", "csv",
];

const EXECUTABLE_MAGIC: &[&[u8]] = &[
    b"MZ",
    b"\x7FELF",
    &[0xFE, 0xED, 0xFA, 0xCE],
    &[0xCF, 0xFA, 0xED, 0xFE],
    &[0xCA, 0xFE, 0xBA, 0xBE],
];

fn validator(max_ratio: f64) -> SecurityValidator {
    let config = IngestConfig {
        max_compression_ratio: max_ratio,
        ..Default::default()
    };
    SecurityValidator::new(Arc::new(config))
}

proptest! {
    /// Known noise names are skipped wherever they sit in the tree.
    #[test]
    fn prop_noise_files_skipped(
        dirs in prop::collection::vec("[a-z0-9]{1,8}", 0..4),
        idx in 0..NOISE_FILES.len(),
        upper in any::<bool>(),
        backslash in any::<bool>(),
    ) {
        let filter = EntryFilter::new(&default_skip_patterns()).unwrap();
        let mut parts = dirs.clone();
        parts.push(NOISE_FILES[idx].to_string());
        let mut name = parts.join(if backslash { "\\" } else { "/" });
        if upper {
            name = name.to_uppercase();
        }
        prop_assert!(filter.should_skip(&name).is_some(), "{} not skipped", name);
    }

    /// Anything inside a noise directory is skipped.
    #[test]
    fn prop_noise_directories_skipped(
        idx in 0..NOISE_DIRS.len(),
        prefix in prop::collection::vec("[a-z]{1,6}", 0..3),
        leaf in "[a-z]{1,10}\\.(pdf|jpg|txt)",
    ) {
        let filter = EntryFilter::new(&default_skip_patterns()).unwrap();
        let mut parts = prefix.clone();
        parts.push(NOISE_DIRS[idx].to_string());
        parts.push(leaf);
        let name = parts.join("/");
        prop_assert!(filter.should_skip(&name).is_some(), "{} not skipped", name);
    }

    /// A declared type outside the extension's accepted set is never accepted.
    #[test]
    fn prop_spoofed_type_rejected(
        stem in "[a-z]{1,12}",
        ext_idx in 0..KNOWN_EXTENSIONS.len(),
        declared_idx in 0..KNOWN_EXTENSIONS.len(),
        head in prop::collection::vec(any::<u8>(), 0..64),
        size in 1u64..1_000_000,
    ) {
        let extension = KNOWN_EXTENSIONS[ext_idx];
        let accepted = mime::accepted_types_for_extension(extension).unwrap_or(&[]);
        let declared = mime::accepted_types_for_extension(KNOWN_EXTENSIONS[declared_idx])
            .and_then(|types| types.first().copied())
            .unwrap_or("application/octet-stream");
        prop_assume!(!accepted.contains(&declared));

        let name = format!("{}.{}", stem, extension);
        let outcome = validator(100.0).validate(&name, declared, size, size, &head);
        prop_assert_eq!(outcome.rejection_code(), Some(RejectionCode::MimeTypeMismatch));
    }

    /// Executable content is rejected whatever the name and declared type.
    #[test]
    fn prop_executable_content_rejected(
        stem in "[a-z]{1,12}",
        ext_idx in 0..KNOWN_EXTENSIONS.len(),
        magic_idx in 0..EXECUTABLE_MAGIC.len(),
        // Real executables carry a full header after the magic
        tail in prop::collection::vec(any::<u8>(), 64..256),
        size in 1u64..1_000_000,
    ) {
        let extension = KNOWN_EXTENSIONS[ext_idx];
        let declared = mime::guess_from_name(&format!("x.{}", extension));
        let mut head = EXECUTABLE_MAGIC[magic_idx].to_vec();
        head.extend_from_slice(&tail);

        let name = format!("{}.{}", stem, extension);
        let outcome = validator(100.0).validate(&name, declared, size, size, &head);
        prop_assert!(!outcome.is_accepted());
        prop_assert_eq!(outcome.rejection_code(), Some(RejectionCode::ExecutableContent));
    }

    /// Entries above the ratio ceiling fail the byte-free precheck.
    #[test]
    fn prop_bomb_rejected_before_content(
        compressed in 1u64..10_000,
        factor in 1001u64..100_000,
        stem in "[a-z]{1,12}",
    ) {
        // The ratio check runs before the size ceiling, so any size will do
        let declared = compressed * factor;
        let name = format!("{}.txt", stem);
        let rejection = validator(1000.0)
            .precheck(&name, "text/plain", declared, compressed)
            .unwrap_err();
        prop_assert_eq!(rejection.code, RejectionCode::CompressionRatioExceeded);
    }

    /// Any `..` segment is a traversal, whatever else the name looks like.
    #[test]
    fn prop_parent_traversal_rejected(
        prefix in "([a-z]+/){0,4}",
        suffix in "[a-z]{1,8}\\.(pdf|jpg|txt)",
    ) {
        let name = format!("{}../{}", prefix, suffix);
        let declared = mime::guess_from_name(&name);
        let outcome = validator(100.0).validate(&name, declared, 10, 10, b"MZ");
        prop_assert_eq!(outcome.rejection_code(), Some(RejectionCode::PathTraversal));
    }
}
