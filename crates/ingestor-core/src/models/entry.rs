use serde::{Deserialize, Serialize};
use std::fmt;

/// One record inside an archive, as described by the archive's own index.
///
/// Every field is untrusted. The value only lives while the reader is
/// positioned on the entry and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Raw path as stored in the archive
    pub name: String,
    /// Uncompressed byte count claimed by the archive
    pub declared_size: u64,
    /// Compressed byte count claimed by the archive
    pub compressed_size: u64,
    pub is_directory: bool,
    /// Symlink, hard link, device node or FIFO; never has content
    pub is_special: bool,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>, declared_size: u64, compressed_size: u64) -> Self {
        Self {
            name: name.into(),
            declared_size,
            compressed_size,
            is_directory: false,
            is_special: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_size: 0,
            compressed_size: 0,
            is_directory: true,
            is_special: false,
        }
    }

    pub fn special(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_size: 0,
            compressed_size: 0,
            is_directory: false,
            is_special: true,
        }
    }

    /// Ratio of declared to compressed size.
    ///
    /// Returns `None` for empty entries. A zero compressed size with a
    /// non-zero declared size yields `f64::INFINITY`.
    pub fn compression_ratio(&self) -> Option<f64> {
        compression_ratio(self.declared_size, self.compressed_size)
    }
}

/// Declared/compressed ratio with the same edge cases as
/// [`ArchiveEntry::compression_ratio`].
pub fn compression_ratio(declared_size: u64, compressed_size: u64) -> Option<f64> {
    if declared_size == 0 {
        return None;
    }
    if compressed_size == 0 {
        return Some(f64::INFINITY);
    }
    Some(declared_size as f64 / compressed_size as f64)
}

/// Size-limit category of an accepted file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Document => "document",
            FileCategory::Other => "other",
        };
        f.write_str(name)
    }
}
