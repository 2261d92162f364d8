//! Pipeline-wide constants.

/// Number of leading content bytes inspected for magic-byte signatures.
///
/// The window is fixed and independent of the entry size so that signature
/// inspection never decompresses more than this many bytes of an entry.
pub const SIGNATURE_WINDOW: usize = 1024;

/// Default size of a streaming chunk (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks buffered between the archive reader and one upload.
pub const CHUNK_CHANNEL_CAPACITY: usize = 2;

/// Default object key prefix root; tenant keys are `ingest/{tenant_id}/...`.
pub const DEFAULT_KEY_ROOT: &str = "ingest";

/// Declared type used when nothing better can be derived from a name.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Maximum length in bytes of one path component inside an archive.
pub const MAX_NAME_COMPONENT_LEN: usize = 255;
