//! Shared key generation for storage backends.
//!
//! Key format: `{prefix}/{sanitized relative path}`, where the prefix is
//! supplied by the caller and defaults to `ingest/{tenant_id}`.

use ingestor_core::constants::DEFAULT_KEY_ROOT;
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Default tenant prefix: `ingest/{tenant_id}`.
pub fn tenant_prefix(tenant_id: Uuid) -> String {
    format!("{}/{}", DEFAULT_KEY_ROOT, tenant_id)
}

/// Normalize an archive entry name into a relative object path.
///
/// Backslashes become `/`, empty and `.` segments are dropped, and any `..`
/// segment is refused outright rather than resolved.
pub fn sanitize_relative_path(name: &str) -> StorageResult<String> {
    let normalized = name.replace('\\', "/");
    let mut segments = Vec::new();

    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidKey(format!(
                    "path traversal segment in '{}'",
                    name
                )))
            }
            s if s.chars().any(|c| c.is_control()) => {
                return Err(StorageError::InvalidKey(format!(
                    "control character in '{}'",
                    name
                )))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(StorageError::InvalidKey(format!(
            "'{}' has no usable path segments",
            name
        )));
    }

    Ok(segments.join("/"))
}

/// Join a caller-supplied prefix and a sanitized relative path.
pub fn scoped_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}
