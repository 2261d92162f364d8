//! Configuration module
//!
//! Ingestion limits (`IngestConfig`) and storage backend settings
//! (`StorageConfig`). Both are read once, validated, and then shared
//! immutably; a batch never observes a configuration change mid-flight.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::models::{FileCategory, SkipReason};
use crate::storage_types::StorageBackend;

const MB: u64 = 1024 * 1024;

// Common constants
const MAX_IMAGE_SIZE_MB: u64 = 10;
const MAX_VIDEO_SIZE_MB: u64 = 500;
const MAX_AUDIO_SIZE_MB: u64 = 100;
const MAX_DOCUMENT_SIZE_MB: u64 = 50;
const MAX_DEFAULT_SIZE_MB: u64 = 10;
const MAX_ENTRY_COUNT: usize = 10_000;
const MAX_TOTAL_SIZE_MB: u64 = 10 * 1024;
const MAX_COMPRESSION_RATIO: f64 = 100.0;
const MAX_CONCURRENT_UPLOADS: usize = 4;
const UPLOAD_RETRY_DELAY_MS: u64 = 500;

const DEFAULT_ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "audio/mpeg",
    "audio/wav",
    "audio/ogg",
    "audio/flac",
    "audio/mp4",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "text/csv",
];

/// A noise pattern and the reason reported when it matches.
///
/// Shell glob (`*`, `?`, `[abc]`) matched against each `/`-separated
/// component of the entry name, case-insensitively. A trailing `/`
/// (`.git/`) restricts the pattern to directory components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipPattern {
    pub pattern: String,
    pub reason: SkipReason,
}

impl SkipPattern {
    pub fn new(pattern: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            pattern: pattern.into(),
            reason,
        }
    }

    /// Whether the pattern only matches directory components
    pub fn directory_only(&self) -> bool {
        self.pattern.ends_with('/') || self.pattern.ends_with('\\')
    }

    /// The glob applied to a single component, without the directory marker
    pub fn component_glob(&self) -> String {
        self.pattern.replace('\\', "/").trim_end_matches('/').to_string()
    }
}

/// Built-in list of editor, OS and VCS artifacts that are never ingested.
pub fn default_skip_patterns() -> Vec<SkipPattern> {
    use SkipReason::*;

    let patterns: &[(&str, SkipReason)] = &[
        // Hidden OS metadata
        (".DS_Store", OsMetadata),
        ("desktop.ini", OsMetadata),
        (".directory", OsMetadata),
        (".Spotlight-V100/", OsMetadata),
        (".Trashes/", OsMetadata),
        (".fseventsd/", OsMetadata),
        (".TemporaryItems/", OsMetadata),
        ("$RECYCLE.BIN/", OsMetadata),
        // Resource forks
        ("__MACOSX/", ResourceFork),
        ("._*", ResourceFork),
        // Thumbnail caches
        ("Thumbs.db", ThumbnailCache),
        ("ehthumbs.db", ThumbnailCache),
        ("ehthumbs_vista.db", ThumbnailCache),
        (".thumbnails/", ThumbnailCache),
        // Version control
        (".git/", VersionControl),
        (".svn/", VersionControl),
        (".hg/", VersionControl),
        (".bzr/", VersionControl),
        ("CVS/", VersionControl),
        (".gitignore", VersionControl),
        (".gitattributes", VersionControl),
        (".gitkeep", VersionControl),
        // Editor swap and backup files
        ("*.swp", EditorArtifact),
        ("*.swo", EditorArtifact),
        ("*~", EditorArtifact),
        ("#*#", EditorArtifact),
        ("*.bak", EditorArtifact),
        (".idea/", EditorArtifact),
        (".vscode/", EditorArtifact),
        // Lock files
        ("~$*", LockFile),
        (".~lock.*", LockFile),
        (".lock", LockFile),
    ];

    patterns
        .iter()
        .map(|(pattern, reason)| SkipPattern::new(*pattern, *reason))
        .collect()
}

/// Ingestion limits and policy
///
/// Pass by reference or wrap in `Arc`; the orchestrator shares one instance
/// across the reader thread and every upload task.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub max_image_size: u64,
    pub max_video_size: u64,
    pub max_audio_size: u64,
    pub max_document_size: u64,
    /// Ceiling for files outside the four named categories
    pub max_default_size: u64,
    /// Declared types that may be ingested (lowercase, no parameters)
    pub allowed_content_types: Vec<String>,
    /// Hard ceiling on entries per archive, directories and links included
    pub max_entry_count: usize,
    /// Hard ceiling on cumulative extracted bytes per archive. For tar input
    /// it also caps the sizes of every entry passed over, read or not.
    pub max_total_size: u64,
    /// Maximum declared/compressed size ratio of a single entry
    pub max_compression_ratio: f64,
    pub skip_patterns: Vec<SkipPattern>,
    /// Size of one streaming chunk in bytes
    pub chunk_size: usize,
    /// Maximum number of entries uploading at the same time
    pub max_concurrent_uploads: usize,
    /// Pause before the single retry of a transient upload failure
    pub upload_retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_image_size: MAX_IMAGE_SIZE_MB * MB,
            max_video_size: MAX_VIDEO_SIZE_MB * MB,
            max_audio_size: MAX_AUDIO_SIZE_MB * MB,
            max_document_size: MAX_DOCUMENT_SIZE_MB * MB,
            max_default_size: MAX_DEFAULT_SIZE_MB * MB,
            allowed_content_types: DEFAULT_ALLOWED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_entry_count: MAX_ENTRY_COUNT,
            max_total_size: MAX_TOTAL_SIZE_MB * MB,
            max_compression_ratio: MAX_COMPRESSION_RATIO,
            skip_patterns: default_skip_patterns(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            upload_retry_delay: Duration::from_millis(UPLOAD_RETRY_DELAY_MS),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let mut config = IngestConfig {
            max_image_size: env_or("INGEST_MAX_IMAGE_SIZE_MB", MAX_IMAGE_SIZE_MB) * MB,
            max_video_size: env_or("INGEST_MAX_VIDEO_SIZE_MB", MAX_VIDEO_SIZE_MB) * MB,
            max_audio_size: env_or("INGEST_MAX_AUDIO_SIZE_MB", MAX_AUDIO_SIZE_MB) * MB,
            max_document_size: env_or("INGEST_MAX_DOCUMENT_SIZE_MB", MAX_DOCUMENT_SIZE_MB) * MB,
            max_default_size: env_or("INGEST_MAX_DEFAULT_SIZE_MB", MAX_DEFAULT_SIZE_MB) * MB,
            max_entry_count: env_or("INGEST_MAX_ENTRY_COUNT", MAX_ENTRY_COUNT),
            max_total_size: env_or("INGEST_MAX_TOTAL_SIZE_MB", MAX_TOTAL_SIZE_MB) * MB,
            max_compression_ratio: env_or("INGEST_MAX_COMPRESSION_RATIO", MAX_COMPRESSION_RATIO),
            max_concurrent_uploads: env_or("INGEST_MAX_CONCURRENT_UPLOADS", MAX_CONCURRENT_UPLOADS),
            upload_retry_delay: Duration::from_millis(env_or(
                "INGEST_UPLOAD_RETRY_DELAY_MS",
                UPLOAD_RETRY_DELAY_MS,
            )),
            ..Default::default()
        };

        if let Ok(types) = env::var("INGEST_ALLOWED_CONTENT_TYPES") {
            config.allowed_content_types = parse_list(&types);
        }

        if let Ok(kb) = env::var("INGEST_CHUNK_SIZE_KB") {
            let kb: usize = kb
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("INGEST_CHUNK_SIZE_KB must be a valid number"))?;
            config.chunk_size = kb * 1024;
        }

        if let Ok(extra) = env::var("INGEST_EXTRA_SKIP_PATTERNS") {
            config.skip_patterns.extend(
                parse_list(&extra)
                    .into_iter()
                    .map(|p| SkipPattern::new(p, SkipReason::Custom)),
            );
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let ceilings = [
            ("max_image_size", self.max_image_size),
            ("max_video_size", self.max_video_size),
            ("max_audio_size", self.max_audio_size),
            ("max_document_size", self.max_document_size),
            ("max_default_size", self.max_default_size),
            ("max_total_size", self.max_total_size),
        ];
        for (name, value) in ceilings {
            if value == 0 {
                return Err(anyhow::anyhow!("{} must be greater than zero", name));
            }
        }

        if self.max_entry_count == 0 {
            return Err(anyhow::anyhow!("max_entry_count must be greater than zero"));
        }

        if !(self.max_compression_ratio > 1.0) {
            return Err(anyhow::anyhow!(
                "max_compression_ratio must be greater than 1.0 (got {})",
                self.max_compression_ratio
            ));
        }

        if self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "allowed_content_types must contain at least one type"
            ));
        }

        for skip in &self.skip_patterns {
            let glob = skip.component_glob();
            if glob.is_empty() {
                return Err(anyhow::anyhow!(
                    "skip pattern {:?} has no name to match",
                    skip.pattern
                ));
            }
            glob::Pattern::new(&glob).map_err(|e| {
                anyhow::anyhow!("invalid skip pattern {:?}: {}", skip.pattern, e)
            })?;
        }

        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk_size must be greater than zero"));
        }

        if self.max_concurrent_uploads == 0 {
            return Err(anyhow::anyhow!(
                "max_concurrent_uploads must be greater than zero"
            ));
        }

        Ok(())
    }

    /// Size ceiling for a file category
    pub fn max_size_for(&self, category: FileCategory) -> u64 {
        match category {
            FileCategory::Image => self.max_image_size,
            FileCategory::Video => self.max_video_size,
            FileCategory::Audio => self.max_audio_size,
            FileCategory::Document => self.max_document_size,
            FileCategory::Other => self.max_default_size,
        }
    }

    /// Whether a declared type is on the allow-list.
    ///
    /// Comparison ignores case and any `;` parameters.
    pub fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let normalized = normalize_content_type(content_type);
        self.allowed_content_types
            .iter()
            .any(|allowed| normalize_content_type(allowed) == normalized)
    }
}

/// Lowercases a content type and strips parameters (`text/plain; charset=utf-8`).
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Storage backend configuration
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    // Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, etc.)
    pub s3_endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: None,
            local_storage_base_url: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Local,
        };

        let config = StorageConfig {
            backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!("S3_BUCKET must be set for the s3 backend"));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set for the s3 backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set for the local backend"
                    ));
                }
            }
            StorageBackend::Memory => {}
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
