//! Ingestor Storage Library
//!
//! This crate provides the object store collaborator used by the ingestion
//! pipeline: the `Storage` trait, tenant-scoped key helpers, and the S3,
//! local filesystem and in-memory backends.
//!
//! # Storage key format
//!
//! Keys are tenant-scoped. The caller supplies the prefix (by default
//! `ingest/{tenant_id}`) and the pipeline appends the entry's sanitized
//! relative path:
//!
//! - `ingest/{tenant_id}/photos/2024/beach.jpg`
//!
//! Keys never contain `..`, empty segments or a leading `/`. Key generation
//! is centralized in the `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use ingestor_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
