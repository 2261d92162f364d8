//! Archive fixtures shared by the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use ingestor_core::{BatchContext, IngestConfig};
use ingestor_services::ArchiveIngestor;
use ingestor_storage::MemoryStorage;
use tar::{Builder, EntryType, Header};
use uuid::Uuid;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

pub const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];
pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Deterministic incompressible bytes
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Lowercase letters that compress poorly and match no signature
pub fn text(len: usize, seed: u32) -> Vec<u8> {
    noise(len, seed).into_iter().map(|b| b'a' + b % 26).collect()
}

pub fn pdf(len: usize) -> Vec<u8> {
    let mut data = b"%PDF-1.7\n".to_vec();
    data.extend(noise(len.saturating_sub(data.len()), 7));
    data
}

pub fn with_magic(magic: &[u8], len: usize) -> Vec<u8> {
    let mut data = magic.to_vec();
    data.extend(noise(len.saturating_sub(magic.len()), 11));
    data
}

pub fn pe_executable(len: usize) -> Vec<u8> {
    with_magic(b"MZ\x90\x00", len)
}

fn zip_with(method: CompressionMethod, entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(method);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(name, options).unwrap();
        } else {
            writer.start_file(name, options).unwrap();
            writer.write_all(&data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Deflated zip; names ending in `/` become directories
pub fn zip(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    zip_with(CompressionMethod::Deflated, entries)
}

/// Zip with stored (uncompressed) entries, so content appears verbatim
pub fn stored_zip(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    zip_with(CompressionMethod::Stored, entries)
}

pub fn tar(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, Cursor::new(data)).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn tar_with_symlink(link: &str, target: &str) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);
    builder.append_link(&mut header, link, target).unwrap();

    let data = b"regular".to_vec();
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "notes.txt", Cursor::new(data))
        .unwrap();
    builder.into_inner().unwrap()
}

/// Zip holding `notes.txt` and a symlink. Only the central directory marks
/// the link; its local header looks like a file whose content is `target`.
pub fn zip_with_symlink(link: &str, target: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    writer.add_symlink(link, target, options).unwrap();
    writer.start_file("notes.txt", options).unwrap();
    writer.write_all(b"regular").unwrap();
    writer.finish().unwrap().into_inner()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn context(config: IngestConfig) -> BatchContext {
    BatchContext::new(Uuid::new_v4(), Arc::new(config))
}

pub fn memory_ingestor() -> (ArchiveIngestor, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (ArchiveIngestor::new(storage.clone()), storage)
}

/// Retries without the production back-off
pub fn fast_config() -> IngestConfig {
    IngestConfig {
        upload_retry_delay: std::time::Duration::from_millis(1),
        ..Default::default()
    }
}
