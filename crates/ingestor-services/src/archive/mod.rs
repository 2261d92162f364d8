//! Archive readers.
//!
//! Readers walk an archive one entry at a time and hand each entry's
//! decompressed content to an [`EntryVisitor`] as a plain `Read`. Nothing is
//! extracted to disk and no entry is buffered whole. Readers are blocking and
//! are driven from a blocking thread by the ingestion orchestrator.

mod tar_reader;
mod zip_reader;

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use ingestor_core::{ArchiveEntry, IngestError};

pub use tar_reader::TarReader;
pub use zip_reader::{ZipIndexReader, ZipStreamReader};

/// Bytes looked at when sniffing the container format (one tar block)
const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "tar.gz" | "tgz" | "targz" => Ok(ArchiveFormat::TarGz),
            _ => Err(format!("Invalid archive format: {}", s)),
        }
    }
}

/// Identify the container from its leading bytes.
///
/// Gzip is assumed to wrap a tar; anything else inside fails later as an
/// invalid archive.
pub fn detect_format(head: &[u8]) -> Option<ArchiveFormat> {
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return Some(ArchiveFormat::Zip);
    }
    if head.starts_with(&[0x1F, 0x8B]) {
        return Some(ArchiveFormat::TarGz);
    }
    if head.len() >= 262 && &head[257..262] == b"ustar" {
        return Some(ArchiveFormat::Tar);
    }
    None
}

/// What a visitor wants the reader to do after an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    Continue,
    Stop,
}

/// Receives archive entries in archive order.
pub trait EntryVisitor {
    /// `index` is the entry's position in the archive and is what
    /// [`ArchiveReader::reopen`] takes. `content` yields the decompressed
    /// bytes; a read error means this entry is corrupt, not the archive.
    fn visit(
        &mut self,
        index: usize,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> Result<VisitControl, IngestError>;

    /// An entry already visited turned out to be a link or special file.
    ///
    /// Only single-pass zip streams call this, once the central directory
    /// at the end of the stream has been read.
    fn revoke(&mut self, _index: usize, _entry: &ArchiveEntry) -> Result<(), IngestError> {
        Ok(())
    }
}

pub trait ArchiveReader: Send {
    fn format(&self) -> ArchiveFormat;

    /// Whether entries can be re-opened after the first pass
    fn is_indexed(&self) -> bool {
        false
    }

    /// Number of entries of any kind, when known without reading content
    fn entry_count_hint(&mut self) -> Option<usize> {
        None
    }

    /// Walk every entry once.
    ///
    /// Container-level corruption surfaces as an error and ends the walk.
    fn visit_entries(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), IngestError>;

    /// Visit a single entry again by index
    fn reopen(&mut self, index: usize, _visitor: &mut dyn EntryVisitor) -> Result<(), IngestError> {
        Err(IngestError::Internal(format!(
            "entry {} cannot be re-opened from a single-pass {} stream",
            index,
            self.format()
        )))
    }
}

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Where archive bytes come from
pub enum ArchiveInput {
    /// Random-access source. Zip archives are read through their central
    /// directory and entries can be re-opened for a retry.
    Seekable(Box<dyn ReadSeek + Send>),
    /// Single-pass source such as a request body or a pipe
    Stream(Box<dyn Read + Send>),
}

impl ArchiveInput {
    pub fn open_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(ArchiveInput::Seekable(Box::new(io::BufReader::new(file))))
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        ArchiveInput::Seekable(Box::new(io::Cursor::new(data.into())))
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        ArchiveInput::Stream(Box::new(reader))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, ArchiveInput::Seekable(_))
    }
}

impl fmt::Debug for ArchiveInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveInput::Seekable(_) => f.write_str("ArchiveInput::Seekable"),
            ArchiveInput::Stream(_) => f.write_str("ArchiveInput::Stream"),
        }
    }
}

/// Sniff the format and build the matching reader.
///
/// `walk_limit` caps the bytes a tar reader may pass over, read or skipped.
/// Blocking: reads the first block of the input.
pub fn open_reader(
    input: ArchiveInput,
    walk_limit: u64,
) -> Result<Box<dyn ArchiveReader>, IngestError> {
    match input {
        ArchiveInput::Seekable(mut reader) => {
            let head = read_prefix(&mut reader, SNIFF_LEN)?;
            let format = sniff(&head)?;
            reader.seek(SeekFrom::Start(0))?;
            Ok(match format {
                ArchiveFormat::Zip => Box::new(ZipIndexReader::new(reader)?),
                ArchiveFormat::Tar => Box::new(TarReader::new(reader).with_walk_limit(walk_limit)),
                ArchiveFormat::TarGz => {
                    Box::new(TarReader::gzip(reader).with_walk_limit(walk_limit))
                }
            })
        }
        ArchiveInput::Stream(mut reader) => {
            let head = read_prefix(&mut reader, SNIFF_LEN)?;
            let format = sniff(&head)?;
            // Put the sniffed bytes back in front of the rest
            let replayed: Box<dyn Read + Send> = Box::new(io::Cursor::new(head).chain(reader));
            Ok(match format {
                ArchiveFormat::Zip => Box::new(ZipStreamReader::new(replayed)),
                ArchiveFormat::Tar => Box::new(TarReader::new(replayed).with_walk_limit(walk_limit)),
                ArchiveFormat::TarGz => {
                    Box::new(TarReader::gzip(replayed).with_walk_limit(walk_limit))
                }
            })
        }
    }
}

fn sniff(head: &[u8]) -> Result<ArchiveFormat, IngestError> {
    if head.is_empty() {
        return Err(IngestError::InvalidArchive("input is empty".to_string()));
    }
    detect_format(head).ok_or(IngestError::UnsupportedFormat)
}

/// Read up to `limit` bytes, stopping early only at end of input.
pub(crate) fn read_prefix<R: Read + ?Sized>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    (&mut *reader).take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
