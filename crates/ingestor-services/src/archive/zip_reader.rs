use std::io::{self, Read, Seek};

use ingestor_core::{ArchiveEntry, IngestError};
use zip::read::{read_zipfile_from_stream, ZipFile};
use zip::result::ZipError;
use zip::ZipArchive;

use super::{ArchiveFormat, ArchiveReader, EntryVisitor, VisitControl};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
/// Fixed part of a central directory record, signature excluded
const CENTRAL_HEADER_LEN: usize = 42;
/// `version made by` hosts whose external attributes carry a Unix mode
const UNIX_HOSTS: [u8; 2] = [3, 19];

fn entry_from_zipfile(file: &ZipFile<'_>) -> ArchiveEntry {
    let name = file.name().to_string();
    if file.is_dir() {
        return ArchiveEntry::directory(name);
    }
    if file.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
        return ArchiveEntry::special(name);
    }
    ArchiveEntry::file(name, file.size(), file.compressed_size())
}

fn invalid(err: ZipError) -> IngestError {
    IngestError::InvalidArchive(err.to_string())
}

/// Content reader for an entry the zip crate refuses to decode
struct UndecodableEntry(&'static str);

impl Read for UndecodableEntry {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, self.0))
    }
}

/// Central directory records that mark a symlink, as (record position, name).
///
/// Expects the reader just past the first record's signature, which is where
/// `read_zipfile_from_stream` leaves it. Reads at most `records` records.
fn central_directory_links<R: Read>(
    reader: &mut R,
    records: usize,
) -> io::Result<Vec<(usize, String)>> {
    let mut links = Vec::new();
    for position in 0..records {
        if position > 0 {
            let mut signature = [0u8; 4];
            reader.read_exact(&mut signature)?;
            if u32::from_le_bytes(signature) != CENTRAL_HEADER_SIGNATURE {
                break;
            }
        }

        let mut fixed = [0u8; CENTRAL_HEADER_LEN];
        reader.read_exact(&mut fixed)?;
        let host = fixed[1];
        let name_len = u16::from_le_bytes([fixed[24], fixed[25]]) as usize;
        let extra_len = u16::from_le_bytes([fixed[26], fixed[27]]) as u64;
        let comment_len = u16::from_le_bytes([fixed[28], fixed[29]]) as u64;
        let external = u32::from_le_bytes([fixed[34], fixed[35], fixed[36], fixed[37]]);

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        io::copy(&mut reader.take(extra_len + comment_len), &mut io::sink())?;

        let mode = external >> 16;
        if UNIX_HOSTS.contains(&host) && mode & S_IFMT == S_IFLNK {
            links.push((position, String::from_utf8_lossy(&name).into_owned()));
        }
    }
    Ok(links)
}

/// Single-pass zip reader driven by local file headers.
///
/// Entries whose sizes live only in a trailing data descriptor cannot be
/// streamed and fail the archive; use a seekable input for those.
///
/// Local headers carry no file mode, so links are only known once the
/// central directory at the end of the stream is reached. Entries found to
/// be links there are handed to [`EntryVisitor::revoke`].
pub struct ZipStreamReader<R> {
    reader: R,
}

impl<R: Read + Send> ZipStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Send> ArchiveReader for ZipStreamReader<R> {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn visit_entries(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), IngestError> {
        let mut names = Vec::new();
        loop {
            // Dropping the file drains whatever the visitor left unread
            let mut file = match read_zipfile_from_stream(&mut self.reader) {
                Ok(Some(file)) => file,
                Ok(None) => break,
                Err(e) => return Err(invalid(e)),
            };
            let entry = entry_from_zipfile(&file);
            let index = names.len();
            names.push(entry.name.clone());
            if visitor.visit(index, &entry, &mut file)? == VisitControl::Stop {
                return Ok(());
            }
        }

        let links = central_directory_links(&mut self.reader, names.len()).map_err(|e| {
            IngestError::InvalidArchive(format!("central directory unreadable: {}", e))
        })?;
        for (position, name) in links {
            // Records normally follow local order; fall back to the name
            let index = if names.get(position) == Some(&name) {
                Some(position)
            } else {
                names.iter().position(|n| *n == name)
            };
            if let Some(index) = index {
                visitor.revoke(index, &ArchiveEntry::special(name))?;
            }
        }
        Ok(())
    }
}

/// Zip reader over a seekable source, driven by the central directory
pub struct ZipIndexReader<R> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek + Send> ZipIndexReader<R> {
    pub fn new(reader: R) -> Result<Self, IngestError> {
        let archive = ZipArchive::new(reader).map_err(invalid)?;
        Ok(Self { archive })
    }

    fn visit_index(
        &mut self,
        index: usize,
        visitor: &mut dyn EntryVisitor,
    ) -> Result<VisitControl, IngestError> {
        let entry = {
            let raw = self.archive.by_index_raw(index).map_err(invalid)?;
            entry_from_zipfile(&raw)
        };

        if entry.is_directory || entry.is_special {
            return visitor.visit(index, &entry, &mut io::empty());
        }

        match self.archive.by_index(index) {
            Ok(mut file) => visitor.visit(index, &entry, &mut file),
            // Unsupported method or encryption: the entry is unreadable, the
            // archive is fine
            Err(ZipError::UnsupportedArchive(reason)) => {
                visitor.visit(index, &entry, &mut UndecodableEntry(reason))
            }
            Err(e) => Err(invalid(e)),
        }
    }
}

impl<R: Read + Seek + Send> ArchiveReader for ZipIndexReader<R> {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn is_indexed(&self) -> bool {
        true
    }

    fn entry_count_hint(&mut self) -> Option<usize> {
        Some(self.archive.len())
    }

    fn visit_entries(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), IngestError> {
        for index in 0..self.archive.len() {
            if self.visit_index(index, visitor)? == VisitControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn reopen(&mut self, index: usize, visitor: &mut dyn EntryVisitor) -> Result<(), IngestError> {
        if index >= self.archive.len() {
            return Err(IngestError::Internal(format!(
                "entry index {} out of range ({} entries)",
                index,
                self.archive.len()
            )));
        }
        self.visit_index(index, visitor).map(|_| ())
    }
}
