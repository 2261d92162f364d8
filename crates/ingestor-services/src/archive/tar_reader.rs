use std::io::Read;

use flate2::read::GzDecoder;
use ingestor_core::{ArchiveEntry, IngestError};
use tar::{Archive, EntryType};

use super::{ArchiveFormat, ArchiveReader, EntryVisitor, VisitControl};

/// Single-pass reader for plain and gzip-compressed tar archives.
///
/// Tar stores entries uncompressed, so an entry's compressed size is its
/// declared size and its ratio is always 1.
///
/// Getting from one header to the next means reading (and for gzip,
/// inflating) the data in between, even for entries the visitor never
/// reads. The walk limit bounds that work: once the sizes in the headers
/// passed so far exceed it, the walk fails with `TotalSizeExceeded`.
pub struct TarReader<R: Read> {
    archive: Archive<R>,
    format: ArchiveFormat,
    walk_limit: u64,
}

impl<R: Read> TarReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            archive: Archive::new(reader),
            format: ArchiveFormat::Tar,
            walk_limit: u64::MAX,
        }
    }

    pub fn with_walk_limit(mut self, limit: u64) -> Self {
        self.walk_limit = limit;
        self
    }
}

impl<R: Read> TarReader<GzDecoder<R>> {
    pub fn gzip(reader: R) -> Self {
        Self {
            archive: Archive::new(GzDecoder::new(reader)),
            format: ArchiveFormat::TarGz,
            walk_limit: u64::MAX,
        }
    }
}

/// Extension headers describe the next entry and are not entries themselves
fn is_metadata(kind: EntryType) -> bool {
    kind.is_pax_global_extensions()
        || kind.is_pax_local_extensions()
        || kind.is_gnu_longname()
        || kind.is_gnu_longlink()
}

impl<R: Read + Send> ArchiveReader for TarReader<R> {
    fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn visit_entries(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), IngestError> {
        let format = self.format;
        let limit = self.walk_limit;
        let mut walked: u64 = 0;
        let entries = self
            .archive
            .entries()
            .map_err(|e| IngestError::InvalidArchive(format!("{} archive unreadable: {}", format, e)))?;

        for (index, entry) in entries.enumerate() {
            let mut entry = entry
                .map_err(|e| IngestError::InvalidArchive(format!("corrupt {} header: {}", format, e)))?;
            // Checked before the entry is handed out or skipped over
            walked = walked.saturating_add(entry.size());
            if walked > limit {
                return Err(IngestError::TotalSizeExceeded {
                    current: walked,
                    max: limit,
                });
            }

            let kind = entry.header().entry_type();
            if is_metadata(kind) {
                continue;
            }

            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let archive_entry = if kind.is_dir() {
                ArchiveEntry::directory(name)
            } else if kind.is_file() || kind.is_contiguous() || kind.is_gnu_sparse() {
                let size = entry.size();
                ArchiveEntry::file(name, size, size)
            } else {
                ArchiveEntry::special(name)
            };

            if visitor.visit(index, &archive_entry, &mut entry)? == VisitControl::Stop {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tar::{Builder, Header};

    fn build_tar(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, Cursor::new(data)).unwrap();
        }
        builder.into_inner().unwrap()
    }

    struct Collect(Vec<(ArchiveEntry, Vec<u8>)>);

    impl EntryVisitor for Collect {
        fn visit(
            &mut self,
            _index: usize,
            entry: &ArchiveEntry,
            content: &mut dyn Read,
        ) -> Result<VisitControl, IngestError> {
            let mut data = Vec::new();
            content.read_to_end(&mut data)?;
            self.0.push((entry.clone(), data));
            Ok(VisitControl::Continue)
        }
    }

    #[test]
    fn test_plain_tar() {
        let bytes = build_tar(vec![
            ("a.txt", b"alpha".to_vec()),
            ("nested/b.txt", b"beta".to_vec()),
        ]);
        let mut reader = TarReader::new(Cursor::new(bytes));
        let mut visitor = Collect(Vec::new());
        reader.visit_entries(&mut visitor).unwrap();

        assert_eq!(visitor.0.len(), 2);
        assert_eq!(visitor.0[1].0.name, "nested/b.txt");
        assert_eq!(visitor.0[1].0.declared_size, 4);
        assert_eq!(visitor.0[1].0.compression_ratio(), Some(1.0));
        assert_eq!(visitor.0[1].1, b"beta");
        assert!(!reader.is_indexed());
    }

    #[test]
    fn test_gzip_tar() {
        let tar_bytes = build_tar(vec![("doc.txt", b"hello".to_vec())]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let gz = encoder.finish().unwrap();

        let mut reader = TarReader::gzip(Cursor::new(gz));
        assert_eq!(reader.format(), ArchiveFormat::TarGz);
        let mut visitor = Collect(Vec::new());
        reader.visit_entries(&mut visitor).unwrap();
        assert_eq!(visitor.0[0].1, b"hello");
    }

    #[test]
    fn test_symlink_is_special() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, "latest", "a.txt").unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut reader = TarReader::new(Cursor::new(bytes));
        let mut visitor = Collect(Vec::new());
        reader.visit_entries(&mut visitor).unwrap();
        assert!(visitor.0[0].0.is_special);
    }

    #[test]
    fn test_corrupt_header_is_invalid_archive() {
        let mut bytes = build_tar(vec![("a.txt", b"alpha".to_vec())]);
        // Break the header checksum
        bytes[148] ^= 0x55;
        let mut reader = TarReader::new(Cursor::new(bytes));
        let mut visitor = Collect(Vec::new());
        let err = reader.visit_entries(&mut visitor).unwrap_err();
        assert!(matches!(err, IngestError::InvalidArchive(_)));
    }

    #[test]
    fn test_walk_limit_stops_before_oversized_entry() {
        let tar_bytes = build_tar(vec![
            ("small.txt", vec![b'a'; 100]),
            ("huge.txt", vec![0u8; 64 * 1024]),
            ("after.txt", b"late".to_vec()),
        ]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let gz = encoder.finish().unwrap();

        let mut reader = TarReader::gzip(Cursor::new(gz)).with_walk_limit(4096);
        let mut visitor = Collect(Vec::new());
        let err = reader.visit_entries(&mut visitor).unwrap_err();

        assert!(matches!(
            err,
            IngestError::TotalSizeExceeded {
                current,
                max: 4096
            } if current == 100 + 64 * 1024
        ));
        // The oversized entry is never handed out
        assert_eq!(visitor.0.len(), 1);
        assert_eq!(visitor.0[0].0.name, "small.txt");
    }

    #[test]
    fn test_walk_limit_counts_entries_the_visitor_skips() {
        struct NeverReads(usize);
        impl EntryVisitor for NeverReads {
            fn visit(
                &mut self,
                _index: usize,
                _entry: &ArchiveEntry,
                _content: &mut dyn Read,
            ) -> Result<VisitControl, IngestError> {
                self.0 += 1;
                Ok(VisitControl::Continue)
            }
        }

        let bytes = build_tar(vec![
            ("a.bin", vec![0u8; 3000]),
            ("b.bin", vec![0u8; 3000]),
        ]);
        let mut reader = TarReader::new(Cursor::new(bytes)).with_walk_limit(5000);
        let mut visitor = NeverReads(0);
        assert!(matches!(
            reader.visit_entries(&mut visitor),
            Err(IngestError::TotalSizeExceeded { current: 6000, .. })
        ));
        assert_eq!(visitor.0, 1);
    }

    #[test]
    fn test_reopen_is_refused() {
        let bytes = build_tar(vec![("a.txt", b"alpha".to_vec())]);
        let mut reader = TarReader::new(Cursor::new(bytes));
        let mut visitor = Collect(Vec::new());
        assert!(matches!(
            reader.reopen(0, &mut visitor),
            Err(IngestError::Internal(_))
        ));
    }
}
