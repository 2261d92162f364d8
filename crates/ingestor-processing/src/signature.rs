//! Magic-byte content signatures.
//!
//! Binary formats are identified with `infer`. A small markup pass runs
//! after it for what `infer` does not look at: SVG, script-bearing XML and
//! script tags buried in text.
//!
//! Only the first [`SIGNATURE_WINDOW`] bytes of an entry are ever inspected.

use std::fmt;

use infer::MatcherType;

pub use ingestor_core::constants::SIGNATURE_WINDOW;

/// Format family recognised from leading content bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    // Executables
    PortableExecutable,
    Elf,
    MachO,
    ShebangScript,
    /// Bytecode and other loadable program formats
    Bytecode(&'static str),
    // Markup
    Html,
    Svg,
    XmlScript,
    // Documents and containers
    Pdf,
    ZipContainer,
    Ole2,
    // Images
    Jpeg,
    Png,
    Gif,
    WebP,
    Bmp,
    Tiff,
    // Audio and video
    Mp3,
    Wav,
    Ogg,
    Flac,
    IsoMedia,
    Matroska,
    /// Anything else `infer` recognises, by its MIME type
    Other(&'static str),
}

impl Signature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signature::PortableExecutable => "portable-executable",
            Signature::Elf => "elf",
            Signature::MachO => "mach-o",
            Signature::ShebangScript => "shebang-script",
            Signature::Bytecode(mime) => mime,
            Signature::Html => "html",
            Signature::Svg => "svg",
            Signature::XmlScript => "xml-script",
            Signature::Pdf => "pdf",
            Signature::ZipContainer => "zip",
            Signature::Ole2 => "ole2",
            Signature::Jpeg => "jpeg",
            Signature::Png => "png",
            Signature::Gif => "gif",
            Signature::WebP => "webp",
            Signature::Bmp => "bmp",
            Signature::Tiff => "tiff",
            Signature::Mp3 => "mp3",
            Signature::Wav => "wav",
            Signature::Ogg => "ogg",
            Signature::Flac => "flac",
            Signature::IsoMedia => "iso-bmff",
            Signature::Matroska => "matroska",
            Signature::Other(mime) => mime,
        }
    }

    /// Native executables, bytecode and interpreter scripts
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            Signature::PortableExecutable
                | Signature::Elf
                | Signature::MachO
                | Signature::ShebangScript
                | Signature::Bytecode(_)
        )
    }

    /// Content a browser would render or execute
    pub fn is_markup(&self) -> bool {
        matches!(self, Signature::Html | Signature::Svg | Signature::XmlScript)
    }

    /// Declared types this content may legitimately be uploaded as
    pub fn compatible_types(&self) -> &[&'static str] {
        match self {
            Signature::PortableExecutable => &["application/vnd.microsoft.portable-executable"],
            Signature::Elf | Signature::MachO | Signature::Bytecode(_) => &[],
            Signature::ShebangScript => &["application/x-sh"],
            Signature::Html => &["text/html", "application/xhtml+xml"],
            Signature::Svg => &["image/svg+xml"],
            Signature::XmlScript => &["application/xml", "text/xml", "application/xhtml+xml"],
            Signature::Pdf => &["application/pdf"],
            Signature::ZipContainer => &[
                "application/zip",
                "application/x-zip-compressed",
                "application/epub+zip",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "application/vnd.oasis.opendocument.text",
                "application/vnd.oasis.opendocument.spreadsheet",
                "application/vnd.oasis.opendocument.presentation",
            ],
            Signature::Ole2 => &[
                "application/msword",
                "application/vnd.ms-excel",
                "application/vnd.ms-powerpoint",
                "application/x-msi",
            ],
            Signature::Jpeg => &["image/jpeg"],
            Signature::Png => &["image/png"],
            Signature::Gif => &["image/gif"],
            Signature::WebP => &["image/webp"],
            Signature::Bmp => &["image/bmp"],
            Signature::Tiff => &["image/tiff"],
            Signature::Mp3 => &["audio/mpeg", "audio/mp3"],
            Signature::Wav => &["audio/wav", "audio/wave", "audio/x-wav"],
            Signature::Ogg => &["audio/ogg", "application/ogg", "video/ogg"],
            Signature::Flac => &["audio/flac", "audio/x-flac"],
            Signature::IsoMedia => &[
                "video/mp4",
                "video/quicktime",
                "video/x-m4v",
                "audio/mp4",
                "audio/x-m4a",
                "image/avif",
                "image/heic",
            ],
            Signature::Matroska => &["video/webm", "video/x-matroska", "audio/webm"],
            Signature::Other("application/gzip") => &["application/gzip", "application/x-gzip"],
            Signature::Other("application/rtf") => &["application/rtf", "text/rtf"],
            Signature::Other(mime) => std::slice::from_ref(mime),
        }
    }

    pub fn is_compatible_with(&self, mime_type: &str) -> bool {
        if self.compatible_types().contains(&mime_type) {
            return true;
        }
        // Media formats without a family of their own only need to agree on
        // the top-level type (`image/vnd.microsoft.icon` for `image/x-icon`)
        match self {
            Signature::Other(mime) => {
                let family = mime.split('/').next();
                matches!(family, Some("image" | "audio" | "video"))
                    && family == mime_type.split('/').next()
            }
            _ => false,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared types whose content always starts with a recognisable signature.
///
/// An entry declaring one of these types with no detectable signature is
/// treated as spoofed.
pub fn requires_signature(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/jpeg"
            | "image/png"
            | "image/gif"
            | "image/webp"
            | "image/bmp"
            | "image/tiff"
            | "application/pdf"
            | "audio/flac"
            | "audio/x-flac"
            | "audio/wav"
            | "audio/wave"
            | "audio/x-wav"
            | "audio/ogg"
            | "application/msword"
            | "application/vnd.ms-excel"
            | "application/vnd.ms-powerpoint"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
    )
}

/// Identify the format family of `head`.
///
/// Bytes beyond [`SIGNATURE_WINDOW`] are ignored.
pub fn detect(head: &[u8]) -> Option<Signature> {
    let head = &head[..head.len().min(SIGNATURE_WINDOW)];

    match infer::get(head) {
        Some(kind) if kind.mime_type() == "text/xml" => detect_markup(head),
        Some(kind) => from_infer(kind, head),
        None => detect_markup(head),
    }
}

fn from_infer(kind: infer::Type, head: &[u8]) -> Option<Signature> {
    let mime = kind.mime_type();
    let signature = match mime {
        "application/vnd.microsoft.portable-executable" => Signature::PortableExecutable,
        "application/x-executable" => Signature::Elf,
        "application/x-mach-binary" => Signature::MachO,
        "text/x-shellscript" => Signature::ShebangScript,
        // DER certificates are filed with the program formats
        "application/x-x509-ca-cert" => Signature::Other(mime),
        _ if kind.matcher_type() == MatcherType::App => Signature::Bytecode(mime),
        "text/html" => Signature::Html,
        "application/pdf" => Signature::Pdf,
        "application/zip"
        | "application/epub+zip"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        | "application/vnd.oasis.opendocument.text"
        | "application/vnd.oasis.opendocument.spreadsheet"
        | "application/vnd.oasis.opendocument.presentation" => Signature::ZipContainer,
        "application/msword"
        | "application/vnd.ms-excel"
        | "application/vnd.ms-powerpoint"
        | "application/x-ole-storage" => Signature::Ole2,
        "image/jpeg" => Signature::Jpeg,
        "image/png" | "image/apng" => Signature::Png,
        "image/gif" => Signature::Gif,
        "image/webp" => Signature::WebP,
        // Two ASCII letters are not enough: require the zeroed reserved field
        "image/bmp" if is_bmp_header(head) => Signature::Bmp,
        "image/bmp" => return detect_markup(head),
        "image/tiff" => Signature::Tiff,
        "audio/mpeg" => Signature::Mp3,
        "audio/x-wav" | "audio/wav" => Signature::Wav,
        "audio/ogg" | "audio/opus" | "video/ogg" => Signature::Ogg,
        "audio/x-flac" | "audio/flac" => Signature::Flac,
        "video/mp4" | "video/x-m4v" | "video/quicktime" | "audio/m4a" | "audio/x-m4a"
        | "image/heif" | "image/avif" => Signature::IsoMedia,
        "video/x-matroska" | "video/webm" => Signature::Matroska,
        _ => Signature::Other(mime),
    };
    Some(signature)
}

fn is_bmp_header(head: &[u8]) -> bool {
    head.len() >= 14 && head[6..10] == [0u8; 4]
}

fn detect_markup(head: &[u8]) -> Option<Signature> {
    let text = String::from_utf8_lossy(head).to_lowercase();
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();

    if !trimmed.starts_with('<') {
        // Script tags smuggled into otherwise plain text
        return text.contains("<script").then_some(Signature::Html);
    }

    const HTML_MARKERS: &[&str] = &[
        "<!doctype html",
        "<html",
        "<head",
        "<body",
        "<script",
        "<iframe",
        "<object",
        "<embed",
    ];

    if HTML_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
        return Some(Signature::Html);
    }
    if trimmed.starts_with("<svg") || text.contains("<svg") {
        return Some(Signature::Svg);
    }
    if trimmed.starts_with("<?xml")
        && (text.contains("<script") || text.contains("javascript:") || text.contains("<html"))
    {
        return Some(Signature::XmlScript);
    }
    if text.contains("<script") {
        return Some(Signature::Html);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A realistic header: magic followed by enough bytes for every matcher
    fn padded(magic: &[u8]) -> Vec<u8> {
        let mut head = magic.to_vec();
        head.resize(128, 0x01);
        head
    }

    #[test]
    fn test_executables() {
        assert_eq!(detect(&padded(b"MZ\x90\x00\x03")), Some(Signature::PortableExecutable));
        assert_eq!(detect(&padded(b"\x7FELF\x02\x01\x01")), Some(Signature::Elf));
        assert_eq!(
            detect(&padded(&[0xCF, 0xFA, 0xED, 0xFE, 7, 0, 0, 1])),
            Some(Signature::MachO)
        );
        assert!(detect(&padded(&[0xFE, 0xED, 0xFA, 0xCE])).is_some_and(|s| s.is_executable()));
        assert!(detect(&padded(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 2]))
            .is_some_and(|s| s.is_executable()));
        assert_eq!(detect(b"#!/bin/sh\nrm -rf /"), Some(Signature::ShebangScript));
        assert!(detect(&padded(b"\0asm\x01\0\0\0")).is_some_and(|s| s.is_executable()));
        assert!(Signature::MachO.is_executable());
        assert!(!Signature::Pdf.is_executable());
    }

    #[test]
    fn test_markup() {
        assert_eq!(detect(b"<!DOCTYPE html><html>"), Some(Signature::Html));
        assert_eq!(detect(b"\xEF\xBB\xBF  <HTML>"), Some(Signature::Html));
        assert_eq!(
            detect(b"<?xml version=\"1.0\"?><svg onload=\"alert(1)\">"),
            Some(Signature::Svg)
        );
        assert_eq!(
            detect(b"<?xml version=\"1.0\"?><a><script>x</script></a>"),
            Some(Signature::XmlScript)
        );
        assert_eq!(detect(b"hello <script>alert(1)</script>"), Some(Signature::Html));
        assert_eq!(detect(b"<?xml version=\"1.0\"?><note/>"), None);
    }

    #[test]
    fn test_media_and_documents() {
        assert_eq!(detect(b"%PDF-1.7\n"), Some(Signature::Pdf));
        assert_eq!(detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(Signature::Jpeg));
        assert_eq!(
            detect(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Some(Signature::Png)
        );
        assert_eq!(detect(b"GIF89a"), Some(Signature::Gif));
        assert_eq!(detect(b"RIFF\x10\0\0\0WEBPVP8 "), Some(Signature::WebP));
        assert_eq!(detect(b"RIFF\x10\0\0\0WAVEfmt "), Some(Signature::Wav));
        assert_eq!(detect(&padded(b"PK\x03\x04\x14\0")), Some(Signature::ZipContainer));
        assert_eq!(detect(b"ID3\x04\0"), Some(Signature::Mp3));
        assert_eq!(detect(&[0xFF, 0xFB, 0x90, 0x00]), Some(Signature::Mp3));
        assert_eq!(detect(&padded(b"\0\0\0\x18ftypmp42")), Some(Signature::IsoMedia));
        assert_eq!(
            detect(&padded(b"\x1A\x45\xDF\xA3\x93\x42\x82\x88matroska")),
            Some(Signature::Matroska)
        );
        assert_eq!(detect(b"fLaC\0\0\0\x22"), Some(Signature::Flac));
        assert_eq!(detect(&padded(b"OggS\0\x02")), Some(Signature::Ogg));
        assert_eq!(
            detect(&padded(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])),
            Some(Signature::Ole2)
        );
    }

    #[test]
    fn test_bmp_needs_more_than_two_letters() {
        let mut bmp = b"BM\x36\x00\x0C\x00\x00\x00\x00\x00\x36\x00\x00\x00".to_vec();
        bmp.resize(64, 0xFF);
        assert_eq!(detect(&bmp), Some(Signature::Bmp));
        assert_eq!(detect(b"BMW service history, 2019-2024"), None);
    }

    #[test]
    fn test_plain_content_has_no_signature() {
        assert_eq!(detect(b"name,age\nalice,30\n"), None);
        assert_eq!(detect(b""), None);
        assert_eq!(detect(&[0u8; 64]), None);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut head = vec![b'a'; SIGNATURE_WINDOW];
        head.extend_from_slice(b"<script>alert(1)</script>");
        assert_eq!(detect(&head), None);
    }

    #[test]
    fn test_compatibility() {
        assert!(Signature::ZipContainer.is_compatible_with(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        ));
        assert!(Signature::Ole2.is_compatible_with("application/msword"));
        assert!(!Signature::Png.is_compatible_with("image/jpeg"));
        assert!(Signature::Other("image/vnd.microsoft.icon").is_compatible_with("image/x-icon"));
        assert!(Signature::Other("application/gzip").is_compatible_with("application/x-gzip"));
        assert!(!Signature::Other("application/vnd.rar").is_compatible_with("application/pdf"));
        assert!(requires_signature("image/jpeg"));
        assert!(!requires_signature("text/plain"));
    }
}
