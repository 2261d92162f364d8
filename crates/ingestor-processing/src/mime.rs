//! Extension to MIME type table and file categories.

use ingestor_core::constants::FALLBACK_CONTENT_TYPE;
use ingestor_core::FileCategory;

const MARKUP_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "image/svg+xml",
    "text/xml",
    "application/xml",
    "text/javascript",
    "application/javascript",
];

/// Lowercased extension of the final path component.
///
/// Dotfiles without a further dot (`.bashrc`) have no extension.
pub fn extension_of(name: &str) -> Option<String> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Declared types an extension may legitimately carry.
///
/// The first entry is the canonical type. Unknown extensions return `None`
/// and are not cross-checked.
pub fn accepted_types_for_extension(extension: &str) -> Option<&'static [&'static str]> {
    let types: &'static [&'static str] = match extension {
        // Images
        "jpg" | "jpeg" | "jpe" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "webp" => &["image/webp"],
        "avif" => &["image/avif"],
        "heic" => &["image/heic"],
        "bmp" => &["image/bmp"],
        "tif" | "tiff" => &["image/tiff"],
        "ico" => &["image/x-icon", "image/vnd.microsoft.icon"],
        "svg" => &["image/svg+xml"],
        // Videos
        "mp4" => &["video/mp4"],
        "webm" => &["video/webm"],
        "mov" => &["video/quicktime"],
        "avi" => &["video/x-msvideo"],
        "mkv" => &["video/x-matroska"],
        "m4v" => &["video/x-m4v", "video/mp4"],
        // Audio
        "mp3" => &["audio/mpeg", "audio/mp3"],
        "wav" => &["audio/wav", "audio/wave", "audio/x-wav"],
        "ogg" | "oga" => &["audio/ogg", "application/ogg"],
        "m4a" => &["audio/mp4", "audio/x-m4a"],
        "flac" => &["audio/flac", "audio/x-flac"],
        "aac" => &["audio/aac"],
        // Documents
        "pdf" => &["application/pdf"],
        "doc" => &["application/msword"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "xls" => &["application/vnd.ms-excel"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "ppt" => &["application/vnd.ms-powerpoint"],
        "pptx" => &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
        "odt" => &["application/vnd.oasis.opendocument.text"],
        "ods" => &["application/vnd.oasis.opendocument.spreadsheet"],
        "odp" => &["application/vnd.oasis.opendocument.presentation"],
        "epub" => &["application/epub+zip"],
        "rtf" => &["application/rtf", "text/rtf"],
        "txt" | "text" => &["text/plain"],
        "md" | "markdown" => &["text/markdown", "text/plain"],
        "csv" => &["text/csv", "text/plain"],
        "json" => &["application/json"],
        // Markup
        "html" | "htm" => &["text/html"],
        "xhtml" => &["application/xhtml+xml"],
        "xml" => &["application/xml", "text/xml"],
        "js" | "mjs" => &["text/javascript", "application/javascript"],
        // Archives
        "zip" => &["application/zip", "application/x-zip-compressed"],
        "tar" => &["application/x-tar"],
        "gz" | "tgz" => &["application/gzip", "application/x-gzip"],
        // Executables
        "exe" | "dll" | "com" | "scr" => &["application/vnd.microsoft.portable-executable"],
        "msi" => &["application/x-msi"],
        "sh" => &["application/x-sh"],
        _ => return None,
    };
    Some(types)
}

/// Declared type for an archive entry, derived from its name alone.
pub fn guess_from_name(name: &str) -> &'static str {
    extension_of(name)
        .and_then(|ext| accepted_types_for_extension(&ext))
        .and_then(|types| types.first().copied())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

/// Size-limit category for a declared type
pub fn category_for(mime_type: &str) -> FileCategory {
    let mime_type = mime_type.to_lowercase();
    if mime_type.starts_with("image/") {
        FileCategory::Image
    } else if mime_type.starts_with("video/") {
        FileCategory::Video
    } else if mime_type.starts_with("audio/") || mime_type == "application/ogg" {
        FileCategory::Audio
    } else if mime_type == "application/pdf"
        || mime_type == "application/msword"
        || mime_type == "application/rtf"
        || mime_type == "application/epub+zip"
        || mime_type == "application/json"
        || mime_type.starts_with("application/vnd.ms-")
        || mime_type.starts_with("application/vnd.openxmlformats-officedocument.")
        || mime_type.starts_with("application/vnd.oasis.opendocument.")
        || mime_type.starts_with("text/")
    {
        FileCategory::Document
    } else {
        FileCategory::Other
    }
}

/// Whether a declared type is browser-renderable markup or script
pub fn is_markup_type(mime_type: &str) -> bool {
    let mime_type = mime_type.to_lowercase();
    MARKUP_TYPES.contains(&mime_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/Photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("notes.pdf.exe").as_deref(), Some("exe"));
        assert_eq!(extension_of("dir\\file.txt").as_deref(), Some("txt"));
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_guess_from_name() {
        assert_eq!(guess_from_name("document.pdf"), "application/pdf");
        assert_eq!(guess_from_name("photo.jpeg"), "image/jpeg");
        assert_eq!(guess_from_name("song.mp3"), "audio/mpeg");
        assert_eq!(guess_from_name("data.unknownext"), "application/octet-stream");
        assert_eq!(guess_from_name("Makefile"), "application/octet-stream");
    }

    #[test]
    fn test_accepted_types() {
        let wav = accepted_types_for_extension("wav").unwrap();
        assert!(wav.contains(&"audio/wave"));
        assert!(accepted_types_for_extension("jpg")
            .unwrap()
            .iter()
            .all(|t| *t != "image/png"));
        assert!(accepted_types_for_extension("xyz").is_none());
    }

    #[test]
    fn test_category_for() {
        assert_eq!(category_for("image/png"), FileCategory::Image);
        assert_eq!(category_for("video/quicktime"), FileCategory::Video);
        assert_eq!(category_for("audio/flac"), FileCategory::Audio);
        assert_eq!(category_for("application/pdf"), FileCategory::Document);
        assert_eq!(
            category_for("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            FileCategory::Document
        );
        assert_eq!(category_for("text/csv"), FileCategory::Document);
        assert_eq!(category_for("application/zip"), FileCategory::Other);
    }

    #[test]
    fn test_markup_types() {
        assert!(is_markup_type("text/html"));
        assert!(is_markup_type("IMAGE/SVG+XML"));
        assert!(!is_markup_type("text/plain"));
    }
}
