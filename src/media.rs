//! Extension classification: search categories, preview policy, avatars.
//!
//! Extensions are informational only — nothing routes on them except the
//! preview generator and the search category filter.  Comparison is always
//! on the lowercased extension without the dot.

/// Coarse category used by the search filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Image,
    Document,
    Video,
    Audio,
    Archive,
    Other,
}

const IMAGE: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "ico"];
const DOCUMENT: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "txt", "md", "rtf", "csv",
];
const VIDEO: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "m4v"];
const AUDIO: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];
const ARCHIVE: &[&str] = &["zip", "tar", "gz", "bz2", "xz", "7z", "rar"];

/// Text-like extensions whose previews are a plain truncation.
const TEXT_LIKE: &[&str] = &[
    "txt", "md", "csv", "log", "json", "xml", "yml", "yaml", "toml", "ini", "html", "css", "js",
    "ts", "py", "rs", "sh",
];

/// Extensions accepted for account avatars.
const AVATAR: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Text previews keep at most this many plaintext bytes.
pub const PREVIEW_TEXT_BYTES: usize = 16 * 1024;
/// Images above this size get no preview at all.
pub const PREVIEW_IMAGE_MAX_BYTES: usize = 1024 * 1024;

impl MediaCategory {
    /// Classify a lowercased extension.
    pub fn of(extension: &str) -> Self {
        let ext = extension.to_ascii_lowercase();
        let ext = ext.as_str();
        if IMAGE.contains(&ext) {
            MediaCategory::Image
        } else if DOCUMENT.contains(&ext) {
            MediaCategory::Document
        } else if VIDEO.contains(&ext) {
            MediaCategory::Video
        } else if AUDIO.contains(&ext) {
            MediaCategory::Audio
        } else if ARCHIVE.contains(&ext) {
            MediaCategory::Archive
        } else {
            MediaCategory::Other
        }
    }

    /// Parse a CLI/search filter string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image" | "images" => Some(MediaCategory::Image),
            "document" | "documents" | "doc" => Some(MediaCategory::Document),
            "video" | "videos" => Some(MediaCategory::Video),
            "audio" => Some(MediaCategory::Audio),
            "archive" | "archives" => Some(MediaCategory::Archive),
            "other" => Some(MediaCategory::Other),
            _ => None,
        }
    }
}

pub fn is_avatar_extension(extension: &str) -> bool {
    AVATAR.contains(&extension.to_ascii_lowercase().as_str())
}

/// Produce a preview buffer for a file, or `None` when the extension is not
/// whitelisted or the content is too large to preview.
///
/// Text-like files are truncated to [`PREVIEW_TEXT_BYTES`].  Images pass
/// through whole when small enough — a real buffer is still produced, so
/// `has_preview` may honestly be recorded as true.
pub fn render_preview(extension: &str, data: &[u8]) -> Option<Vec<u8>> {
    let ext = extension.to_ascii_lowercase();
    if TEXT_LIKE.contains(&ext.as_str()) {
        return Some(data[..data.len().min(PREVIEW_TEXT_BYTES)].to_vec());
    }
    if IMAGE.contains(&ext.as_str()) && data.len() <= PREVIEW_IMAGE_MAX_BYTES {
        return Some(data.to_vec());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(MediaCategory::of("PNG"), MediaCategory::Image);
        assert_eq!(MediaCategory::of("pdf"), MediaCategory::Document);
        assert_eq!(MediaCategory::of("tar"), MediaCategory::Archive);
        assert_eq!(MediaCategory::of("weird"), MediaCategory::Other);
    }

    #[test]
    fn text_preview_truncates() {
        let data = vec![b'x'; PREVIEW_TEXT_BYTES * 2];
        let p = render_preview("txt", &data).unwrap();
        assert_eq!(p.len(), PREVIEW_TEXT_BYTES);
    }

    #[test]
    fn oversized_image_has_no_preview() {
        let data = vec![0u8; PREVIEW_IMAGE_MAX_BYTES + 1];
        assert!(render_preview("png", &data).is_none());
        assert!(render_preview("exe", b"MZ").is_none());
    }
}
