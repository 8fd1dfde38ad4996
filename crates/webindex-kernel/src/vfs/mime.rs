//! Extension → MIME type lookup.
//!
//! Layers, later wins:
//!
//! 1. built-in defaults (common web types)
//! 2. the platform `mime.types` file, when one exists
//! 3. domain overrides for e-book, audio-book and comic-archive formats
//!
//! The table is built once and injected into the resolver; there is no
//! process-wide registry.

use std::collections::HashMap;
use std::path::Path;

/// Fallback type for unknown extensions.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Where platform MIME definitions usually live.
pub const SYSTEM_MIME_TYPES: &str = "/etc/mime.types";

const BUILTIN: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("text", "text/plain"),
    ("log", "text/plain"),
    ("md", "text/markdown"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("apng", "image/apng"),
    ("avif", "image/avif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/vnd.microsoft.icon"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("opus", "audio/ogg"),
    ("flac", "audio/flac"),
    ("wav", "audio/x-wav"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("zip", "application/zip"),
    ("tar", "application/x-tar"),
    ("gz", "application/gzip"),
    ("tgz", "application/gzip"),
    ("bz2", "application/x-bzip2"),
    ("xz", "application/x-xz"),
    ("7z", "application/x-7z-compressed"),
    ("rar", "application/vnd.rar"),
    ("iso", "application/x-iso9660-image"),
    ("doc", "application/msword"),
    ("rtf", "application/rtf"),
    ("djvu", "image/vnd.djvu"),
    ("fb2", "application/x-fictionbook+xml"),
];

/// Formats this index is mostly used for; applied last.
const OVERRIDES: &[(&str, &str)] = &[
    ("m4b", "audio/mp4"),
    ("mp3", "audio/mpeg"),
    ("mobi", "application/x-mobipocket-ebook"),
    ("epub", "application/epub+zip"),
    ("azw", "application/vnd.amazon.ebook"),
    ("azw3", "application/vnd.amazon.ebook"),
    ("cbr", "application/x-cbr"),
    ("cbz", "application/x-cbr"),
    ("wma", "audio/x-ms-wma"),
    ("pdf", "application/pdf"),
    ("mkv", "video/x-matroska"),
];

/// Types a browser can render in place.
const INLINE_TYPES: &[&str] = &[
    "text/plain",
    "image/apng",
    "image/avif",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/svg+xml",
    "application/pdf",
];

/// Immutable extension lookup table.
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    by_ext: HashMap<String, String>,
}

impl MimeTable {
    /// An empty table: every lookup falls back to [`DEFAULT_MIME`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in defaults plus domain overrides, no platform file.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.extend(BUILTIN);
        table.extend(OVERRIDES);
        table
    }

    /// Built-in defaults, then [`SYSTEM_MIME_TYPES`] if readable, then overrides.
    pub fn with_system_defaults() -> Self {
        Self::with_platform_file(Path::new(SYSTEM_MIME_TYPES))
    }

    /// Like [`with_system_defaults`](Self::with_system_defaults) with an explicit file.
    pub fn with_platform_file(path: &Path) -> Self {
        let mut table = Self::empty();
        table.extend(BUILTIN);
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let added = table.parse_mime_types(&text);
                tracing::debug!(path = %path.display(), added, "Loaded platform mime types");
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No platform mime types");
            }
        }
        table.extend(OVERRIDES);
        table
    }

    /// Add or replace a mapping. Leading dots are ignored.
    pub fn insert(&mut self, ext: &str, mime: impl Into<String>) {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() {
            self.by_ext.insert(ext, mime.into());
        }
    }

    fn extend(&mut self, pairs: &[(&str, &str)]) {
        for (ext, mime) in pairs {
            self.insert(ext, *mime);
        }
    }

    /// Merge a `mime.types` document (`type ext ext ...` per line).
    ///
    /// Returns the number of extensions added or replaced.
    pub fn parse_mime_types(&mut self, text: &str) -> usize {
        let mut added = 0;
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let mut fields = line.split_whitespace();
            let Some(mime) = fields.next() else {
                continue;
            };
            if !mime.contains('/') {
                continue;
            }
            for ext in fields {
                self.insert(ext, mime);
                added += 1;
            }
        }
        added
    }

    /// MIME type for a file name, by its last extension.
    pub fn guess(&self, filename: &str) -> &str {
        extension(filename)
            .and_then(|ext| self.by_ext.get(&ext))
            .map(String::as_str)
            .unwrap_or(DEFAULT_MIME)
    }

    /// Number of known extensions.
    pub fn len(&self) -> usize {
        self.by_ext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ext.is_empty()
    }

    /// The part of a MIME type before the slash.
    pub fn class_of(mime: &str) -> &str {
        mime.split('/').next().unwrap_or(mime)
    }

    /// True for types a browser can display without downloading.
    pub fn is_inline(mime: &str) -> bool {
        INLINE_TYPES.contains(&mime)
    }
}

fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    // ".bashrc" has no extension
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
