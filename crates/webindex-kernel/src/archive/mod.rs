//! Forward-only ZIP archive generation.
//!
//! The destination is a live stream that cannot seek, so every file entry
//! uses the ZIP data-descriptor form: the local header goes out without CRC
//! or sizes, the body streams through, and a trailing descriptor carries the
//! values computed on the way. The central directory is written last from
//! records collected during the pass.
//!
//! Memory use per archive is one read chunk, one compressor, the pending
//! output buffer, and one small central-directory record per entry.

mod sink;
mod stream;
mod zip;

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub use self::sink::{ChannelSink, ChunkSink};
pub use self::stream::{ArchiveStream, ArchiveStreamer};
pub use self::zip::ZipWriter;

/// Default read chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of chunks that may sit between producer and consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// How file bodies are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// No compression (method 0).
    #[default]
    Stored,
    /// Raw deflate (method 8).
    Deflated,
}

/// Tuning for archive production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Bytes read from a file per step, and the target output chunk size.
    pub chunk_size: usize,
    pub compression: Compression,
    /// Bounded queue depth between the producer task and the consumer.
    pub channel_capacity: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::Stored,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One `(physical path, archive path)` pair plus the metadata the headers need.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub physical_path: PathBuf,
    /// Slash-separated path inside the archive, without a trailing slash.
    pub archive_path: String,
    pub kind: EntryKind,
    /// Size seen when the entry was enumerated; decides ZIP64 up front.
    pub size_hint: u64,
    pub modified: SystemTime,
    /// Unix mode bits including the file type.
    pub mode: u32,
    /// Canonical root the file must still resolve inside when it is opened.
    pub confine: Option<PathBuf>,
}

impl ArchiveEntry {
    /// Build an entry from already-fetched metadata.
    pub fn from_metadata(
        physical_path: impl Into<PathBuf>,
        archive_path: impl Into<String>,
        meta: &std::fs::Metadata,
    ) -> Self {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Self {
            physical_path: physical_path.into(),
            archive_path: archive_path.into(),
            kind,
            size_hint: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            mode: mode_of(meta),
            confine: None,
        }
    }

    /// Re-check containment under `root` right before the file is read.
    pub fn confined_to(mut self, root: impl Into<PathBuf>) -> Self {
        self.confine = Some(root.into());
        self
    }

    /// Stat `physical_path` (following symlinks) and build an entry.
    pub async fn from_path(
        physical_path: impl Into<PathBuf>,
        archive_path: impl Into<String>,
    ) -> std::io::Result<Self> {
        let physical_path = physical_path.into();
        let meta = tokio::fs::metadata(&physical_path).await?;
        Ok(Self::from_metadata(physical_path, archive_path, &meta))
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Name as written to the archive: directories end in `/`.
    pub fn zip_name(&self) -> String {
        let name = self.archive_path.trim_matches('/');
        if self.is_dir() {
            format!("{name}/")
        } else {
            name.to_string()
        }
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o040755 } else { 0o100644 }
}
