//! # webindex-kernel
//!
//! Read-only virtual filesystem over several physical directories, with
//! streamed ZIP downloads.
//!
//! The kernel owns the security-relevant parts of a file index:
//! - A fixed table of named mounts, each bound to one physical root
//! - Path resolution that never leaves a mount root, whatever `..` or
//!   symlinks say
//! - Directory archives produced front to back with bounded memory, for
//!   transports that cannot seek
//!
//! Routing and rendering live elsewhere; they hand in decoded virtual paths
//! and consume [`Node`] metadata or [`Download`] byte streams.

pub mod archive;
pub mod config;
pub mod download;
pub mod vfs;

pub use archive::{
    ArchiveEntry, ArchiveOptions, ArchiveStream, ArchiveStreamer, ChannelSink, ChunkSink,
    Compression, EntryKind, ZipWriter,
};
pub use config::{ArchiveConfig, Config, ConfigError, MountConfig};
pub use download::{Download, DownloadService, content_disposition};
pub use vfs::{
    ClientSignal, DirectoryNode, FileNode, MimeTable, Mount, MountTable, Node, NodeInfo,
    NodeKind, PathResolver, VfsError, VfsResult, sort_listing, walk_directory,
};
