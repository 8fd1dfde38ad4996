//! Download hand-off values for a transport layer.
//!
//! A transport calls [`DownloadService::file`] or [`DownloadService::archive`]
//! with a decoded virtual path and gets back everything it needs to answer:
//! a proxy redirect, or a filename plus a byte stream. Errors returned from
//! these calls happen before any byte is produced; errors yielded by a body
//! stream happen mid-transfer and mean the connection must be aborted.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveOptions, ArchiveStream, ArchiveStreamer};
use crate::vfs::{DEFAULT_WALK_TIMEOUT, Node, PathResolver, VfsError, VfsResult, walk_directory};

/// Content type of archive downloads.
pub const ZIP_MIME: &str = "application/zip";

/// What to send for one download request.
pub enum Download {
    /// Let the front proxy serve the file from `accel_path`.
    Redirect {
        filename: String,
        mime_type: String,
        accel_path: String,
    },
    /// Stream a single file.
    File {
        filename: String,
        mime_type: String,
        size: u64,
        body: BoxStream<'static, VfsResult<Bytes>>,
    },
    /// Stream a ZIP of a directory.
    Archive { filename: String, body: ArchiveStream },
}

impl Download {
    pub fn filename(&self) -> &str {
        match self {
            Download::Redirect { filename, .. }
            | Download::File { filename, .. }
            | Download::Archive { filename, .. } => filename,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Download::Redirect { mime_type, .. } | Download::File { mime_type, .. } => mime_type,
            Download::Archive { .. } => ZIP_MIME,
        }
    }

    /// `Content-Disposition` header value for this download.
    pub fn content_disposition(&self) -> String {
        content_disposition(self.filename())
    }

    /// Take the body as a boxed stream; `None` for redirects.
    pub fn into_body(self) -> Option<BoxStream<'static, VfsResult<Bytes>>> {
        match self {
            Download::Redirect { .. } => None,
            Download::File { body, .. } => Some(body),
            Download::Archive { body, .. } => Some(body.boxed()),
        }
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Download::Redirect {
                filename,
                mime_type,
                accel_path,
            } => f
                .debug_struct("Redirect")
                .field("filename", filename)
                .field("mime_type", mime_type)
                .field("accel_path", accel_path)
                .finish(),
            Download::File {
                filename,
                mime_type,
                size,
                ..
            } => f
                .debug_struct("File")
                .field("filename", filename)
                .field("mime_type", mime_type)
                .field("size", size)
                .finish_non_exhaustive(),
            Download::Archive { filename, .. } => f
                .debug_struct("Archive")
                .field("filename", filename)
                .finish_non_exhaustive(),
        }
    }
}

/// Resolves download requests into [`Download`] values.
#[derive(Debug, Clone)]
pub struct DownloadService {
    resolver: PathResolver,
    streamer: ArchiveStreamer,
    walk_timeout: Duration,
}

impl DownloadService {
    pub fn new(resolver: PathResolver, options: ArchiveOptions, walk_timeout: Duration) -> Self {
        Self {
            resolver,
            streamer: ArchiveStreamer::new(options),
            walk_timeout,
        }
    }

    /// Service with default archive options and walk timeout.
    pub fn with_defaults(resolver: PathResolver) -> Self {
        Self::new(resolver, ArchiveOptions::default(), DEFAULT_WALK_TIMEOUT)
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Single-file download.
    ///
    /// Mounts with an accel base get a redirect and no bytes are read.
    /// Otherwise the file is opened now, so a vanished file is reported
    /// before the transport commits to a response.
    pub async fn file(&self, virtual_path: &str) -> VfsResult<Download> {
        let node = self.resolver.navigate(virtual_path).await?;
        let Node::File(file) = node else {
            return Err(VfsError::invalid_operation(format!(
                "{virtual_path:?} is a directory; download it as an archive"
            )));
        };

        let filename = file.location().name().to_string();
        let mime_type = file.mime_type().to_string();

        if let Some(accel_path) = file.accel_redirect_path() {
            tracing::info!(path = %virtual_path, accel = %accel_path, "Redirecting download");
            return Ok(Download::Redirect {
                filename,
                mime_type,
                accel_path: accel_path.to_string(),
            });
        }

        let physical = file.location().physical_path().to_path_buf();
        let handle = tokio::fs::File::open(&physical).await?;
        let chunk_size = self.streamer.options().chunk_size.max(1);
        let display = physical.display().to_string();
        let body = ReaderStream::with_capacity(handle, chunk_size)
            .map(move |chunk| chunk.map_err(|e| VfsError::streaming(display.clone(), e)))
            .boxed();

        tracing::info!(path = %virtual_path, size = file.size(), "Streaming file");
        Ok(Download::File {
            filename,
            mime_type,
            size: file.size(),
            body,
        })
    }

    /// Directory download as a ZIP stream.
    ///
    /// The whole walk finishes before this returns, so a timeout or a
    /// cancelled request surfaces here with nothing sent.
    pub async fn archive(
        &self,
        virtual_path: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<Download> {
        let node = self.resolver.navigate(virtual_path).await?;
        let dir = match node {
            Node::Directory(dir) => dir,
            Node::VirtualRoot(_) => {
                return Err(VfsError::invalid_operation(
                    "the virtual root cannot be archived",
                ));
            }
            Node::File(_) => {
                return Err(VfsError::invalid_operation(format!(
                    "{virtual_path:?} is a file; download it directly"
                )));
            }
        };

        let entries = walk_directory(&dir, self.walk_timeout, cancel).await?;
        let filename = format!("{}.zip", dir.location().name());
        tracing::info!(
            path = %virtual_path,
            entries = entries.len(),
            filename = %filename,
            "Starting archive download"
        );
        Ok(Download::Archive {
            filename,
            body: self.streamer.stream(entries),
        })
    }
}

/// Render an `attachment` disposition for `filename`.
///
/// Non-ASCII names get an ASCII fallback plus an RFC 5987 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => format!("\\{c}"),
            c if c.is_ascii() && !c.is_ascii_control() => c.to_string(),
            _ => "_".to_string(),
        })
        .collect();

    if filename.is_ascii() {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            ext_value_encode(filename)
        )
    }
}

/// RFC 5987 `attr-char` is alphanumerics plus these; everything else is escaped.
const EXT_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

fn ext_value_encode(value: &str) -> String {
    utf8_percent_encode(value, EXT_VALUE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{MimeTable, Mount, MountTable};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> DownloadService {
        let books = dir.path().join("books");
        let audio = dir.path().join("audio");
        std::fs::create_dir_all(books.join("series")).unwrap();
        std::fs::create_dir_all(&audio).unwrap();
        std::fs::write(books.join("series/one.epub"), "first").unwrap();
        std::fs::write(audio.join("track.mp3"), vec![7u8; 3000]).unwrap();

        let mounts = MountTable::new([
            Mount::new("books", &books, Some("/internal/books".into())).unwrap(),
            Mount::new("audio", &audio, None).unwrap(),
        ])
        .unwrap();
        let resolver = PathResolver::new(Arc::new(mounts), Arc::new(MimeTable::builtin()));
        let options = ArchiveOptions {
            chunk_size: 1024,
            ..ArchiveOptions::default()
        };
        DownloadService::new(resolver, options, DEFAULT_WALK_TIMEOUT)
    }

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("a b.zip"),
            "attachment; filename=\"a b.zip\""
        );
        assert_eq!(
            content_disposition("say \"hi\".txt"),
            "attachment; filename=\"say \\\"hi\\\".txt\""
        );
    }

    #[test]
    fn test_content_disposition_utf8() {
        assert_eq!(
            content_disposition("caf\u{e9}.txt"),
            "attachment; filename=\"caf_.txt\"; filename*=UTF-8''caf%C3%A9.txt"
        );
    }

    #[test]
    fn test_ext_value_keeps_attr_chars() {
        assert_eq!(ext_value_encode("a-b_c.d~e!f"), "a-b_c.d~e!f");
        assert_eq!(ext_value_encode("x y;z'"), "x%20y%3Bz%27");
        assert_eq!(ext_value_encode("\u{65e5}"), "%E6%97%A5");
    }

    #[tokio::test]
    async fn test_file_redirect_with_accel() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let download = svc.file("books/series/one.epub").await.unwrap();
        match download {
            Download::Redirect {
                filename,
                mime_type,
                accel_path,
            } => {
                assert_eq!(filename, "one.epub");
                assert_eq!(mime_type, "application/epub+zip");
                assert_eq!(accel_path, "/internal/books/series/one.epub");
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_stream_without_accel() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let download = svc.file("audio/track.mp3").await.unwrap();
        assert_eq!(download.content_type(), "audio/mpeg");
        assert_eq!(
            download.content_disposition(),
            "attachment; filename=\"track.mp3\""
        );

        let mut body = download.into_body().unwrap();
        let mut total = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 1024);
            total += chunk.len();
        }
        assert_eq!(total, 3000);
    }

    #[tokio::test]
    async fn test_file_on_directory_is_invalid() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(matches!(
            svc.file("books/series").await,
            Err(VfsError::InvalidOperation(_))
        ));
        assert!(matches!(svc.file("").await, Err(VfsError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_archive_on_file_or_root_is_invalid() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let cancel = CancellationToken::new();
        assert!(matches!(
            svc.archive("audio/track.mp3", &cancel).await,
            Err(VfsError::InvalidOperation(_))
        ));
        assert!(matches!(
            svc.archive("/", &cancel).await,
            Err(VfsError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_filename() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let download = svc
            .archive("books/series", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(download.filename(), "series.zip");
        assert_eq!(download.content_type(), ZIP_MIME);

        let mut body = download.into_body().unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(&bytes[..4], b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(matches!(
            svc.file("books/nope.epub").await,
            Err(VfsError::NotFound(_))
        ));
        assert!(matches!(
            svc.archive("video", &CancellationToken::new()).await,
            Err(VfsError::NotFound(_))
        ));
    }
}
