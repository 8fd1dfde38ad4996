//! Producer task plus the consumer-side stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::Instrument;

use super::sink::{ChannelSink, ChunkSink};
use super::zip::ZipWriter;
use super::{ArchiveEntry, ArchiveOptions};
use crate::vfs::{VfsError, VfsResult};

/// Produces ZIP archives from already-enumerated entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveStreamer {
    options: ArchiveOptions,
}

impl ArchiveStreamer {
    pub fn new(options: ArchiveOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Write the whole archive for `entries` into `sink`, in order.
    ///
    /// Returns the sink and the archive length. Stops at the first error;
    /// whatever already reached the sink stays there.
    pub async fn write_entries<S: ChunkSink>(
        &self,
        entries: &[ArchiveEntry],
        sink: S,
    ) -> VfsResult<(S, u64)> {
        let mut writer = ZipWriter::new(sink, self.options);
        for entry in entries {
            writer.write_entry(entry).await?;
        }
        writer.finish().await
    }

    /// Start producing on a background task and return the byte stream.
    ///
    /// At most `channel_capacity` chunks are buffered ahead of the consumer.
    /// Dropping the stream cancels production at the next chunk or entry.
    pub fn stream(&self, entries: Vec<ArchiveEntry>) -> ArchiveStream {
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let sink = ChannelSink::new(tx);
        self.spawn_producer(entries, sink.clone(), sink);
        ArchiveStream { rx }
    }

    /// Run `write_entries` into `sink` on a task; fatal errors go to `failer`.
    fn spawn_producer<S>(&self, entries: Vec<ArchiveEntry>, sink: S, failer: ChannelSink)
    where
        S: ChunkSink + 'static,
    {
        let streamer = *self;
        let span = tracing::info_span!("zip", entries = entries.len());

        tokio::spawn(
            async move {
                match streamer.write_entries(&entries, sink).await {
                    Ok((_, bytes)) => tracing::info!(bytes, "Archive complete"),
                    Err(VfsError::Cancelled) => {
                        tracing::info!("Archive consumer went away, stopping")
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Archive aborted");
                        failer.fail(e).await;
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Consumer half of an archive in progress.
///
/// Yields chunks in order. An `Err` item means the archive is truncated and
/// the transport should be aborted; it is always the last item.
pub struct ArchiveStream {
    rx: mpsc::Receiver<VfsResult<Bytes>>,
}

impl std::fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream").finish_non_exhaustive()
    }
}

impl Stream for ArchiveStream {
    type Item = VfsResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
