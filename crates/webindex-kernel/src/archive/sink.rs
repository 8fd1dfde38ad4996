//! Destinations for archive chunks.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::vfs::{VfsError, VfsResult};

/// Where a [`ZipWriter`](super::ZipWriter) hands finished chunks.
///
/// Sends are the per-chunk cancellation checkpoint: a sink whose consumer
/// is gone returns [`VfsError::Cancelled`] and the writer stops.
#[async_trait]
pub trait ChunkSink: Send {
    /// Deliver one chunk, waiting while the consumer is behind.
    async fn send_chunk(&mut self, chunk: Bytes) -> VfsResult<()>;

    /// True once the consumer has gone away.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Bounded-channel sink. The channel depth caps how far the producer can
/// run ahead of the transport.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<VfsResult<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<VfsResult<Bytes>>) -> Self {
        Self { tx }
    }

    /// Pass a fatal error to the consumer. Ignored if it is already gone.
    pub async fn fail(&self, err: VfsError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn send_chunk(&mut self, chunk: Bytes) -> VfsResult<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| VfsError::Cancelled)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Collects chunks in memory. Useful for tests and small archives.
#[async_trait]
impl ChunkSink for Vec<Bytes> {
    async fn send_chunk(&mut self, chunk: Bytes) -> VfsResult<()> {
        self.push(chunk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        sink.send_chunk(Bytes::from_static(b"abc")).await.unwrap();
        let got = rx.recv().await.unwrap().unwrap();
        assert_eq!(&got[..], b"abc");
    }

    #[tokio::test]
    async fn test_channel_sink_cancelled_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.send_chunk(Bytes::from_static(b"x")).await,
            Err(VfsError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_vec_sink() {
        let mut sink: Vec<Bytes> = Vec::new();
        sink.send_chunk(Bytes::from_static(b"1")).await.unwrap();
        sink.send_chunk(Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert!(!sink.is_closed());
    }
}
