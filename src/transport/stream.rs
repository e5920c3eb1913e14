//! [`Channel`] implementation over a tokio byte stream.

use std::any::Any;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::framing::{FrameDecoder, Framing};
use super::{Channel, LinkState};
use crate::error::{NetconfError, Result};

const INBOUND_QUEUE: usize = 64;
const READ_CHUNK: usize = 8 * 1024;

type Inbound = Result<String>;

/// Channel over any `AsyncRead + AsyncWrite` stream.
///
/// A background task reads and deframes inbound messages and publishes link
/// state, so a dropped peer is noticed even while nobody is receiving. A
/// drop is published only after every message received before it has been
/// taken with [`Channel::recv`]. The task is aborted when the channel is
/// dropped.
pub struct StreamChannel {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    inbound: mpsc::Receiver<Inbound>,
    link: watch::Receiver<LinkState>,
    framing: Framing,
    reader: JoinHandle<()>,
    _lease: Option<Box<dyn Any + Send>>,
}

impl StreamChannel {
    /// Start a channel on `stream`. Must be called within a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (link_tx, link) = watch::channel(LinkState::Up);
        let (tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let reader = tokio::spawn(read_loop(read_half, tx, link_tx));

        Self {
            writer: Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>,
            inbound,
            link,
            framing: Framing::EndOfMessage,
            reader,
            _lease: None,
        }
    }

    /// Attach a value that is dropped together with the channel.
    pub fn with_lease(mut self, lease: impl Any + Send) -> Self {
        self._lease = Some(Box::new(lease));
        self
    }

    /// Current outbound framing.
    pub fn framing(&self) -> Framing {
        self.framing
    }
}

async fn read_loop<S>(stream: ReadHalf<S>, tx: mpsc::Sender<Inbound>, link: watch::Sender<LinkState>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let end = pump(stream, &tx).await;
    // Messages already queued stay deliverable; the drop is published once
    // the receiver has taken them all.
    let _ = tx.reserve_many(tx.max_capacity()).await;
    let _ = link.send(end);
}

/// Deframe inbound messages until the stream ends; returns the final link state.
async fn pump<S>(mut stream: ReadHalf<S>, tx: &mpsc::Sender<Inbound>) -> LinkState
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut decoder = FrameDecoder::new();
    loop {
        loop {
            match decoder.decode() {
                Ok(Some(message)) => {
                    if tx.send(Ok(message)).await.is_err() {
                        return LinkState::Eof;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Dropping channel on framing error: {}", e);
                    let _ = tx.send(Err(e)).await;
                    return LinkState::Reset;
                },
            }
        }

        decoder.buffer_mut().reserve(READ_CHUNK);
        match stream.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                if decoder.pending() > 0 {
                    tracing::debug!("Stream closed with {} undelivered bytes", decoder.pending());
                }
                return LinkState::Eof;
            },
            Ok(_) => {},
            Err(e) => {
                tracing::debug!("Stream read failed: {}", e);
                return LinkState::Reset;
            },
        }
    }
}

impl Channel for StreamChannel {
    fn send<'a>(&'a mut self, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.link.borrow().is_down() {
                return Err(NetconfError::Transport("channel is closed".to_string()));
            }
            let frame = self.framing.encode(message);
            self.writer.write_all(&frame).await?;
            self.writer.flush().await?;
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            match self.inbound.recv().await {
                Some(message) => message.map(Some),
                None if *self.link.borrow() == LinkState::Reset => {
                    Err(NetconfError::Transport("connection reset".to_string()))
                },
                None => Ok(None),
            }
        })
    }

    fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    fn link(&self) -> watch::Receiver<LinkState> {
        self.link.clone()
    }

    fn shutdown(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.writer.shutdown().await?;
            Ok(())
        })
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_recv_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = StreamChannel::new(a);
        let mut right = StreamChannel::new(b);

        left.send("<hello/>").await.unwrap();
        assert_eq!(right.recv().await.unwrap().as_deref(), Some("<hello/>"));

        left.set_framing(Framing::Chunked);
        left.send("<rpc/>").await.unwrap();
        assert_eq!(right.recv().await.unwrap().as_deref(), Some("<rpc/>"));
    }

    #[tokio::test]
    async fn test_peer_drop_reports_eof() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = StreamChannel::new(a);
        let right = StreamChannel::new(b);
        let mut link = left.link();

        drop(right);
        link.wait_for(|state| state.is_down()).await.unwrap();
        assert_eq!(*link.borrow(), LinkState::Eof);
        assert_eq!(left.recv().await.unwrap(), None);
        assert!(left.send("<rpc/>").await.is_err());
    }

    #[tokio::test]
    async fn test_eof_waits_for_queued_messages() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = StreamChannel::new(a);
        let mut right = StreamChannel::new(b);
        let mut link = left.link();

        right.send("<rpc-reply/>").await.unwrap();
        drop(right);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*link.borrow(), LinkState::Up);

        assert_eq!(left.recv().await.unwrap().as_deref(), Some("<rpc-reply/>"));
        link.wait_for(|state| state.is_down()).await.unwrap();
        assert_eq!(*link.borrow(), LinkState::Eof);
        assert_eq!(left.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_framing_error_resets_link() {
        let (a, mut raw) = tokio::io::duplex(1024);
        let mut channel = StreamChannel::new(a);

        raw.write_all(b"\n#abc\n").await.unwrap();
        assert!(matches!(channel.recv().await, Err(NetconfError::Protocol(_))));
        assert!(matches!(channel.recv().await, Err(NetconfError::Transport(_))));
    }
}
