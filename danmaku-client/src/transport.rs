//! ## TRANSPORT ADAPTER (C2)
//!
//! Abstracts `send`/`receive_exact` over an underlying byte stream so the
//! connection core (C4) never has to know whether it is talking to a raw
//! TCP socket or a WebSocket. Both directions are "all-or-fail": a partial
//! write or read is itself an error, never a value the caller has to loop
//! on (§4.2).
//!
//! The receive loop and heartbeat loop run as two independent tasks sharing
//! one connection, so each transport variant is split into an owned read
//! half and an owned write half rather than guarded behind one shared lock
//! — a lock shared between them would let a stalled read starve every
//! outgoing heartbeat.

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use futures_util::sink::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{DanmakuError, Result};

/// Shared contract for every transport variant, before splitting (§4.2).
#[async_trait]
pub trait Transport: Send {
    /// Writes `buf` in full or fails; never returns having written a prefix.
    async fn send(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()>;

    /// Fills `buf` completely or fails; never returns having filled a prefix.
    async fn receive_exact(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<()>;

    /// Best-effort close; errors are not actionable at this point in the
    /// shutdown path, so implementations swallow them.
    async fn close(&mut self);
}

/// Write half produced by splitting a [`Transport`].
#[async_trait]
pub trait TransportWriter: Send {
    async fn send(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()>;
    async fn close(&mut self);
}

/// Read half produced by splitting a [`Transport`].
#[async_trait]
pub trait TransportReader: Send {
    async fn receive_exact(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<()>;
}

async fn cancellable_write<W: AsyncWrite + Unpin + Send>(
    w: &mut W,
    buf: &[u8],
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DanmakuError::Cancelled),
        res = w.write_all(buf) => res.map_err(DanmakuError::from),
    }
}

async fn cancellable_read_exact<R: AsyncRead + Unpin + Send>(
    r: &mut R,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DanmakuError::Cancelled),
        res = r.read_exact(buf) => {
            match res {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Err(DanmakuError::TransportClosed)
                }
                Err(e) => Err(DanmakuError::from(e)),
            }
        }
    }
}

// ─── Raw byte-stream transport (TCP and the in-memory mock) ───────────────────

/// A [`Transport`] over any `AsyncRead + AsyncWrite` byte stream —
/// implements both the TCP variant and the in-memory mock used by tests.
pub struct StreamTransport<S> {
    inner: S,
}

impl<S> StreamTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for StreamTransport<S> {
    async fn send(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()> {
        cancellable_write(&mut self.inner, buf, cancel).await
    }

    async fn receive_exact(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<()> {
        cancellable_read_exact(&mut self.inner, buf, cancel).await
    }

    async fn close(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

pub type TcpTransport = StreamTransport<TcpStream>;

impl TcpTransport {
    /// Dials `host:port` and wraps the resulting socket.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::new(stream))
    }
}

/// Builds a connected pair of in-memory transports for integration tests —
/// one end plays the client, the other plays a scripted server.
pub fn mock_pair(buffer_size: usize) -> (StreamTransport<DuplexStream>, StreamTransport<DuplexStream>) {
    let (a, b) = tokio::io::duplex(buffer_size);
    (StreamTransport::new(a), StreamTransport::new(b))
}

struct StreamWriteHalf<W>(W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for StreamWriteHalf<W> {
    async fn send(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()> {
        cancellable_write(&mut self.0, buf, cancel).await
    }

    async fn close(&mut self) {
        let _ = self.0.shutdown().await;
    }
}

struct StreamReadHalf<R>(R);

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for StreamReadHalf<R> {
    async fn receive_exact(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<()> {
        cancellable_read_exact(&mut self.0, buf, cancel).await
    }
}

fn split_stream_transport<S: AsyncRead + AsyncWrite + Unpin + Send + 'static>(
    t: StreamTransport<S>,
) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
    let (r, w) = tokio::io::split(t.inner);
    (Box::new(StreamWriteHalf(w)), Box::new(StreamReadHalf(r)))
}

// ─── WebSocket transport ───────────────────────────────────────────────────────

/// A [`Transport`] that frames each `send` as a single binary WebSocket
/// message and, on read, accumulates inbound binary messages into an
/// internal buffer from which `receive_exact` draws (§4.2).
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    read_buf: Vec<u8>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| DanmakuError::DecodeError(format!("websocket connect failed: {e}")))?;
        Ok(Self {
            stream,
            read_buf: Vec::new(),
        })
    }

    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
        }
    }
}

async fn fill_one_message<St>(stream: &mut St, read_buf: &mut Vec<u8>) -> Result<()>
where
    St: futures_util::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Binary(data))) => {
                read_buf.extend_from_slice(&data);
                return Ok(());
            }
            Some(Ok(WsMessage::Close(_))) | None => return Err(DanmakuError::TransportClosed),
            Some(Ok(_)) => continue, // ping/pong/text — not part of this protocol
            Some(Err(e)) => return Err(DanmakuError::DecodeError(e.to_string())),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DanmakuError::Cancelled),
            res = self.stream.send(WsMessage::Binary(buf.to_vec())) => {
                res.map_err(|e| DanmakuError::DecodeError(e.to_string()))
            }
        }
    }

    async fn receive_exact(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<()> {
        while self.read_buf.len() < buf.len() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DanmakuError::Cancelled),
                res = fill_one_message(&mut self.stream, &mut self.read_buf) => res?,
            }
        }
        let drained: Vec<u8> = self.read_buf.drain(..buf.len()).collect();
        buf.copy_from_slice(&drained);
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

struct WsWriteHalf<Si> {
    sink: Si,
}

#[async_trait]
impl<Si> TransportWriter for WsWriteHalf<Si>
where
    Si: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send,
{
    async fn send(&mut self, buf: &[u8], cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DanmakuError::Cancelled),
            res = self.sink.send(WsMessage::Binary(buf.to_vec())) => {
                res.map_err(|e| DanmakuError::DecodeError(e.to_string()))
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

struct WsReadHalf<St> {
    stream: St,
    read_buf: Vec<u8>,
}

#[async_trait]
impl<St> TransportReader for WsReadHalf<St>
where
    St: futures_util::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send,
{
    async fn receive_exact(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<()> {
        while self.read_buf.len() < buf.len() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DanmakuError::Cancelled),
                res = fill_one_message(&mut self.stream, &mut self.read_buf) => res?,
            }
        }
        let drained: Vec<u8> = self.read_buf.drain(..buf.len()).collect();
        buf.copy_from_slice(&drained);
        Ok(())
    }
}

fn split_websocket_transport(
    t: WebSocketTransport,
) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
    let (sink, stream) = t.stream.split();
    (
        Box::new(WsWriteHalf { sink }),
        Box::new(WsReadHalf {
            stream,
            read_buf: t.read_buf,
        }),
    )
}

// ─── Unified handle used by the connection core ───────────────────────────────

/// Whichever transport variant `connect()` opened for this attempt.
/// Splitting consumes it, handing one half to the receive loop and one to
/// the heartbeat loop.
pub enum AnyTransport {
    Tcp(TcpTransport),
    WebSocket(WebSocketTransport),
    Mock(StreamTransport<DuplexStream>),
}

impl AnyTransport {
    pub fn split(self) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        match self {
            AnyTransport::Tcp(t) => split_stream_transport(t),
            AnyTransport::WebSocket(t) => split_websocket_transport(t),
            AnyTransport::Mock(t) => split_stream_transport(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_transport_round_trips_bytes() {
        let (mut client, mut server) = mock_pair(4096);
        let cancel = CancellationToken::new();

        client.send(b"hello", &cancel).await.unwrap();
        let mut buf = [0u8; 5];
        server.receive_exact(&mut buf, &cancel).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn receive_exact_fails_on_cancellation() {
        let (_client, mut server) = mock_pair(4096);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut buf = [0u8; 5];
        let err = server.receive_exact(&mut buf, &cancel).await.unwrap_err();
        assert!(matches!(err, DanmakuError::Cancelled));
    }

    #[tokio::test]
    async fn receive_exact_fails_when_peer_closes_early() {
        let (client, mut server) = mock_pair(4096);
        drop(client);
        let cancel = CancellationToken::new();

        let mut buf = [0u8; 5];
        let err = server.receive_exact(&mut buf, &cancel).await.unwrap_err();
        assert!(matches!(err, DanmakuError::TransportClosed));
    }

    #[tokio::test]
    async fn split_halves_carry_bytes_independently() {
        let (client, server) = mock_pair(4096);
        let (mut client_w, _client_r) = AnyTransport::Mock(client).split();
        let (_server_w, mut server_r) = AnyTransport::Mock(server).split();
        let cancel = CancellationToken::new();

        client_w.send(b"ping!", &cancel).await.unwrap();
        let mut buf = [0u8; 5];
        server_r.receive_exact(&mut buf, &cancel).await.unwrap();
        assert_eq!(&buf, b"ping!");
    }
}
