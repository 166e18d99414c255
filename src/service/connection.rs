//! # Connection
//!
//! A framed, bidirectional message channel over one [`BoxedTransport`].
//!
//! A connection moves through `Unbound -> Connected -> Closed` and never goes back.
//! The transport is split into a read half and a write half, each behind its own
//! async mutex: the write mutex keeps a frame (header and body) from interleaving with
//! another writer's frame, and the read mutex gives every connection a single reader.
//!
//! `close` cancels the connection's shutdown token first, so a `receive` parked in a
//! read releases the read half before the transport is torn down.
//!
//! The connection also closes itself once its stream can no longer carry frames: when
//! the peer shuts down, when a write fails part-way through a frame, and when a read
//! leaves the stream somewhere other than the start of the next header.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::config::{ClientConfig, TransportConfig, MAX_FRAME_SIZE};
use crate::core::frame::Frame;
use crate::core::header::{self, HEADER_SIZE};
use crate::core::{checksum, encoding};
use crate::error::constants::{ERR_ALREADY_CONNECTED, ERR_CONNECT_TIMEOUT, ERR_WRITE_TIMEOUT};
use crate::error::{ProtocolError, Result};
use crate::transport::tls::{self, TlsClientConfig};
use crate::transport::{tcp, BoxedTransport};
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT, WRITE_TIMEOUT};

/// Process-unique connection identifier
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Oversized bodies up to this multiple of the frame size limit are read and thrown
/// away so the stream stays aligned; anything larger closes the connection.
const DISCARD_LIMIT_FACTOR: usize = 4;

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport yet
    Unbound = 0,
    /// Transport attached and usable
    Connected = 1,
    /// Released; terminal
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Unbound,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }
}

pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    reader: Mutex<Option<ReadHalf<BoxedTransport>>>,
    writer: Mutex<Option<WriteHalf<BoxedTransport>>>,
    shutdown: CancellationToken,
    peer_addr: OnceLock<SocketAddr>,
    max_frame_size: usize,
    write_timeout: Duration,
}

impl Connection {
    /// Creates a connection with no transport. `send` reports `Ok(None)` until
    /// [`Connection::bind`] attaches one.
    pub fn unbound() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Wraps an established transport.
    pub fn from_transport(transport: BoxedTransport, peer_addr: Option<SocketAddr>) -> Self {
        Self::from_transport_with_token(transport, peer_addr, CancellationToken::new())
    }

    /// Wraps an accepted transport whose shutdown is tied to `token`.
    pub(crate) fn from_transport_with_token(
        transport: BoxedTransport,
        peer_addr: Option<SocketAddr>,
        token: CancellationToken,
    ) -> Self {
        let mut conn = Self::with_token(token);
        let (reader, writer) = tokio::io::split(transport);
        *conn.reader.get_mut() = Some(reader);
        *conn.writer.get_mut() = Some(writer);
        if let Some(addr) = peer_addr {
            let _ = conn.peer_addr.set(addr);
        }
        *conn.state.get_mut() = ConnectionState::Connected as u8;
        conn
    }

    fn with_token(shutdown: CancellationToken) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(ConnectionState::Unbound as u8),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            shutdown,
            peer_addr: OnceLock::new(),
            max_frame_size: MAX_FRAME_SIZE,
            write_timeout: WRITE_TIMEOUT,
        }
    }

    /// Applies the frame size limit and write timeout from `config`.
    pub fn with_config(mut self, config: &TransportConfig) -> Self {
        self.max_frame_size = config.max_frame_size;
        self.write_timeout = config.write_timeout;
        self
    }

    /// Opens a plain TCP connection to `addr`.
    #[instrument(fields(address = %addr))]
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = with_timeout_error(tcp::connect(addr), DEFAULT_TIMEOUT, ERR_CONNECT_TIMEOUT)
            .await?;
        let peer = stream.peer_addr().ok();
        let conn = Self::from_transport(Box::new(stream), peer);
        info!(conn_id = conn.id, ?peer, "Connected");
        Ok(conn)
    }

    /// Opens a TLS connection to `addr`, verifying the server against `config`.
    #[instrument(skip(config), fields(address = %addr))]
    pub async fn connect_tls(addr: &str, config: &TlsClientConfig) -> Result<Self> {
        let stream =
            with_timeout_error(tls::connect(addr, config), DEFAULT_TIMEOUT, ERR_CONNECT_TIMEOUT)
                .await?;
        let peer = stream.get_ref().0.peer_addr().ok();
        let conn = Self::from_transport(Box::new(stream), peer);
        info!(conn_id = conn.id, ?peer, "Connected over TLS");
        Ok(conn)
    }

    /// Connects as described by a client configuration section.
    ///
    /// TLS is used when `client.tls` is present. The connect timeout bounds the TCP
    /// connect and the handshake together.
    pub async fn connect_with_config(
        client: &ClientConfig,
        transport: &TransportConfig,
    ) -> Result<Self> {
        let addr = client.address.as_str();
        let conn = match &client.tls {
            Some(tls_config) => {
                let tls_config = TlsClientConfig::from(tls_config);
                let stream = with_timeout_error(
                    tls::connect(addr, &tls_config),
                    client.connect_timeout,
                    ERR_CONNECT_TIMEOUT,
                )
                .await?;
                let peer = stream.get_ref().0.peer_addr().ok();
                Self::from_transport(Box::new(stream), peer)
            }
            None => {
                let stream = with_timeout_error(
                    tcp::connect(addr),
                    client.connect_timeout,
                    ERR_CONNECT_TIMEOUT,
                )
                .await?;
                let peer = stream.peer_addr().ok();
                Self::from_transport(Box::new(stream), peer)
            }
        };
        info!(conn_id = conn.id, address = %addr, tls = client.tls.is_some(), "Connected");
        Ok(conn.with_config(transport))
    }

    /// Attaches a transport to an unbound connection.
    ///
    /// Fails with `InvalidArgument` if the connection already has one and with
    /// `ConnectionClosed` once closed.
    pub async fn bind(
        &self,
        transport: BoxedTransport,
        peer_addr: Option<SocketAddr>,
    ) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let mut reader = self.reader.lock().await;

        match self.state() {
            ConnectionState::Unbound => {}
            ConnectionState::Connected => {
                return Err(ProtocolError::InvalidArgument(ERR_ALREADY_CONNECTED.into()))
            }
            ConnectionState::Closed => return Err(ProtocolError::ConnectionClosed),
        }

        let (read_half, write_half) = tokio::io::split(transport);
        *reader = Some(read_half);
        *writer = Some(write_half);
        if let Some(addr) = peer_addr {
            let _ = self.peer_addr.set(addr);
        }
        self.state.store(ConnectionState::Connected as u8, Ordering::SeqCst);
        debug!(conn_id = self.id, ?peer_addr, "Transport bound");
        Ok(())
    }

    /// Frames `payload` and writes it in full.
    ///
    /// Returns the number of bytes put on the wire, or `Ok(None)` when the connection
    /// has no transport yet so callers can poll without treating it as a failure.
    /// A write that fails or times out may have left part of the frame on the wire,
    /// so the connection is closed before the error is returned.
    pub async fn send(&self, payload: &[u8]) -> Result<Option<usize>> {
        match self.state() {
            ConnectionState::Unbound => {
                trace!(conn_id = self.id, "Send on unbound connection");
                return Ok(None);
            }
            ConnectionState::Closed => return Err(ProtocolError::ConnectionClosed),
            ConnectionState::Connected => {}
        }

        let body_len = payload.len() + checksum::CHECKSUM_SIZE;
        if body_len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(body_len));
        }

        let frame = Frame::new(payload)?;

        let written = {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
            with_timeout_error(
                async {
                    writer.write_all(frame.as_bytes()).await?;
                    writer.flush().await?;
                    Ok(())
                },
                self.write_timeout,
                ERR_WRITE_TIMEOUT,
            )
            .await
        };
        if let Err(e) = written {
            self.abandon("write failed mid-frame").await;
            return Err(e);
        }

        trace!(conn_id = self.id, bytes = frame.len(), "Frame sent");
        Ok(Some(frame.len()))
    }

    /// Sends `text` as UTF-8.
    pub async fn send_text(&self, text: &str) -> Result<Option<usize>> {
        self.send(&encoding::str_to_bytes(text)).await
    }

    /// Reads the next frame and returns its payload.
    ///
    /// `Ok(None)` means the peer shut the stream down cleanly between frames; the
    /// connection is `Closed` afterwards. A payload checksum failure is
    /// `MalformedData` and a body above the size limit is `OversizedFrame`; both
    /// leave the stream on the next header. A damaged header, a stream that ends
    /// part-way through a frame, or a read error closes the connection before the
    /// error is returned. Closing the connection wakes a pending call with
    /// `ConnectionClosed`.
    pub async fn receive(&self) -> Result<Option<Vec<u8>>> {
        match self.state() {
            ConnectionState::Unbound => return Err(ProtocolError::NotConnected),
            ConnectionState::Closed => return Err(ProtocolError::ConnectionClosed),
            ConnectionState::Connected => {}
        }

        let read = {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ProtocolError::ConnectionClosed),
                read = read_frame(reader, self.max_frame_size) => read,
            }
        };

        match read {
            Ok(FrameRead::Payload(payload)) => {
                trace!(conn_id = self.id, bytes = payload.len(), "Frame received");
                Ok(Some(payload))
            }
            Ok(FrameRead::Rejected(e)) => Err(e),
            Ok(FrameRead::EndOfStream) => {
                self.abandon("peer closed the stream").await;
                Ok(None)
            }
            Err(e) => {
                self.abandon("stream lost frame alignment").await;
                Err(e)
            }
        }
    }

    /// Receives one payload and decodes it as UTF-8.
    pub async fn receive_text(&self) -> Result<Option<String>> {
        match self.receive().await? {
            Some(bytes) => encoding::bytes_to_str(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Closes the connection and releases the transport.
    ///
    /// The connection is `Closed` afterwards even if shutting the transport down
    /// fails; that failure is reported as `Resource`. Closing twice is
    /// `ConnectionClosed`.
    pub async fn close(&self) -> Result<()> {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::SeqCst);
        if ConnectionState::from_u8(previous) == ConnectionState::Closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.shutdown.cancel();

        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();
        drop(reader);

        if let Some(mut writer) = writer {
            writer.shutdown().await.map_err(|e| {
                ProtocolError::Resource(format!("Failed to shut down transport: {e}"))
            })?;
        }

        debug!(conn_id = self.id, "Connection closed");
        Ok(())
    }

    /// Moves to `Closed` and drops the transport without a graceful shutdown.
    ///
    /// Callers must not hold either half's lock. A no-op if already closed.
    async fn abandon(&self, reason: &'static str) {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::SeqCst);
        if ConnectionState::from_u8(previous) == ConnectionState::Closed {
            return;
        }
        self.shutdown.cancel();

        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();
        drop((reader, writer));

        debug!(conn_id = self.id, reason, "Connection abandoned");
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr.get().copied()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

/// Outcome of one [`read_frame`] that left the stream on a frame boundary.
enum FrameRead {
    Payload(Vec<u8>),
    /// Clean end of stream before any header byte arrived
    EndOfStream,
    /// The whole frame was consumed and refused
    Rejected(ProtocolError),
}

/// Reads one complete frame.
///
/// An `Err` means the stream position is no longer known to be a frame boundary.
async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<FrameRead>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    let filled = read_full(reader, &mut header_buf).await?;
    if filled == 0 {
        return Ok(FrameRead::EndOfStream);
    }
    if filled < HEADER_SIZE {
        return Err(ProtocolError::MissingData(format!(
            "Stream ended after {filled} of {HEADER_SIZE} header bytes"
        )));
    }

    let info = header::parse(&header_buf)?;
    if info.size > max_frame_size {
        if info.size > max_frame_size.saturating_mul(DISCARD_LIMIT_FACTOR) {
            return Err(ProtocolError::OversizedFrame(info.size));
        }
        discard(reader, info.size).await?;
        return Ok(FrameRead::Rejected(ProtocolError::OversizedFrame(info.size)));
    }

    let mut body = vec![0u8; info.size];
    let filled = read_full(reader, &mut body).await?;
    if filled < info.size {
        return Err(ProtocolError::MissingData(format!(
            "Stream ended after {filled} of {} body bytes",
            info.size
        )));
    }

    let payload_len = match checksum::check_and_remove(&body) {
        Ok(payload) => payload.len(),
        Err(e @ ProtocolError::MalformedData(_)) => return Ok(FrameRead::Rejected(e)),
        Err(e) => return Err(e),
    };
    body.truncate(payload_len);
    Ok(FrameRead::Payload(body))
}

/// Reads and drops `len` body bytes without buffering them.
async fn discard<R>(reader: &mut R, len: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut limited = (&mut *reader).take(len as u64);
    let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if skipped < len as u64 {
        return Err(ProtocolError::MissingData(format!(
            "Stream ended after {skipped} of {len} body bytes"
        )));
    }
    Ok(())
}

/// Fills `buf` across as many reads as it takes. Returns fewer bytes than requested
/// only when the stream ends.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (Connection, Connection) {
        let (a, b) = duplex(64 * 1024);
        (
            Connection::from_transport(Box::new(a), None),
            Connection::from_transport(Box::new(b), None),
        )
    }

    fn raw_pair() -> (Connection, DuplexStream) {
        let (a, b) = duplex(64 * 1024);
        (Connection::from_transport(Box::new(a), None), b)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (client, server) = pair();

        let sent = client.send(b"hello").await.unwrap();
        assert_eq!(sent, Some(HEADER_SIZE + 5 + checksum::CHECKSUM_SIZE));
        assert_eq!(server.receive().await.unwrap(), Some(b"hello".to_vec()));

        server.send(b"").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_text_round_trip() {
        let (client, server) = pair();
        client.send_text("héllo wörld").await.unwrap();
        assert_eq!(server.receive_text().await.unwrap().as_deref(), Some("héllo wörld"));
    }

    #[tokio::test]
    async fn test_partial_reads_reassembled() {
        let (conn, mut raw) = raw_pair();
        let frame = Frame::new(b"trickled in one byte at a time").unwrap();

        let writer = tokio::spawn(async move {
            for byte in frame.as_bytes() {
                raw.write_all(&[*byte]).await.unwrap();
                tokio::task::yield_now().await;
            }
            raw
        });

        assert_eq!(
            conn.receive().await.unwrap(),
            Some(b"trickled in one byte at a time".to_vec())
        );
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_eof_closes_connection() {
        let (conn, raw) = raw_pair();
        drop(raw);
        assert_eq!(conn.receive().await.unwrap(), None);

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.send(b"gone").await, Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(conn.receive().await, Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(conn.close().await, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_header_is_missing_data() {
        let (conn, mut raw) = raw_pair();
        let frame = Frame::new(b"cut").unwrap();
        raw.write_all(&frame.as_bytes()[..5]).await.unwrap();
        drop(raw);

        assert!(matches!(conn.receive().await, Err(ProtocolError::MissingData(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_missing_data() {
        let (conn, mut raw) = raw_pair();
        let frame = Frame::new(b"cut short").unwrap();
        raw.write_all(&frame.as_bytes()[..frame.len() - 2]).await.unwrap();
        drop(raw);

        assert!(matches!(conn.receive().await, Err(ProtocolError::MissingData(_))));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_corrupt_payload_does_not_desync_stream() {
        let (conn, mut raw) = raw_pair();

        let mut corrupt = Frame::new(b"damaged").unwrap().as_bytes().to_vec();
        corrupt[HEADER_SIZE] ^= 0x01;
        raw.write_all(&corrupt).await.unwrap();
        raw.write_all(Frame::new(b"intact").unwrap().as_bytes()).await.unwrap();

        assert!(matches!(conn.receive().await, Err(ProtocolError::MalformedData(_))));
        assert_eq!(conn.receive().await.unwrap(), Some(b"intact".to_vec()));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_corrupt_header_closes_connection() {
        let (conn, mut raw) = raw_pair();

        // The body bytes hold a complete frame that must never surface.
        let inner = Frame::new(b"hidden").unwrap();
        let outer = Frame::new(inner.as_bytes()).unwrap();
        let mut corrupt = outer.as_bytes().to_vec();
        corrupt[9] ^= 0x80;
        raw.write_all(&corrupt).await.unwrap();

        assert!(matches!(conn.receive().await, Err(ProtocolError::MalformedData(_))));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.receive().await, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_frame_size_limit() {
        let config = TransportConfig {
            max_frame_size: 16,
            ..TransportConfig::default()
        };
        let (a, b) = duplex(1024);
        let small = Connection::from_transport(Box::new(a), None).with_config(&config);
        let big = Connection::from_transport(Box::new(b), None);

        assert!(matches!(
            small.send(&[0u8; 13]).await,
            Err(ProtocolError::OversizedFrame(17))
        ));

        big.send(&[0u8; 64]).await.unwrap();
        assert!(matches!(
            small.receive().await,
            Err(ProtocolError::OversizedFrame(68))
        ));
        assert_eq!(small.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_oversized_body_is_discarded() {
        let config = TransportConfig {
            max_frame_size: 64,
            ..TransportConfig::default()
        };
        let (a, b) = duplex(4096);
        let small = Connection::from_transport(Box::new(a), None).with_config(&config);
        let big = Connection::from_transport(Box::new(b), None);

        let mut payload = Frame::new(b"inside").unwrap().as_bytes().to_vec();
        payload.resize(200, 0xEE);
        big.send(&payload).await.unwrap();
        big.send(b"after").await.unwrap();

        assert!(matches!(
            small.receive().await,
            Err(ProtocolError::OversizedFrame(204))
        ));
        assert_eq!(small.receive().await.unwrap(), Some(b"after".to_vec()));
        assert!(small.is_open());
    }

    #[tokio::test]
    async fn test_failed_write_closes_connection() {
        let config = TransportConfig {
            write_timeout: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let (a, mut raw) = duplex(64);
        let conn = Connection::from_transport(Box::new(a), None).with_config(&config);

        let frame_len = HEADER_SIZE + 256 + checksum::CHECKSUM_SIZE;
        assert!(matches!(
            conn.send(&[7u8; 256]).await,
            Err(ProtocolError::Transport(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.send(b"next").await, Err(ProtocolError::ConnectionClosed)));

        // The peer sees the partial frame and then the end of the stream.
        let mut seen = Vec::new();
        raw.read_to_end(&mut seen).await.unwrap();
        assert!(!seen.is_empty() && seen.len() < frame_len);
    }

    #[tokio::test]
    async fn test_unbound_lifecycle() {
        let conn = Connection::unbound();
        assert_eq!(conn.state(), ConnectionState::Unbound);
        assert_eq!(conn.send(b"early").await.unwrap(), None);
        assert!(matches!(conn.receive().await, Err(ProtocolError::NotConnected)));

        let (a, b) = duplex(1024);
        conn.bind(Box::new(a), None).await.unwrap();
        assert!(conn.is_open());

        let (c, _d) = duplex(1024);
        assert!(matches!(
            conn.bind(Box::new(c), None).await,
            Err(ProtocolError::InvalidArgument(_))
        ));

        let peer = Connection::from_transport(Box::new(b), None);
        conn.send(b"bound").await.unwrap();
        assert_eq!(peer.receive().await.unwrap(), Some(b"bound".to_vec()));
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let (client, server) = pair();
        client.close().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(client.send(b"x").await, Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(client.receive().await, Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(client.close().await, Err(ProtocolError::ConnectionClosed)));

        let (c, _d) = duplex(64);
        assert!(matches!(
            client.bind(Box::new(c), None).await,
            Err(ProtocolError::ConnectionClosed)
        ));

        assert_eq!(server.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_receive() {
        let (conn, _raw) = raw_pair();
        let conn = Arc::new(conn);

        let pending = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        conn.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_senders_never_interleave() {
        let (a, b) = duplex(4 * 1024);
        let sender = Arc::new(Connection::from_transport(Box::new(a), None));
        let receiver = Connection::from_transport(Box::new(b), None);

        let mut tasks = Vec::new();
        for task in 0u8..8 {
            let sender = Arc::clone(&sender);
            tasks.push(tokio::spawn(async move {
                for i in 0u8..50 {
                    let payload = vec![task; 100 + i as usize];
                    sender.send(&payload).await.unwrap();
                }
            }));
        }

        for _ in 0..8 * 50 {
            let payload = receiver.receive().await.unwrap().unwrap();
            assert!(payload.iter().all(|b| *b == payload[0]));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Connection::unbound();
        let b = Connection::unbound();
        assert_ne!(a.id(), b.id());
    }
}
