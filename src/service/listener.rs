//! # Listener
//!
//! Concurrent multi-client server built on [`Connection`].
//!
//! One accept task hands every accepted socket to a setup task, which runs the TLS
//! handshake when configured, calls [`ServerHandler::on_connect`], registers the
//! connection in the live map, and spawns its receive loop. Each receive loop delivers
//! payloads in arrival order to [`ServerHandler::on_communicate`] and calls
//! [`ServerHandler::on_disconnect`] exactly once when it ends.
//!
//! ## Receive loop policy
//! - Corrupt payloads and oversized frames are logged, counted, and skipped; the
//!   connection has already closed itself if the frame left the stream misaligned,
//!   and the next receive ends the loop
//! - Transient transport errors are retried
//! - A clean end of stream, truncation, any other transport error, or cancellation
//!   ends the loop; the connection is unregistered and closed
//!
//! ## Shutdown
//! Every connection's cancellation token is a child of the listener's token, so
//! [`Listener::close`] (or dropping the listener) wakes every receive loop at once.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ServerConfig, TransportConfig};
use crate::core::encoding;
use crate::error::constants::{
    ERR_CONNECTIONS_READ_LOCK, ERR_CONNECTIONS_WRITE_LOCK, ERR_HANDSHAKE_TIMEOUT,
    ERR_UNKNOWN_CONNECTION,
};
use crate::error::{ProtocolError, Result};
use crate::service::connection::{Connection, ConnectionId};
use crate::transport::tls::TlsServerConfig;
use crate::transport::{tcp, Acceptor};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{with_timeout_error, HANDSHAKE_TIMEOUT, SHUTDOWN_TIMEOUT};

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle hooks a server implements.
///
/// Hooks for one connection are never invoked concurrently with each other; hooks for
/// different connections are.
pub trait ServerHandler: Send + Sync + 'static {
    /// Called once the connection is usable, before its receive loop starts.
    fn on_connect(&self, connection: &Arc<Connection>) -> impl Future<Output = ()> + Send;

    /// Called exactly once when the receive loop for `connection` ends.
    fn on_disconnect(&self, connection: &Arc<Connection>) -> impl Future<Output = ()> + Send;

    /// Called for every payload, in the order the frames arrived.
    fn on_communicate(
        &self,
        payload: Vec<u8>,
        connection: &Arc<Connection>,
    ) -> impl Future<Output = ()> + Send;
}

struct ConnectionEntry {
    connection: Arc<Connection>,
    worker: JoinHandle<()>,
}

struct Settings {
    handshake_timeout: Duration,
    shutdown_timeout: Duration,
    transport: TransportConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            transport: TransportConfig::default(),
        }
    }
}

struct Shared<H> {
    handler: H,
    shutdown: CancellationToken,
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    metrics: Metrics,
    settings: Settings,
}

impl<H: ServerHandler> Shared<H> {
    /// Inserts `connection` and starts its receive loop under one write lock, so
    /// `close` drains either both or neither. `Ok(false)` if the listener is shutting
    /// down.
    fn register(self: &Arc<Self>, connection: &Arc<Connection>) -> Result<bool> {
        let mut map = self
            .connections
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_CONNECTIONS_WRITE_LOCK))?;
        if self.shutdown.is_cancelled() {
            return Ok(false);
        }
        let worker = tokio::spawn(receive_loop(Arc::clone(self), Arc::clone(connection)));
        map.insert(
            connection.id(),
            ConnectionEntry {
                connection: Arc::clone(connection),
                worker,
            },
        );
        self.metrics.connection_established();
        Ok(true)
    }

    fn take(&self, id: ConnectionId) -> Result<Option<ConnectionEntry>> {
        let removed = self
            .connections
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_CONNECTIONS_WRITE_LOCK))?
            .remove(&id);
        if removed.is_some() {
            self.metrics.connection_closed();
        }
        Ok(removed)
    }

    /// Cancels every connection and empties the map under one write lock, so no
    /// setup task can register in between.
    fn shutdown_and_drain(&self) -> Result<Vec<ConnectionEntry>> {
        let mut map = self
            .connections
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_CONNECTIONS_WRITE_LOCK))?;
        self.shutdown.cancel();
        let entries: Vec<ConnectionEntry> = map.drain().map(|(_, entry)| entry).collect();
        for _ in &entries {
            self.metrics.connection_closed();
        }
        Ok(entries)
    }

    fn lookup(&self, id: ConnectionId) -> Result<Option<Arc<Connection>>> {
        let map = self
            .connections
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_CONNECTIONS_READ_LOCK))?;
        Ok(map.get(&id).map(|entry| Arc::clone(&entry.connection)))
    }

    fn snapshot(&self) -> Result<Vec<Arc<Connection>>> {
        let map = self
            .connections
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_CONNECTIONS_READ_LOCK))?;
        Ok(map.values().map(|entry| Arc::clone(&entry.connection)).collect())
    }
}

/// A bound server socket plus the tasks serving its connections.
pub struct Listener<H: ServerHandler> {
    shared: Arc<Shared<H>>,
    local_addr: SocketAddr,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl<H: ServerHandler> Listener<H> {
    /// Binds a plain TCP listener and starts accepting.
    pub async fn bind(addr: &str, backlog: u32, handler: H) -> Result<Self> {
        Self::start(addr, backlog, handler, Acceptor::Plain, Settings::default()).await
    }

    /// Binds a listener that runs a TLS handshake on every accepted socket.
    pub async fn bind_tls(
        addr: &str,
        backlog: u32,
        handler: H,
        tls: &TlsServerConfig,
    ) -> Result<Self> {
        let acceptor = Acceptor::Tls(tls.acceptor()?);
        Self::start(addr, backlog, handler, acceptor, Settings::default()).await
    }

    /// Binds as described by the server and transport configuration sections.
    pub async fn from_config(
        server: &ServerConfig,
        transport: &TransportConfig,
        handler: H,
    ) -> Result<Self> {
        let acceptor = match &server.tls {
            Some(tls) => Acceptor::Tls(TlsServerConfig::from(tls).acceptor()?),
            None => Acceptor::Plain,
        };
        let settings = Settings {
            handshake_timeout: server.handshake_timeout,
            shutdown_timeout: server.shutdown_timeout,
            transport: transport.clone(),
        };
        Self::start(&server.address, server.backlog, handler, acceptor, settings).await
    }

    #[instrument(skip(handler, acceptor, settings), fields(tls = acceptor.is_tls()))]
    async fn start(
        addr: &str,
        backlog: u32,
        handler: H,
        acceptor: Acceptor,
        settings: Settings,
    ) -> Result<Self> {
        let listener = tcp::bind(addr, backlog).await?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            handler,
            shutdown: CancellationToken::new(),
            connections: RwLock::new(HashMap::new()),
            metrics: Metrics::new(),
            settings,
        });

        let accept_task = tokio::spawn(accept_loop(Arc::clone(&shared), listener, acceptor));
        info!(address = %local_addr, backlog, "Listening");

        Ok(Self {
            shared,
            local_addr,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    /// The bound port; useful after binding port 0.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// The live connection registered under `id`, if any.
    pub fn connection(&self, id: ConnectionId) -> Result<Option<Arc<Connection>>> {
        self.shared.lookup(id)
    }

    pub fn connection_ids(&self) -> Result<Vec<ConnectionId>> {
        Ok(self.shared.snapshot()?.iter().map(|c| c.id()).collect())
    }

    pub fn connection_count(&self) -> Result<usize> {
        self.shared
            .connections
            .read()
            .map(|map| map.len())
            .map_err(|_| ProtocolError::LockPoisoned(ERR_CONNECTIONS_READ_LOCK))
    }

    /// Sends `payload` to one registered connection.
    ///
    /// An id that is not registered is `InvalidArgument`.
    pub async fn send(&self, payload: &[u8], id: ConnectionId) -> Result<Option<usize>> {
        let connection = self
            .shared
            .lookup(id)?
            .ok_or_else(|| ProtocolError::InvalidArgument(ERR_UNKNOWN_CONNECTION.into()))?;
        self.send_to(&connection, payload).await
    }

    pub async fn send_text(&self, text: &str, id: ConnectionId) -> Result<Option<usize>> {
        self.send(&encoding::str_to_bytes(text), id).await
    }

    /// Sends `payload` to every registered connection.
    ///
    /// Works on a snapshot of the map, so connections may come and go meanwhile. A
    /// failed send is logged and does not affect the others. Returns how many
    /// connections accepted the frame.
    pub async fn send_all(&self, payload: &[u8]) -> Result<usize> {
        let connections = self.shared.snapshot()?;
        let results = join_all(connections.iter().map(|c| self.send_to(c, payload))).await;
        let delivered = results
            .iter()
            .filter(|result| matches!(result, Ok(Some(_))))
            .count();
        debug!(delivered, targets = connections.len(), "Broadcast complete");
        Ok(delivered)
    }

    pub async fn send_all_text(&self, text: &str) -> Result<usize> {
        self.send_all(&encoding::str_to_bytes(text)).await
    }

    async fn send_to(
        &self,
        connection: &Arc<Connection>,
        payload: &[u8],
    ) -> Result<Option<usize>> {
        let result = connection.send(payload).await;
        match &result {
            Ok(Some(_)) => self.shared.metrics.message_sent(payload.len() as u64),
            Ok(None) => {}
            Err(e) => {
                self.shared.metrics.send_error();
                warn!(conn_id = connection.id(), error = %e, "Send failed");
            }
        }
        result
    }

    /// Cancels, closes, and unregisters one connection.
    ///
    /// Its receive loop still runs `on_disconnect` as it winds down.
    pub async fn remove(&self, id: ConnectionId) -> Result<()> {
        let entry = self
            .shared
            .take(id)?
            .ok_or_else(|| ProtocolError::InvalidArgument(ERR_UNKNOWN_CONNECTION.into()))?;

        info!(conn_id = id, "Removing connection");
        match entry.connection.close().await {
            Ok(()) | Err(ProtocolError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stops accepting, closes every connection, and waits for the receive loops.
    ///
    /// The wait is bounded by the configured shutdown timeout. Failures to release
    /// individual transports are collected into one `Resource` error after everything
    /// else has been shut down.
    pub async fn close(&self) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        info!(address = %self.local_addr, "Closing listener");

        let entries = match self.shared.shutdown_and_drain() {
            Ok(entries) => entries,
            Err(e) => {
                self.shared.shutdown.cancel();
                return Err(e);
            }
        };
        let results = join_all(entries.iter().map(|entry| entry.connection.close())).await;
        let failures: Vec<String> = entries
            .iter()
            .zip(results)
            .filter_map(|(entry, result)| match result {
                Ok(()) | Err(ProtocolError::ConnectionClosed) => None,
                Err(e) => Some(format!("connection {}: {e}", entry.connection.id())),
            })
            .collect();

        let workers: Vec<JoinHandle<()>> = entries.into_iter().map(|entry| entry.worker).collect();
        let timeout = self.shared.settings.shutdown_timeout;
        if tokio::time::timeout(timeout, join_all(workers)).await.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Receive loops still running after shutdown timeout"
            );
        }

        let accept_task = self.accept_task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                error!(error = %e, "Accept task failed");
            }
        }

        self.shared.metrics.log_metrics();
        info!(address = %self.local_addr, "Listener closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Resource(failures.join("; ")))
        }
    }
}

impl<H: ServerHandler> Drop for Listener<H> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<H: ServerHandler> std::fmt::Debug for Listener<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn accept_loop<H: ServerHandler>(
    shared: Arc<Shared<H>>,
    listener: TcpListener,
    acceptor: Acceptor,
) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                }
                tokio::spawn(serve(Arc::clone(&shared), stream, peer, acceptor.clone()));
            }
            Err(e) => {
                shared.metrics.accept_error();
                error!(error = %e, "Error accepting connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn serve<H: ServerHandler>(
    shared: Arc<Shared<H>>,
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Acceptor,
) {
    let handshake = with_timeout_error(
        acceptor.establish(stream),
        shared.settings.handshake_timeout,
        ERR_HANDSHAKE_TIMEOUT,
    );
    let transport = match handshake.await {
        Ok(transport) => transport,
        Err(e) => {
            shared.metrics.handshake_failed();
            warn!(%peer, error = %e, "Dropping connection before handshake completed");
            return;
        }
    };

    let token = shared.shutdown.child_token();
    let connection = Arc::new(
        Connection::from_transport_with_token(transport, Some(peer), token)
            .with_config(&shared.settings.transport),
    );
    let id = connection.id();

    shared.handler.on_connect(&connection).await;

    match shared.register(&connection) {
        Ok(true) => {}
        Ok(false) => {
            debug!(conn_id = id, %peer, "Listener closed during setup");
            shared.handler.on_disconnect(&connection).await;
            let _ = connection.close().await;
            return;
        }
        Err(e) => {
            error!(conn_id = id, %peer, error = %e, "Failed to register connection");
            shared.handler.on_disconnect(&connection).await;
            let _ = connection.close().await;
            return;
        }
    }

    info!(conn_id = id, %peer, "Connection accepted");
}

async fn receive_loop<H: ServerHandler>(shared: Arc<Shared<H>>, connection: Arc<Connection>) {
    let id = connection.id();

    loop {
        match connection.receive().await {
            Ok(Some(payload)) => {
                shared.metrics.message_received(payload.len() as u64);
                shared.handler.on_communicate(payload, &connection).await;
            }
            Ok(None) => {
                debug!(conn_id = id, "Peer closed the stream");
                break;
            }
            Err(e) if e.is_frame_local() => {
                shared.metrics.malformed_frame();
                warn!(conn_id = id, error = %e, "Skipping corrupt frame");
            }
            Err(e) if e.is_transient() => {
                debug!(conn_id = id, error = %e, "Transient receive error, retrying");
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!(conn_id = id, "Receive loop cancelled");
                break;
            }
            Err(e) => {
                warn!(conn_id = id, error = %e, "Receive failed, dropping connection");
                break;
            }
        }
    }

    shared.handler.on_disconnect(&connection).await;

    if let Err(e) = shared.take(id) {
        error!(conn_id = id, error = %e, "Failed to unregister connection");
    }
    if connection.is_open() {
        if let Err(e) = connection.close().await {
            debug!(conn_id = id, error = %e, "Error closing connection");
        }
    }
    info!(conn_id = id, "Connection disconnected");
}
