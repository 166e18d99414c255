//! Plain TCP helpers.

use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tracing::{debug, instrument};

use crate::error::{ProtocolError, Result};

/// Opens a TCP stream to `addr` with Nagle disabled.
#[instrument(fields(address = %addr))]
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "TCP connection established");
    Ok(stream)
}

/// Binds a listening socket on the first address `addr` resolves to.
///
/// `backlog` is passed to `listen(2)` and must be positive.
#[instrument(fields(address = %addr))]
pub async fn bind(addr: &str, backlog: u32) -> Result<TcpListener> {
    if backlog == 0 {
        return Err(ProtocolError::InvalidArgument(
            "Backlog must be greater than 0".into(),
        ));
    }

    let resolved: SocketAddr = lookup_host(addr).await?.next().ok_or_else(|| {
        ProtocolError::InvalidArgument(format!("Address '{addr}' did not resolve"))
    })?;

    let socket = if resolved.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(resolved)?;

    let listener = socket.listen(backlog)?;
    debug!(local = ?listener.local_addr().ok(), backlog, "TCP listener bound");
    Ok(listener)
}
