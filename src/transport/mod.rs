//! # Transport Layer
//!
//! Byte-stream plumbing underneath [`crate::service::Connection`].
//!
//! Framing is written against any ordered, reliable, bidirectional stream. Plain TCP and
//! TLS-over-TCP are provided; both are erased to a [`BoxedTransport`] so the connection
//! code never needs to know which one it is driving.
//!
//! ## Components
//! - **TCP**: connect and bind-with-backlog helpers
//! - **TLS**: certificate loading, client verification, handshake helpers

pub mod tcp;
pub mod tls;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// Any stream a connection can frame messages over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased transport owned by a connection
pub type BoxedTransport = Box<dyn Transport>;

/// Turns an accepted socket into a transport.
#[derive(Clone)]
pub enum Acceptor {
    /// Use the socket as is
    Plain,
    /// Run a server-side TLS handshake first
    Tls(TlsAcceptor),
}

impl Acceptor {
    /// Performs whatever setup the accepted socket needs before framing can start.
    pub async fn establish(&self, stream: TcpStream) -> Result<BoxedTransport> {
        match self {
            Acceptor::Plain => Ok(Box::new(stream)),
            Acceptor::Tls(acceptor) => {
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| ProtocolError::TlsError(format!("TLS handshake failed: {e}")))?;
                debug!("Server TLS handshake complete");
                Ok(Box::new(tls_stream))
            }
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Acceptor::Tls(_))
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acceptor::Plain => f.write_str("Acceptor::Plain"),
            Acceptor::Tls(_) => f.write_str("Acceptor::Tls"),
        }
    }
}
