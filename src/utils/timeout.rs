//! Timeout helpers.
//!
//! The protocol itself defines no timeouts. The transport layer bounds connects,
//! handshakes, and writes; an elapsed timer surfaces as a transport error of kind
//! [`std::io::ErrorKind::TimedOut`].

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for establishing a connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for a single frame write
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for a TLS handshake on an accepted socket
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a listener waits for its receive loops when closing
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `future`, failing with a `TimedOut` transport error after `duration`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration, what: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} after {}ms", duration.as_millis()),
        ))),
    }
}
