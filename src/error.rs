//! # Error Types
//!
//! Error handling for the framing protocol and the connection layer.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`ProtocolError`]. Variants are grouped by where the failure originates.
//!
//! ## Error Categories
//! - **Argument errors**: a reference that does not resolve or an invalid construction argument
//! - **Data errors**: byte sequences that are too short ([`ProtocolError::MissingData`]) or
//!   that fail a checksum / value constraint ([`ProtocolError::MalformedData`])
//! - **Transport errors**: the underlying byte stream failed, including timeouts
//! - **Lifecycle errors**: operations attempted outside the `Connected` state
//! - **Resource errors**: failures while releasing a transport
//!
//! ## Example Usage
//! ```rust
//! use framewire::core::checksum;
//! use framewire::error::ProtocolError;
//!
//! match checksum::check_and_remove(&[0x01, 0x02]) {
//!     Err(ProtocolError::MissingData(msg)) => println!("too short: {msg}"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Listener bookkeeping
    pub const ERR_CONNECTIONS_WRITE_LOCK: &str = "Failed to acquire write lock on connection map";
    pub const ERR_CONNECTIONS_READ_LOCK: &str = "Failed to acquire read lock on connection map";
    pub const ERR_UNKNOWN_CONNECTION: &str = "Connection is not registered with this listener";

    /// Framing errors
    pub const ERR_HEADER_CHECKSUM: &str = "Header checksum mismatch";
    pub const ERR_PAYLOAD_CHECKSUM: &str = "Payload checksum mismatch";
    pub const ERR_HEADER_TAG: &str = "Unexpected header tag";

    /// Connection errors
    pub const ERR_ALREADY_CONNECTED: &str = "Connection is already bound to a transport";
    pub const ERR_WRITE_TIMEOUT: &str = "Timed out writing frame";
    pub const ERR_CONNECT_TIMEOUT: &str = "Timed out connecting to peer";
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "Timed out during TLS handshake";
}

/// ProtocolError is the primary error type for all framing and connection operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Invalid UTF-8 text: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Connection is not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to release resource: {0}")]
    Resource(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProtocolError {
    /// Whether the error only affects the frame being read, leaving the connection usable.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedData(_) | ProtocolError::OversizedFrame(_)
        )
    }

    /// Whether the error is a transport hiccup that is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ProtocolError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
