//! # framewire
//!
//! Checksummed message framing over TCP and TLS streams, with a concurrent
//! multi-client server.
//!
//! Every message travels as a 12-byte header followed by a body:
//!
//! ```text
//! [Tag(1)] [Reserved(3)] [BodyLength(4)] [HeaderCRC(4)] [Payload(N)] [PayloadCRC(4)]
//! ```
//!
//! All integers are little-endian and both checksums are CRC-32/IEEE.
//!
//! ## Layout
//! - [`core`]: pure byte-level codecs (integers, text, checksums, headers, frames)
//! - [`transport`]: the byte-stream seam, plain TCP, and the TLS adapter
//! - [`service`]: [`Connection`] and [`Listener`]
//! - [`config`]: TOML/environment configuration
//! - [`utils`]: logging, metrics, timeouts
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use framewire::{Connection, Listener, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     async fn on_connect(&self, _connection: &Arc<Connection>) {}
//!     async fn on_disconnect(&self, _connection: &Arc<Connection>) {}
//!     async fn on_communicate(&self, payload: Vec<u8>, connection: &Arc<Connection>) {
//!         let _ = connection.send(&payload).await;
//!     }
//! }
//!
//! # async fn run() -> framewire::Result<()> {
//! let listener = Listener::bind("127.0.0.1:0", 50, Echo).await?;
//! let client = Connection::connect(&listener.local_addr().to_string()).await?;
//! client.send(b"hello").await?;
//! assert_eq!(client.receive().await?, Some(b"hello".to_vec()));
//! listener.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::frame::Frame;
pub use crate::error::{ProtocolError, Result};
pub use crate::service::{Connection, ConnectionId, ConnectionState, Listener, ServerHandler};
pub use crate::transport::tls::{TlsClientConfig, TlsServerConfig};
