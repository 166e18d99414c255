//! # Service Layer
//!
//! Connection management on top of the framing core.
//!
//! ## Components
//! - **Connection**: framed send/receive over one transport with a per-connection write lock
//! - **Listener**: accept loop, live-connection map, per-connection receive loops, and the
//!   [`ServerHandler`] hooks a server implements

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use listener::{Listener, ServerHandler};
