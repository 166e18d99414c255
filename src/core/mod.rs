//! # Core Protocol Components
//!
//! Low-level byte handling, checksums, and the frame wire format.
//!
//! This module provides the foundation for the protocol. Nothing in here performs I/O;
//! every function is a pure transformation over byte slices.
//!
//! ## Components
//! - **Encoding**: little-endian `i32` and UTF-8 text conversions
//! - **Checksum**: CRC-32 trailer attach / verify / strip
//! - **Header**: the fixed 12-byte preamble protected by its own CRC
//! - **Frame**: an immutable `header || body` unit ready for the wire
//!
//! ## Wire Format
//! ```text
//! [Tag(1)] [Reserved(3)] [BodyLength(4)] [HeaderCRC(4)] [Payload(N)] [PayloadCRC(4)]
//! ```
//!
//! ## Security
//! - CRC-32 detects corruption, it does not authenticate data
//! - Body length is validated before any allocation happens on the read path

pub mod checksum;
pub mod encoding;
pub mod frame;
pub mod header;
