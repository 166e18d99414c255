//! Deterministic conversions between primitive values and bytes.
//!
//! Integers are always signed 32-bit little endian; text is always UTF-8.

use crate::error::{ProtocolError, Result};

/// Number of bytes used to encode an integer on the wire.
pub const BYTES_PER_INT: usize = 4;

/// Encode `n` as four little-endian bytes.
#[inline]
pub fn int_to_bytes(n: i32) -> [u8; BYTES_PER_INT] {
    n.to_le_bytes()
}

/// Decode four little-endian bytes into an `i32`.
///
/// Fails with [`ProtocolError::MissingData`] unless `b` holds exactly four bytes.
pub fn bytes_to_int(b: &[u8]) -> Result<i32> {
    let raw: [u8; BYTES_PER_INT] = b.try_into().map_err(|_| {
        ProtocolError::MissingData(format!("cannot convert byte[{}] to int", b.len()))
    })?;
    Ok(i32::from_le_bytes(raw))
}

/// Encode text as UTF-8 bytes.
#[inline]
pub fn str_to_bytes(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Decode UTF-8 bytes into a `String`.
///
/// Invalid sequences are reported as [`ProtocolError::InvalidText`] rather than replaced.
pub fn bytes_to_str(b: &[u8]) -> Result<String> {
    Ok(std::str::from_utf8(b)?.to_owned())
}
