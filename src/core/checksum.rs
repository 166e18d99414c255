//! CRC-32 trailers for corruption detection.
//!
//! A body is `payload || crc32(payload)` where the checksum is a little-endian `u32`
//! computed with the IEEE 802.3 polynomial. The checksum is not a security primitive.
//!
//! ```rust
//! use framewire::core::checksum;
//!
//! let body = checksum::attach(b"hello");
//! assert_eq!(body.len(), 5 + checksum::CHECKSUM_SIZE);
//! assert_eq!(checksum::check_and_remove(&body).unwrap(), b"hello");
//! ```

use crc_any::CRCu32;

use crate::error::{constants, ProtocolError, Result};

/// Size of the checksum trailer in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Computes the CRC-32 of `data`.
#[inline]
pub fn checksum(data: &[u8]) -> u32 {
    let mut crc = CRCu32::crc32();
    crc.digest(data);
    crc.get_crc()
}

/// Returns `payload` followed by its little-endian CRC-32.
///
/// An empty payload yields just the four checksum bytes.
pub fn attach(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + CHECKSUM_SIZE);
    body.extend_from_slice(payload);
    body.extend_from_slice(&checksum(payload).to_le_bytes());
    body
}

/// Verifies the trailing checksum of `body`.
///
/// Fails with [`ProtocolError::MissingData`] if `body` cannot even hold a trailer.
pub fn check(body: &[u8]) -> Result<bool> {
    let (payload, trailer) = split(body)?;
    Ok(checksum(payload).to_le_bytes() == trailer)
}

/// Verifies `body` and returns the payload without its trailer.
pub fn check_and_remove(body: &[u8]) -> Result<&[u8]> {
    if !check(body)? {
        return Err(ProtocolError::MalformedData(
            constants::ERR_PAYLOAD_CHECKSUM.to_string(),
        ));
    }
    let (payload, _) = split(body)?;
    Ok(payload)
}

fn split(body: &[u8]) -> Result<(&[u8], &[u8])> {
    let payload_len = body.len().checked_sub(CHECKSUM_SIZE).ok_or_else(|| {
        ProtocolError::MissingData(format!(
            "body of {} bytes cannot hold a {CHECKSUM_SIZE}-byte checksum",
            body.len()
        ))
    })?;
    Ok(body.split_at(payload_len))
}
