//! Fixed-size frame header.
//!
//! ```text
//! byte 0       : tag          (0x68)
//! bytes 1..3   : reserved     (zero)
//! bytes 4..7   : body_length  (i32, little endian, > 0)
//! bytes 8..11  : header_crc   (u32, little endian, CRC-32 of bytes 0..7)
//! ```
//!
//! The header checksum protects the length field, so a reader never trusts a body
//! size taken from a damaged header.

use crate::core::checksum::{self, CHECKSUM_SIZE};
use crate::core::encoding::{self, BYTES_PER_INT};
use crate::error::{constants, ProtocolError, Result};

/// Total header size in bytes.
pub const HEADER_SIZE: usize = 8 + CHECKSUM_SIZE;

/// Sentinel stored in the first header byte.
pub const HEADER_TAG: u8 = 0x68;

/// Offset of the body length field.
pub const BODY_LENGTH_OFFSET: usize = 4;

/// Offset of the header checksum.
pub const CRC_OFFSET: usize = 8;

/// Parsed, validated header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Frame tag, always [`HEADER_TAG`] once validated.
    pub tag: u8,
    /// Length of the body that follows the header.
    pub size: usize,
    /// The header checksum as read from the wire.
    pub crc: u32,
}

/// Builds the header for `body`.
///
/// A header is never minted for a body whose own checksum does not verify, so
/// this fails with [`ProtocolError::MalformedData`] in that case.
pub fn generate(body: &[u8]) -> Result<[u8; HEADER_SIZE]> {
    if !checksum::check(body)? {
        return Err(ProtocolError::MalformedData(
            constants::ERR_PAYLOAD_CHECKSUM.to_string(),
        ));
    }
    let length =
        i32::try_from(body.len()).map_err(|_| ProtocolError::OversizedFrame(body.len()))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0] = HEADER_TAG;
    header[BODY_LENGTH_OFFSET..CRC_OFFSET].copy_from_slice(&encoding::int_to_bytes(length));
    let crc = checksum::checksum(&header[..CRC_OFFSET]);
    header[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    Ok(header)
}

/// Prefixes `body` with its header, producing a complete frame.
pub fn attach(body: &[u8]) -> Result<Vec<u8>> {
    let header = generate(body)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Validates and decodes a header.
///
/// Rejects headers that are not exactly [`HEADER_SIZE`] bytes ([`ProtocolError::MissingData`]),
/// whose checksum does not verify, whose tag is unknown, or whose body length is not
/// strictly positive ([`ProtocolError::MalformedData`]).
pub fn parse(header: &[u8]) -> Result<HeaderInfo> {
    if header.len() != HEADER_SIZE {
        return Err(ProtocolError::MissingData(format!(
            "invalid header length, expected {HEADER_SIZE}, found {}",
            header.len()
        )));
    }

    let (covered, trailer) = header.split_at(CRC_OFFSET);
    if !checksum::check(header)? {
        return Err(ProtocolError::MalformedData(
            constants::ERR_HEADER_CHECKSUM.to_string(),
        ));
    }

    let tag = covered[0];
    if tag != HEADER_TAG {
        return Err(ProtocolError::MalformedData(format!(
            "{}: {tag:#04x}",
            constants::ERR_HEADER_TAG
        )));
    }

    let size =
        encoding::bytes_to_int(&covered[BODY_LENGTH_OFFSET..BODY_LENGTH_OFFSET + BYTES_PER_INT])?;
    if size <= 0 {
        return Err(ProtocolError::MalformedData(format!("invalid size: {size}")));
    }

    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

    Ok(HeaderInfo {
        tag,
        size: size as usize,
        crc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forge(tag: u8, size: i32) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = tag;
        header[BODY_LENGTH_OFFSET..CRC_OFFSET].copy_from_slice(&size.to_le_bytes());
        let crc = checksum::checksum(&header[..CRC_OFFSET]);
        header[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        header
    }

    #[test]
    fn test_layout() {
        let body = checksum::attach(b"hello");
        let header = generate(&body).unwrap();
        assert_eq!(header[0], HEADER_TAG);
        assert_eq!(&header[1..4], &[0, 0, 0]);
        assert_eq!(&header[4..8], &9i32.to_le_bytes());
        assert_eq!(
            u32::from_le_bytes([header[8], header[9], header[10], header[11]]),
            checksum::checksum(&header[..8])
        );
    }

    #[test]
    fn test_parse_generated() {
        let body = checksum::attach(b"hello");
        let info = parse(&generate(&body).unwrap()).unwrap();
        assert_eq!(info.tag, HEADER_TAG);
        assert_eq!(info.size, body.len());
    }

    #[test]
    fn test_generate_rejects_corrupt_body() {
        let mut body = checksum::attach(b"hello");
        body[0] ^= 0xFF;
        assert!(matches!(generate(&body), Err(ProtocolError::MalformedData(_))));
        assert!(matches!(attach(&body), Err(ProtocolError::MalformedData(_))));
    }

    #[test]
    fn test_generate_rejects_short_body() {
        assert!(matches!(generate(&[1, 2]), Err(ProtocolError::MissingData(_))));
    }

    #[test]
    fn test_parse_wrong_length() {
        assert!(matches!(parse(&[0u8; 11]), Err(ProtocolError::MissingData(_))));
        assert!(matches!(parse(&[0u8; 13]), Err(ProtocolError::MissingData(_))));
    }

    #[test]
    fn test_parse_rejects_zero_size() {
        let header = forge(HEADER_TAG, 0);
        assert!(matches!(parse(&header), Err(ProtocolError::MalformedData(_))));
    }

    #[test]
    fn test_parse_rejects_negative_size() {
        let header = forge(HEADER_TAG, -5);
        assert!(matches!(parse(&header), Err(ProtocolError::MalformedData(_))));
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let header = forge(0x42, 8);
        assert!(matches!(parse(&header), Err(ProtocolError::MalformedData(_))));
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let body = checksum::attach(b"abc");
        let header = generate(&body).unwrap();
        for byte in 0..CRC_OFFSET {
            for bit in 0..8 {
                let mut damaged = header;
                damaged[byte] ^= 1 << bit;
                assert!(
                    matches!(parse(&damaged), Err(ProtocolError::MalformedData(_))),
                    "flip of byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }
}
