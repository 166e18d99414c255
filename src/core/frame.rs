//! Complete wire frames.
//!
//! A [`Frame`] is built once from a payload and never mutated afterwards; both
//! checksums are derived from the payload during construction.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::checksum::{self, CHECKSUM_SIZE};
use crate::core::header::{self, HeaderInfo, HEADER_SIZE};
use crate::error::{ProtocolError, Result};

/// An encoded `header || payload || payload_crc` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Encodes `payload` into a frame.
    pub fn new(payload: &[u8]) -> Result<Self> {
        let body = checksum::attach(payload);
        let header = header::generate(&body)?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
        buf.put_slice(&header);
        buf.put_slice(&body);
        Ok(Self {
            bytes: buf.freeze(),
        })
    }

    /// Decodes and fully validates a frame held entirely in memory.
    ///
    /// `buf` must contain exactly one frame, no more and no less.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MissingData(format!(
                "frame of {} bytes is shorter than its header",
                buf.len()
            )));
        }
        let (head, body) = buf.split_at(HEADER_SIZE);
        let info = header::parse(head)?;
        if body.len() < info.size {
            return Err(ProtocolError::MissingData(format!(
                "header announces {} body bytes, found {}",
                info.size,
                body.len()
            )));
        }
        if body.len() > info.size {
            return Err(ProtocolError::MalformedData(format!(
                "{} trailing bytes after a {}-byte body",
                body.len() - info.size,
                info.size
            )));
        }
        checksum::check_and_remove(body)?;
        Ok(Self {
            bytes: Bytes::copy_from_slice(buf),
        })
    }

    /// The header fields of this frame.
    pub fn header(&self) -> HeaderInfo {
        // Construction already validated the header.
        HeaderInfo {
            tag: self.bytes[0],
            size: self.bytes.len() - HEADER_SIZE,
            crc: u32::from_le_bytes([
                self.bytes[8],
                self.bytes[9],
                self.bytes[10],
                self.bytes[11],
            ]),
        }
    }

    /// The application payload carried by this frame.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..self.bytes.len() - CHECKSUM_SIZE]
    }

    /// The full wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// A frame is never empty; it always carries at least a header and a checksum.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Consumes the frame, returning its wire bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}
