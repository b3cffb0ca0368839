//! Wire format encoding and decoding.
//!
//! Implements the 5-byte gRPC message prefix:
//! ```text
//! ┌───────┬──────────┬─────────────────┐
//! │ Flags │ Length   │ Payload         │
//! │ 1 byte│ 4 bytes  │ Length bytes    │
//! │       │ uint32 BE│                 │
//! └───────┴──────────┴─────────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{GrpcWireError, Result};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Default maximum message size (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Flag constants for the prefix byte.
pub mod flags {
    /// Payload is compressed with the negotiated `grpc-encoding`.
    pub const COMPRESSED: u8 = 0b0000_0001;
    /// gRPC-Web only: payload is an HTTP/1-style trailer block.
    pub const TRAILERS: u8 = 0b1000_0000;

    /// Bits that must be zero in native gRPC.
    pub const RESERVED_MASK: u8 = 0b0111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(flags: u8, payload_length: u32) -> Self {
        Self {
            flags,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use grpc_wire::protocol::{Header, flags};
    ///
    /// let header = Header::new(flags::COMPRESSED, 4);
    /// assert_eq!(header.encode(), [1, 0, 0, 0, 4]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (5 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            flags: buf[0],
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }

    /// Validate the flags byte.
    ///
    /// The trailers bit is only legal when `allow_trailers` is set (gRPC-Web
    /// responses); the remaining reserved bits must always be zero.
    pub fn validate(&self, allow_trailers: bool) -> Result<()> {
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(GrpcWireError::Protocol(format!(
                "gRPC frame header malformed: reserved bits not zero (flags 0x{:02x})",
                self.flags
            )));
        }
        if self.is_trailers() && !allow_trailers {
            return Err(GrpcWireError::Protocol(
                "Trailers frame not allowed on this stream".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if the payload is compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        flags::has_flag(self.flags, flags::COMPRESSED)
    }

    /// Check if this prefixes a gRPC-Web trailer block.
    #[inline]
    pub fn is_trailers(&self) -> bool {
        flags::has_flag(self.flags, flags::TRAILERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(flags::COMPRESSED, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let bytes = Header::new(0, 0x01020304).encode();
        assert_eq!(bytes, [0x00, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[0u8; 4]).is_none());
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = Header::new(0b0000_0010, 0);
        let result = header.validate(true);
        assert!(result.unwrap_err().to_string().contains("reserved bits"));
    }

    #[test]
    fn test_validate_trailers_flag() {
        let header = Header::new(flags::TRAILERS, 0);
        assert!(header.is_trailers());
        assert!(header.validate(true).is_ok());
        assert!(header.validate(false).is_err());
    }

    #[test]
    fn test_flag_accessors() {
        let header = Header::new(flags::COMPRESSED, 1);
        assert!(header.is_compressed());
        assert!(!header.is_trailers());
        assert!(header.validate(false).is_ok());
    }
}
