//! Frames and messages.
//!
//! A [`Frame`] is what the deframer produces: prefix plus raw payload. A
//! [`GrpcMessage`] is the payload once it is associated with an encoding and
//! a wire format, which is what decoders and handlers consume.
//!
//! # Example
//!
//! ```
//! use grpc_wire::protocol::{build_frame, Frame, Header, HEADER_SIZE};
//! use bytes::Bytes;
//!
//! let bytes = build_frame(b"ping", false);
//! assert_eq!(bytes.len(), HEADER_SIZE + 4);
//!
//! let frame = Frame::new(Header::new(0, 4), Bytes::from_static(b"ping"));
//! assert!(!frame.is_compressed());
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::content_type::WireFormat;
use super::wire_format::{flags, Header, HEADER_SIZE};

/// Encoding name for uncompressed payloads.
pub const IDENTITY: &str = "identity";

/// A complete length-prefixed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded prefix.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.header.is_compressed()
    }

    /// Check if this is a gRPC-Web trailers frame.
    #[inline]
    pub fn is_trailers(&self) -> bool {
        self.header.is_trailers()
    }

    /// Turn the frame into a message. A compressed frame keeps `encoding` so
    /// the caller can pick the matching decompressor.
    pub fn into_message(self, encoding: &str, format: WireFormat) -> GrpcMessage {
        let encoding = if self.is_compressed() { encoding } else { IDENTITY };
        GrpcMessage::new(encoding, format, self.payload)
    }
}

/// An immutable (encoding, format, payload) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcMessage {
    encoding: String,
    format: WireFormat,
    payload: Bytes,
}

impl GrpcMessage {
    pub fn new(encoding: impl Into<String>, format: WireFormat, payload: Bytes) -> Self {
        Self {
            encoding: encoding.into(),
            format,
            payload,
        }
    }

    /// Uncompressed message.
    pub fn identity(format: WireFormat, payload: Bytes) -> Self {
        Self::new(IDENTITY, format, payload)
    }

    #[inline]
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    #[inline]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.encoding != IDENTITY
    }

    /// Take the payload, consuming the message.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Build a complete frame as a single buffer.
pub fn build_frame(payload: &[u8], compressed: bool) -> Bytes {
    let frame_flags = if compressed { flags::COMPRESSED } else { 0 };
    build_frame_with_flags(payload, frame_flags)
}

/// Build a gRPC-Web trailers frame around an encoded trailer block.
pub fn build_trailers_frame(block: &[u8]) -> Bytes {
    build_frame_with_flags(block, flags::TRAILERS)
}

fn build_frame_with_flags(payload: &[u8], frame_flags: u8) -> Bytes {
    let header = Header::new(frame_flags, payload.len() as u32);
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}
