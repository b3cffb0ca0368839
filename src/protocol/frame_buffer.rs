//! Deframer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 5 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//! - `Discarding`: Header declared an oversized payload, skip N bytes
//!
//! An oversized message is reported as [`Deframed::Oversized`] instead of an
//! error so the caller decides whether the stream survives it. Malformed
//! prefixes (reserved bits set) are protocol errors.
//!
//! # Example
//!
//! ```
//! use grpc_wire::protocol::{build_frame, Deframed, MessageDeframer};
//!
//! let mut deframer = MessageDeframer::new(1024);
//! let bytes = build_frame(b"hello", false);
//!
//! let items = deframer.push(&bytes).unwrap();
//! assert!(matches!(&items[0], Deframed::Frame(f) if f.payload() == b"hello"));
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{GrpcWireError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 5 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header, remaining: usize },
    /// Skipping the payload of an oversized message.
    Discarding { remaining: usize },
}

/// One item extracted from the byte stream.
#[derive(Debug, Clone)]
pub enum Deframed {
    /// A complete frame within the size limit.
    Frame(Frame),
    /// A message whose declared length exceeded the limit; its payload is
    /// discarded as it arrives.
    Oversized { size: usize, limit: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct MessageDeframer {
    /// Accumulated bytes from body reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_message_size: usize,
    /// Accept gRPC-Web trailers frames.
    allow_trailers: bool,
}

impl MessageDeframer {
    /// Create a deframer with the given size limit.
    pub fn new(max_message_size: usize) -> Self {
        Self::with_capacity(8 * 1024, max_message_size)
    }

    /// Create a deframer with custom initial capacity and size limit.
    pub fn with_capacity(capacity: usize, max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
            max_message_size,
            allow_trailers: false,
        }
    }

    /// Accept frames flagged as gRPC-Web trailers.
    pub fn allow_trailers(mut self, allow: bool) -> Self {
        self.allow_trailers = allow;
        self
    }

    /// Push data into the buffer and extract all complete items.
    ///
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a frame prefix is malformed.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Deframed>> {
        self.buffer.extend_from_slice(data);

        let mut items = Vec::new();
        while let Some(item) = self.try_extract_one()? {
            items.push(item);
        }
        Ok(items)
    }

    /// Try to extract a single item from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Deframed>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let Some(header) = Header::decode(&self.buffer) else {
                        return Ok(None);
                    };
                    header.validate(self.allow_trailers)?;
                    self.buffer.advance(HEADER_SIZE);

                    let size = header.payload_length as usize;
                    if size > self.max_message_size && !header.is_trailers() {
                        self.state = State::Discarding { remaining: size };
                        return Ok(Some(Deframed::Oversized {
                            size,
                            limit: self.max_message_size,
                        }));
                    }

                    if size == 0 {
                        return Ok(Some(Deframed::Frame(Frame::new(header, Bytes::new()))));
                    }

                    self.state = State::WaitingForPayload {
                        header,
                        remaining: size,
                    };
                }

                State::WaitingForPayload { header, remaining } => {
                    let remaining = *remaining;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    let header = *header;
                    self.state = State::WaitingForHeader;
                    return Ok(Some(Deframed::Frame(Frame::new(header, payload))));
                }

                State::Discarding { remaining } => {
                    let skip = (*remaining).min(self.buffer.len());
                    let left = *remaining - skip;
                    self.buffer.advance(skip);
                    if left > 0 {
                        self.state = State::Discarding { remaining: left };
                        return Ok(None);
                    }
                    self.state = State::WaitingForHeader;
                }
            }
        }
    }

    /// Signal end of stream.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the stream ended mid-frame.
    pub fn finish(&self) -> Result<()> {
        match &self.state {
            State::WaitingForHeader if self.buffer.is_empty() => Ok(()),
            State::Discarding { .. } => Ok(()),
            _ => Err(GrpcWireError::Protocol(format!(
                "Stream ended mid-frame with {} buffered bytes",
                self.buffer.len()
            ))),
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
            State::Discarding { .. } => "Discarding",
        }
    }
}

impl Default for MessageDeframer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}
