//! `grpc-web-text` body encoding.
//!
//! The whole framed byte stream is base64 encoded. Senders encode each write
//! separately, so a body is a concatenation of independently padded base64
//! chunks. Every chunk is a whole number of 4-character quanta, so the
//! decoder can decode each complete quantum as soon as it arrives, restarting
//! after every padded one. At most three characters wait for more input.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use bytes::{Bytes, BytesMut};

use crate::error::{GrpcWireError, Result};

/// Base64-encode one outbound chunk of framed bytes.
pub fn encode_chunk(framed: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(framed))
}

/// Incremental base64 body decoder.
#[derive(Debug, Default)]
pub struct WebTextDecoder {
    text: BytesMut,
}

impl WebTextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append body text and decode every complete quantum. Whitespace is
    /// dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Bytes> {
        self.text
            .extend(chunk.iter().copied().filter(|b| !b.is_ascii_whitespace()));
        let whole = self.text.len() / 4 * 4;
        if whole == 0 {
            return Ok(Bytes::new());
        }
        let quanta = self.text.split_to(whole);
        decode_concatenated(&quanta).map(Bytes::from)
    }

    /// Number of text bytes waiting for the rest of their quantum.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Decode the unpadded tail left at end-of-stream.
    pub fn finish(self) -> Result<Bytes> {
        decode_concatenated(&self.text).map(Bytes::from)
    }
}

/// Decode a concatenation of base64 chunks, each of which may carry padding.
///
/// ```
/// use grpc_wire::protocol::decode_concatenated;
///
/// let joined = b"aGk=dGhlcmU=";
/// assert_eq!(decode_concatenated(joined).unwrap(), b"hithere");
/// ```
pub fn decode_concatenated(text: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() / 4 * 3);
    let mut start = 0;

    while start < text.len() {
        let mut end = start;
        loop {
            let quantum_end = (end + 4).min(text.len());
            let padded = text[end..quantum_end].contains(&b'=');
            end = quantum_end;
            if padded || end == text.len() {
                break;
            }
        }

        let segment = &text[start..end];
        let engine = if segment.len() % 4 == 0 {
            &STANDARD
        } else {
            &STANDARD_NO_PAD
        };
        engine
            .decode_vec(segment, &mut out)
            .map_err(|e| GrpcWireError::Protocol(format!("Invalid grpc-web-text body: {}", e)))?;
        start = end;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, Deframed, MessageDeframer};

    fn decode_all(decoder: &mut WebTextDecoder, chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&decoder.push(chunk).unwrap());
        }
        out
    }

    #[test]
    fn test_single_chunk() {
        let mut decoder = WebTextDecoder::new();
        assert_eq!(&decoder.push(&encode_chunk(b"hello")).unwrap()[..], b"hello");
        assert!(decoder.is_empty());
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_concatenated_padded_chunks() {
        let mut decoder = WebTextDecoder::new();
        let (a, bc, def) = (encode_chunk(b"a"), encode_chunk(b"bc"), encode_chunk(b"def"));
        assert_eq!(decode_all(&mut decoder, &[&a[..], &bc[..], &def[..]]), b"abcdef");
    }

    #[test]
    fn test_split_mid_quantum_and_whitespace() {
        let text = encode_chunk(b"split across pushes");
        let mut decoder = WebTextDecoder::new();
        assert!(decoder.push(&text[..3]).unwrap().is_empty());
        assert_eq!(decoder.len(), 3);
        let out = decode_all(&mut decoder, &[&b"\r\n"[..], &text[3..]]);
        assert_eq!(out, b"split across pushes");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_only_partial_quantum_is_held() {
        let text = encode_chunk(&[7u8; 3000]);
        let mut decoder = WebTextDecoder::new();
        let mut decoded = 0;
        for piece in text.chunks(1001) {
            decoded += decoder.push(piece).unwrap().len();
            assert!(decoder.len() < 4);
        }
        assert_eq!(decoded, 3000);
    }

    #[test]
    fn test_unpadded_tail() {
        assert_eq!(decode_concatenated(b"aGk").unwrap(), b"hi");

        let mut decoder = WebTextDecoder::new();
        assert!(decoder.push(b"aGk").unwrap().is_empty());
        assert_eq!(&decoder.finish().unwrap()[..], b"hi");
    }

    #[test]
    fn test_invalid_text() {
        let err = decode_concatenated(b"!!!!").unwrap_err();
        assert!(err.to_string().contains("grpc-web-text"));
        assert!(WebTextDecoder::new().push(b"!!!!").is_err());
    }

    #[test]
    fn test_framed_stream_through_text() {
        let mut decoder = WebTextDecoder::new();
        let (one, two) = (
            encode_chunk(&build_frame(b"one", false)),
            encode_chunk(&build_frame(b"two", false)),
        );
        let framed = decode_all(&mut decoder, &[&one[..], &two[..]]);

        let items = MessageDeframer::default().push(&framed).unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Deframed::Frame(f) if f.payload() == b"two"));
    }

    #[test]
    fn test_empty_body() {
        assert!(WebTextDecoder::new().finish().unwrap().is_empty());
    }
}
