//! Body decoding shared by the server and client call state machines.
//!
//! Turns raw body bytes into messages: base64 text is decoded quantum by
//! quantum for `grpc-web-text`, frames are extracted, and compressed frames
//! are inflated within the size limit. Problems with a single message are reported as
//! [`BodyItem::Invalid`] so the caller can decide whether the stream
//! survives; malformed framing is a hard error.

use std::sync::Arc;

use bytes::Bytes;

use super::{
    build_frame, encode_chunk, Deframed, Frame, GrpcMessage, MessageDeframer, Protocol, WebTextDecoder,
    WireFormat, IDENTITY,
};
use crate::codec::Compressor;
use crate::error::{GrpcWireError, Result};

/// One decoded item of a body.
#[derive(Debug)]
pub enum BodyItem {
    /// A complete, decompressed message.
    Message(GrpcMessage),
    /// A message that was rejected (too large, failed to inflate).
    Invalid(GrpcWireError),
    /// The header block of a gRPC-Web trailers frame.
    Trailers(Bytes),
}

/// Incremental body decoder for the framed protocols.
pub struct BodyDecoder {
    deframer: MessageDeframer,
    web_text: Option<WebTextDecoder>,
    decompressor: Option<Arc<dyn Compressor>>,
    format: WireFormat,
    max_message_size: usize,
}

impl BodyDecoder {
    /// Decoder for `protocol`. Trailers frames are accepted only when
    /// `accept_trailers` is set.
    pub fn new(protocol: Protocol, max_message_size: usize, accept_trailers: bool) -> Self {
        Self {
            deframer: MessageDeframer::new(max_message_size).allow_trailers(accept_trailers),
            web_text: (protocol == Protocol::WebText).then(WebTextDecoder::new),
            decompressor: None,
            format: WireFormat::Binary,
            max_message_size,
        }
    }

    /// Tag decoded messages with `format`. Defaults to binary.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Use `decompressor` for frames with the compressed flag.
    pub fn with_decompressor(mut self, decompressor: Option<Arc<dyn Compressor>>) -> Self {
        self.decompressor = decompressor;
        self
    }

    /// Feed body bytes.
    ///
    /// For `grpc-web-text` only complete base64 quanta reach the deframer;
    /// an oversized frame is skipped as its text arrives.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<BodyItem>> {
        let items = match &mut self.web_text {
            Some(text) => {
                let framed = text.push(data)?;
                if framed.is_empty() {
                    return Ok(Vec::new());
                }
                self.deframer.push(&framed)?
            }
            None => self.deframer.push(data)?,
        };
        self.convert(items)
    }

    /// Signal end of body and return anything still pending.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for invalid base64 or a truncated frame.
    pub fn finish(&mut self) -> Result<Vec<BodyItem>> {
        let mut items = Vec::new();
        if let Some(text) = self.web_text.take() {
            let framed = text.finish()?;
            let deframed = self.deframer.push(&framed)?;
            items = self.convert(deframed)?;
        }
        self.deframer.finish()?;
        Ok(items)
    }

    fn convert(&self, deframed: Vec<Deframed>) -> Result<Vec<BodyItem>> {
        let mut items = Vec::with_capacity(deframed.len());
        for item in deframed {
            items.push(match item {
                Deframed::Frame(frame) if frame.is_trailers() => BodyItem::Trailers(frame.payload),
                Deframed::Frame(frame) => self.message(frame)?,
                Deframed::Oversized { size, limit } => {
                    BodyItem::Invalid(GrpcWireError::MessageTooLarge { size, limit })
                }
            });
        }
        Ok(items)
    }

    fn message(&self, frame: Frame) -> Result<BodyItem> {
        let encoding = match &self.decompressor {
            Some(decompressor) => decompressor.encoding(),
            None if frame.is_compressed() => {
                return Err(GrpcWireError::Protocol(
                    "Compressed message received without a negotiated grpc-encoding".to_string(),
                ));
            }
            None => IDENTITY,
        };
        let message = frame.into_message(encoding, self.format);
        let Some(decompressor) = self.decompressor.as_ref().filter(|_| message.is_compressed()) else {
            return Ok(BodyItem::Message(message));
        };
        Ok(
            match decompressor.decompress(message.payload(), self.max_message_size) {
                Ok(payload) => BodyItem::Message(GrpcMessage::identity(message.format(), payload)),
                Err(e) => BodyItem::Invalid(e),
            },
        )
    }
}

/// Frame one outgoing message for `protocol`.
///
/// Non-empty payloads are compressed when a compressor is given; web-text
/// frames are base64 encoded.
pub fn encode_message(
    payload: &[u8],
    compressor: Option<&dyn Compressor>,
    protocol: Protocol,
) -> Result<Bytes> {
    let frame = match compressor {
        Some(compressor) if !payload.is_empty() => build_frame(&compressor.compress(payload)?, true),
        _ => build_frame(payload, false),
    };
    Ok(match protocol {
        Protocol::WebText => encode_chunk(&frame),
        _ => frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressorRegistry;
    use crate::protocol::{build_frame, build_trailers_frame, encode_chunk};

    fn messages(items: Vec<BodyItem>) -> Vec<Bytes> {
        items
            .into_iter()
            .filter_map(|item| match item {
                BodyItem::Message(m) => Some(m.into_payload()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_native_split_across_pushes() {
        let mut decoder = BodyDecoder::new(Protocol::Native, 1024, false);
        let framed = build_frame(b"hello", false);

        assert!(decoder.push(&framed[..3]).unwrap().is_empty());
        let items = decoder.push(&framed[3..]).unwrap();
        assert_eq!(messages(items), vec![Bytes::from_static(b"hello")]);
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_web_text_decodes_as_it_arrives() {
        let mut decoder = BodyDecoder::new(Protocol::WebText, 1024, true);
        let first = encode_chunk(&build_frame(b"one", false));
        let trailers = encode_chunk(&build_trailers_frame(b"grpc-status:0\r\n"));

        let items = decoder.push(&first[..first.len() - 2]).unwrap();
        assert!(items.is_empty());
        let items = decoder.push(&first[first.len() - 2..]).unwrap();
        assert!(matches!(&items[0], BodyItem::Message(m) if &m.payload()[..] == b"one"));

        let items = decoder.push(&trailers).unwrap();
        assert!(matches!(&items[0], BodyItem::Trailers(b) if b.starts_with(b"grpc-status")));
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_web_text_oversized_is_rejected_while_streaming() {
        let mut decoder = BodyDecoder::new(Protocol::WebText, 10, false);
        let text = encode_chunk(&build_frame(&[b'x'; 1_000_000], false));

        let mut rejected = None;
        for piece in text.chunks(4096) {
            for item in decoder.push(piece).unwrap() {
                match item {
                    BodyItem::Invalid(e) => rejected = Some(e),
                    BodyItem::Message(_) | BodyItem::Trailers(_) => panic!("unexpected item"),
                }
            }
            if rejected.is_some() {
                break;
            }
        }
        assert!(matches!(
            rejected,
            Some(GrpcWireError::MessageTooLarge { size: 1_000_000, limit: 10 })
        ));
    }

    #[test]
    fn test_oversized_message_is_invalid_not_fatal() {
        let mut decoder = BodyDecoder::new(Protocol::Native, 10, false);
        let mut body = build_frame(&[0u8; 11], false).to_vec();
        body.extend_from_slice(&build_frame(b"ok", false));

        let items = decoder.push(&body).unwrap();
        assert!(matches!(
            &items[0],
            BodyItem::Invalid(GrpcWireError::MessageTooLarge { size: 11, limit: 10 })
        ));
        assert!(matches!(&items[1], BodyItem::Message(m) if &m.payload()[..] == b"ok"));
    }

    #[test]
    fn test_compressed_frames_are_inflated() {
        let gzip = CompressorRegistry::with_defaults().get("gzip").unwrap();
        let packed = gzip.compress(b"squeeze me").unwrap();

        let mut decoder = BodyDecoder::new(Protocol::Native, 1024, false)
            .with_decompressor(Some(gzip))
            .with_format(WireFormat::Json);
        let mut items = decoder.push(&build_frame(&packed, true)).unwrap();
        let Some(BodyItem::Message(message)) = items.pop() else {
            panic!("expected a message");
        };
        assert_eq!(message, GrpcMessage::identity(WireFormat::Json, Bytes::from_static(b"squeeze me")));
        assert!(!message.is_compressed());
    }

    #[test]
    fn test_compressed_without_encoding_is_protocol_error() {
        let mut decoder = BodyDecoder::new(Protocol::Native, 1024, false);
        let err = decoder.push(&build_frame(b"x", true)).unwrap_err();
        assert!(matches!(err, GrpcWireError::Protocol(_)));
    }

    #[test]
    fn test_encode_message_for_web_text() {
        let gzip = CompressorRegistry::with_defaults().get("gzip").unwrap();
        let encoded = encode_message(b"hello", Some(gzip.as_ref()), Protocol::WebText).unwrap();

        let mut decoder =
            BodyDecoder::new(Protocol::WebText, 1024, false).with_decompressor(Some(gzip));
        decoder.push(&encoded).unwrap();
        assert_eq!(messages(decoder.finish().unwrap()), vec![Bytes::from_static(b"hello")]);

        // Empty messages are never compressed.
        let empty = encode_message(b"", None, Protocol::Native).unwrap();
        assert_eq!(&empty[..], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_body() {
        let mut decoder = BodyDecoder::new(Protocol::Web, 1024, true);
        let framed = build_frame(b"hello", false);
        decoder.push(&framed[..7]).unwrap();
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_trailers_rejected_when_not_accepted() {
        let mut decoder = BodyDecoder::new(Protocol::Web, 1024, false);
        assert!(decoder.push(&build_trailers_frame(b"a:b\r\n")).is_err());
    }
}
