//! Protocol module - wire format, framing, and content negotiation.
//!
//! This module implements the gRPC data plane:
//! - 5-byte message prefix encoding/decoding
//! - Deframer for accumulating partial reads
//! - `grpc-web-text` base64 body handling
//! - Content-type sniffing into (protocol, wire format)
//! - Body decoding into messages (deframe, base64, decompress)

mod body;
mod content_type;
mod frame;
mod frame_buffer;
mod web_text;
mod wire_format;

pub use body::{encode_message, BodyDecoder, BodyItem};
pub use content_type::{
    sniff_content_type, Protocol, SerializationFormat, WireFormat, TRANSCODING_CONTENT_TYPE,
};
pub use frame::{build_frame, build_trailers_frame, Frame, GrpcMessage, IDENTITY};
pub use frame_buffer::{Deframed, MessageDeframer};
pub use web_text::{decode_concatenated, encode_chunk, WebTextDecoder};
pub use wire_format::{flags, Header, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
