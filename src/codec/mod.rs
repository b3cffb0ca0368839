//! Codec module - message serialization and compression.
//!
//! This module provides:
//!
//! - [`MessageCodec`] - encode/decode between user message types and payload bytes
//! - [`RawCodec`] - pass-through for externally encoded protobuf (zero-copy)
//! - [`JsonCodec`] - JSON using `serde_json`
//! - [`CompressorRegistry`] - `grpc-encoding` algorithms (`identity`, `gzip`, `deflate`)
//!
//! # Design
//!
//! Codecs are marker structs with associated functions rather than trait
//! objects. Handler adapters pick a codec as a type parameter, so codec
//! selection is fixed at compile time.
//!
//! # Example
//!
//! ```
//! use grpc_wire::codec::{JsonCodec, MessageCodec, RawCodec};
//! use bytes::Bytes;
//!
//! let encoded = JsonCodec::encode(&"hello".to_string()).unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let raw = Bytes::from_static(b"binary data");
//! assert_eq!(RawCodec::decode(&raw).unwrap(), raw);
//! ```

mod compression;
mod json;
mod raw;

use bytes::Bytes;

use crate::error::Result;

pub use compression::{
    Compressor, CompressorRegistry, Deflate, Gzip, Identity, GRPC_ACCEPT_ENCODING, GRPC_ENCODING,
};
pub use json::JsonCodec;
pub use raw::RawCodec;

/// Encoder/decoder pair for one message type.
pub trait MessageCodec<T>: Send + Sync + 'static {
    /// Serialize a message into payload bytes.
    fn encode(message: &T) -> Result<Bytes>;

    /// Deserialize payload bytes into a message.
    fn decode(payload: &Bytes) -> Result<T>;
}
