//! Raw codec - pass-through for externally encoded messages.
//!
//! Used for binary-format methods whose protobuf encoding happens outside
//! this crate. The payload travels as `Bytes` without a copy.
//!
//! # Example
//!
//! ```
//! use grpc_wire::codec::{MessageCodec, RawCodec};
//! use bytes::Bytes;
//!
//! let bytes = Bytes::from_static(b"\x08\x2a");
//! let encoded = RawCodec::encode(&bytes).unwrap();
//! assert_eq!(encoded.as_ptr(), bytes.as_ptr()); // Same memory
//! ```

use bytes::Bytes;

use super::MessageCodec;
use crate::error::Result;

/// Raw codec that passes bytes through without transformation.
pub struct RawCodec;

impl MessageCodec<Bytes> for RawCodec {
    #[inline]
    fn encode(message: &Bytes) -> Result<Bytes> {
        Ok(message.clone())
    }

    #[inline]
    fn decode(payload: &Bytes) -> Result<Bytes> {
        Ok(payload.clone())
    }
}
