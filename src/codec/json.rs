//! JSON codec using `serde_json`.
//!
//! Serves methods registered with the JSON wire format, including every
//! transcoded method. The transcoding weaver produces a JSON document that
//! this codec decodes into the handler's request type.
//!
//! # Example
//!
//! ```
//! use grpc_wire::codec::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Hello {
//!     name: String,
//! }
//!
//! let encoded = JsonCodec::encode(&Hello { name: "ada".into() }).unwrap();
//! assert_eq!(&encoded[..], br#"{"name":"ada"}"#);
//!
//! let decoded: Hello = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.name, "ada");
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::MessageCodec;
use crate::error::Result;

/// JSON codec (protobuf JSON mapping is left to the message types' serde impls).
pub struct JsonCodec;

impl<T> MessageCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    #[inline]
    fn encode(message: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(message)?))
    }

    #[inline]
    fn decode(payload: &Bytes) -> Result<T> {
        Ok(serde_json::from_slice(payload)?)
    }
}
