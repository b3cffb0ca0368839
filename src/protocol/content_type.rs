//! Content-type sniffing and protocol negotiation.
//!
//! Recognized media types, in sniffing order:
//!
//! | Media type | Protocol | Format |
//! | --- | --- | --- |
//! | `application/grpc`, `application/grpc+proto` | native | binary |
//! | `application/grpc+json` | native | JSON |
//! | `application/grpc-web`, `application/grpc-web+proto` | web | binary |
//! | `application/grpc-web+json` | web | JSON |
//! | `application/grpc-web-text`, `application/grpc-web-text+proto` | web-text | binary |
//! | `application/grpc-web-text+json` | web-text | JSON |
//! | `application/json` | transcoded | JSON |
//!
//! Parameters (`; charset=utf-8`) are ignored and matching is
//! case-insensitive.

use serde::{Deserialize, Serialize};

/// How a message payload is serialized inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Protocol buffers binary encoding.
    Binary,
    /// Protocol buffers JSON mapping.
    Json,
}

impl WireFormat {
    /// Short name used in logs and descriptors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "proto",
            Self::Json => "json",
        }
    }
}

/// The wire sub-protocol of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// gRPC over HTTP/2, trailers in HTTP trailers.
    Native,
    /// gRPC-Web, trailers in a body frame.
    Web,
    /// gRPC-Web with the whole body base64-encoded.
    WebText,
    /// Unframed JSON produced by HTTP/JSON transcoding.
    Transcoded,
}

impl Protocol {
    /// Whether messages are length-prefix framed.
    #[inline]
    pub fn is_framed(self) -> bool {
        !matches!(self, Self::Transcoded)
    }

    /// Whether trailers travel in the body as a flagged frame.
    #[inline]
    pub fn trailers_in_body(self) -> bool {
        matches!(self, Self::Web | Self::WebText)
    }

    /// Whether this protocol is acceptable on an HTTP/1.1 connection by default.
    #[inline]
    pub fn is_http1_compatible(self) -> bool {
        !matches!(self, Self::Native)
    }
}

/// A negotiated (protocol, format) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerializationFormat {
    pub protocol: Protocol,
    pub format: WireFormat,
}

/// The JSON content type used by transcoding.
pub const TRANSCODING_CONTENT_TYPE: &str = "application/json";

impl SerializationFormat {
    pub const fn new(protocol: Protocol, format: WireFormat) -> Self {
        Self { protocol, format }
    }

    /// Canonical media type to send for this format.
    pub fn media_type(&self) -> &'static str {
        match (self.protocol, self.format) {
            (Protocol::Native, WireFormat::Binary) => "application/grpc+proto",
            (Protocol::Native, WireFormat::Json) => "application/grpc+json",
            (Protocol::Web, WireFormat::Binary) => "application/grpc-web+proto",
            (Protocol::Web, WireFormat::Json) => "application/grpc-web+json",
            (Protocol::WebText, WireFormat::Binary) => "application/grpc-web-text+proto",
            (Protocol::WebText, WireFormat::Json) => "application/grpc-web-text+json",
            (Protocol::Transcoded, _) => TRANSCODING_CONTENT_TYPE,
        }
    }

    /// Sniff a `content-type` header value.
    ///
    /// ```
    /// use grpc_wire::protocol::{sniff_content_type, Protocol, WireFormat};
    ///
    /// let fmt = sniff_content_type("application/grpc-web-text+json; charset=utf-8").unwrap();
    /// assert_eq!(fmt.protocol, Protocol::WebText);
    /// assert_eq!(fmt.format, WireFormat::Json);
    /// assert!(sniff_content_type("text/plain").is_none());
    /// ```
    pub fn sniff(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if let Some(rest) = essence.strip_prefix("application/grpc") {
            let (protocol, suffix) = if let Some(rest) = rest.strip_prefix("-web-text") {
                (Protocol::WebText, rest)
            } else if let Some(rest) = rest.strip_prefix("-web") {
                (Protocol::Web, rest)
            } else {
                (Protocol::Native, rest)
            };
            let format = match suffix {
                "" | "+proto" => WireFormat::Binary,
                "+json" => WireFormat::Json,
                _ => return None,
            };
            return Some(Self::new(protocol, format));
        }

        if essence == TRANSCODING_CONTENT_TYPE {
            return Some(Self::new(Protocol::Transcoded, WireFormat::Json));
        }
        None
    }
}

/// Free-function form of [`SerializationFormat::sniff`].
#[inline]
pub fn sniff_content_type(content_type: &str) -> Option<SerializationFormat> {
    SerializationFormat::sniff(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_native() {
        for ct in ["application/grpc", "application/grpc+proto", "Application/GRPC"] {
            let fmt = sniff_content_type(ct).unwrap();
            assert_eq!(fmt, SerializationFormat::new(Protocol::Native, WireFormat::Binary));
        }
        let fmt = sniff_content_type("application/grpc+json").unwrap();
        assert_eq!(fmt.format, WireFormat::Json);
    }

    #[test]
    fn test_sniff_web_and_web_text() {
        assert_eq!(
            sniff_content_type("application/grpc-web").unwrap().protocol,
            Protocol::Web
        );
        assert_eq!(
            sniff_content_type("application/grpc-web+json").unwrap(),
            SerializationFormat::new(Protocol::Web, WireFormat::Json)
        );
        assert_eq!(
            sniff_content_type("application/grpc-web-text+proto").unwrap(),
            SerializationFormat::new(Protocol::WebText, WireFormat::Binary)
        );
    }

    #[test]
    fn test_sniff_transcoding_json() {
        let fmt = sniff_content_type("application/json; charset=utf-8").unwrap();
        assert_eq!(fmt.protocol, Protocol::Transcoded);
        assert!(!fmt.protocol.is_framed());
    }

    #[test]
    fn test_sniff_rejects_unknown() {
        assert!(sniff_content_type("application/grpc+thrift").is_none());
        assert!(sniff_content_type("application/grpcx").is_none());
        assert!(sniff_content_type("text/html").is_none());
        assert!(sniff_content_type("").is_none());
    }

    #[test]
    fn test_media_type_is_sniffable() {
        for protocol in [Protocol::Native, Protocol::Web, Protocol::WebText] {
            for format in [WireFormat::Binary, WireFormat::Json] {
                let fmt = SerializationFormat::new(protocol, format);
                assert_eq!(sniff_content_type(fmt.media_type()), Some(fmt));
            }
        }
    }

    #[test]
    fn test_protocol_properties() {
        assert!(Protocol::Web.trailers_in_body());
        assert!(!Protocol::Native.trailers_in_body());
        assert!(!Protocol::Native.is_http1_compatible());
        assert!(Protocol::Transcoded.is_http1_compatible());
    }
}
