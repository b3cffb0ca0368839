//! Transport seam - the boundary to the HTTP stack.
//!
//! The HTTP client/server (connections, TLS, HTTP/2 flow control) is not part
//! of this crate. One HTTP stream is modelled as:
//!
//! - a [`RequestHead`] (version, method, URI, headers),
//! - an inbound [`PartReceiver`] of [`StreamPart`]s,
//! - an outbound [`StreamSink`], whose `write` is the only place a stream
//!   suspends waiting for the peer.
//!
//! [`MemoryTransport`] connects a client directly to a server in-process.

mod memory;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use tokio::sync::mpsc;

use crate::error::{GrpcWireError, Result};
use crate::handler::BoxFuture;
use crate::status::ResetCode;

pub use memory::MemoryTransport;

/// One unit of an HTTP stream in either direction.
#[derive(Debug, Clone)]
pub enum StreamPart {
    /// Response headers (`status` set) or informational request headers.
    Headers {
        status: Option<StatusCode>,
        headers: HeaderMap,
        end_of_stream: bool,
    },
    /// Body bytes.
    Data { data: Bytes, end_of_stream: bool },
    /// HTTP trailers; always ends the stream.
    Trailers(HeaderMap),
    /// Stream reset (`RST_STREAM`); always ends the stream.
    Reset(ResetCode),
}

impl StreamPart {
    /// Data part that does not end the stream.
    pub fn data(data: Bytes) -> Self {
        Self::Data {
            data,
            end_of_stream: false,
        }
    }

    /// Whether this part closes the sending side.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Headers { end_of_stream, .. } | Self::Data { end_of_stream, .. } => {
                *end_of_stream
            }
            Self::Trailers(_) | Self::Reset(_) => true,
        }
    }

    /// Whether this part counts against the backpressure limit. Only
    /// non-terminal data does; headers and stream-closing parts always go
    /// through.
    pub fn is_flow_controlled(&self) -> bool {
        matches!(
            self,
            Self::Data {
                end_of_stream: false,
                ..
            }
        )
    }
}

/// Request line and headers of one stream.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub version: Version,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// HTTP/2 request head with no headers.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            version: Version::HTTP_2,
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    /// Set the HTTP version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Add a header. Invalid values are ignored.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Request path without the query.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path and query, as sent on the request line.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// The `content-type` header, if present and valid text.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Whether the stream runs over HTTP/1.x.
    pub fn is_http1(&self) -> bool {
        [Version::HTTP_09, Version::HTTP_10, Version::HTTP_11].contains(&self.version)
    }
}

/// Outbound half of a stream.
pub trait StreamSink: Send + 'static {
    /// Write one part. Suspends while the peer applies flow control.
    fn write(&mut self, part: StreamPart) -> BoxFuture<'_, Result<()>>;
}

impl StreamSink for mpsc::Sender<StreamPart> {
    fn write(&mut self, part: StreamPart) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.send(part)
                .await
                .map_err(|_| GrpcWireError::ConnectionClosed)
        })
    }
}

/// Inbound half of a stream.
pub type PartReceiver = mpsc::Receiver<StreamPart>;

/// Client side of the HTTP stack: opens one stream per call.
pub trait ClientTransport: Send + Sync + 'static {
    /// Send the request head and return the stream halves.
    fn open(&self, head: RequestHead) -> BoxFuture<'_, Result<(Box<dyn StreamSink>, PartReceiver)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_parts() {
        assert!(!StreamPart::data(Bytes::new()).is_terminal());
        assert!(StreamPart::Data {
            data: Bytes::new(),
            end_of_stream: true
        }
        .is_terminal());
        assert!(StreamPart::Trailers(HeaderMap::new()).is_terminal());
        assert!(StreamPart::Reset(ResetCode::CANCEL).is_terminal());
        assert!(StreamPart::Headers {
            status: Some(StatusCode::OK),
            headers: HeaderMap::new(),
            end_of_stream: true,
        }
        .is_terminal());
    }

    #[test]
    fn test_only_open_data_is_flow_controlled() {
        assert!(StreamPart::data(Bytes::from_static(b"x")).is_flow_controlled());
        assert!(!StreamPart::Trailers(HeaderMap::new()).is_flow_controlled());
        assert!(!StreamPart::Headers {
            status: Some(StatusCode::OK),
            headers: HeaderMap::new(),
            end_of_stream: false,
        }
        .is_flow_controlled());
    }

    #[test]
    fn test_request_head_accessors() {
        let head = RequestHead::new(Method::GET, Uri::from_static("/v1/items/42?filter=x"))
            .with_version(Version::HTTP_11)
            .with_header("content-type", "application/json");

        assert_eq!(head.path(), "/v1/items/42");
        assert_eq!(head.path_and_query(), "/v1/items/42?filter=x");
        assert_eq!(head.content_type(), Some("application/json"));
        assert!(head.is_http1());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_peer() {
        let (mut tx, rx) = mpsc::channel::<StreamPart>(1);
        drop(rx);
        let err = tx.write(StreamPart::data(Bytes::new())).await.unwrap_err();
        assert!(matches!(err, GrpcWireError::ConnectionClosed));
    }
}
