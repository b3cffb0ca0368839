//! Server, client and writer configuration.
//!
//! All three structs implement `Default` and deserialize with missing fields
//! filled from the defaults, so a host can load them from any serde format.
//!
//! ```
//! use grpc_wire::config::ServerConfig;
//!
//! let config: ServerConfig = serde_json::from_str(r#"{ "max_request_message_size": 1024 }"#).unwrap();
//! assert_eq!(config.max_request_message_size, 1024);
//! assert!(config.propagate_deadlines);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::backpressure::DEFAULT_MAX_PENDING;
use crate::protocol::{Protocol, WireFormat, DEFAULT_MAX_MESSAGE_SIZE};

/// Default upper bound on bytes merged into one coalesced data write.
pub const DEFAULT_MAX_COALESCE_BYTES: usize = 64 * 1024;

/// Configuration for a stream's writer task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Queued data parts before the stream reports not-ready.
    pub max_pending_parts: usize,
    /// Consecutive data parts are merged into one write up to this many bytes.
    pub max_coalesce_bytes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_parts: DEFAULT_MAX_PENDING,
            max_coalesce_bytes: DEFAULT_MAX_COALESCE_BYTES,
        }
    }
}

impl WriterConfig {
    pub fn with_max_pending_parts(mut self, parts: usize) -> Self {
        self.max_pending_parts = parts;
        self
    }

    pub fn with_max_coalesce_bytes(mut self, bytes: usize) -> Self {
        self.max_coalesce_bytes = bytes;
        self
    }
}

/// Server-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest accepted request message (after decompression).
    pub max_request_message_size: usize,
    /// Largest response message a handler may send.
    pub max_response_message_size: usize,
    /// Honor `grpc-timeout` on incoming requests.
    pub propagate_deadlines: bool,
    /// Protocols accepted on HTTP/1.x connections.
    pub http1_protocols: Vec<Protocol>,
    /// Strip `:verb` suffixes even when no route registered that verb.
    pub match_unregistered_custom_verb: bool,
    /// Decode `+` as a space in transcoded query parameters.
    pub query_param_unescape_plus: bool,
    /// Query parameters never bound into transcoded requests.
    pub system_query_params: Vec<String>,
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_response_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            propagate_deadlines: true,
            http1_protocols: vec![Protocol::Web, Protocol::WebText, Protocol::Transcoded],
            match_unregistered_custom_verb: false,
            query_param_unescape_plus: false,
            system_query_params: Vec::new(),
            writer: WriterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_max_request_message_size(mut self, size: usize) -> Self {
        self.max_request_message_size = size;
        self
    }

    pub fn with_max_response_message_size(mut self, size: usize) -> Self {
        self.max_response_message_size = size;
        self
    }

    pub fn with_propagate_deadlines(mut self, enabled: bool) -> Self {
        self.propagate_deadlines = enabled;
        self
    }

    pub fn with_http1_protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.http1_protocols = protocols;
        self
    }

    pub fn with_match_unregistered_custom_verb(mut self, enabled: bool) -> Self {
        self.match_unregistered_custom_verb = enabled;
        self
    }

    pub fn with_query_param_unescape_plus(mut self, enabled: bool) -> Self {
        self.query_param_unescape_plus = enabled;
        self
    }

    pub fn with_system_query_param(mut self, name: impl Into<String>) -> Self {
        self.system_query_params.push(name.into());
        self
    }

    pub fn with_writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    /// Whether `protocol` may be served over HTTP/1.x.
    pub fn allows_http1(&self, protocol: Protocol) -> bool {
        self.http1_protocols.contains(&protocol)
    }
}

/// Client-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Framed protocol used for calls. Transcoded is not a client protocol.
    pub protocol: Protocol,
    pub format: WireFormat,
    /// Encoding used to compress request messages, if any.
    pub request_compression: Option<String>,
    /// Largest accepted response message (after decompression).
    pub max_response_message_size: usize,
    /// Timeout applied to calls that do not set their own.
    pub default_timeout: Option<Duration>,
    pub writer: WriterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Native,
            format: WireFormat::Binary,
            request_compression: None,
            max_response_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            default_timeout: None,
            writer: WriterConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_request_compression(mut self, encoding: impl Into<String>) -> Self {
        self.request_compression = Some(encoding.into());
        self
    }

    pub fn with_max_response_message_size(mut self, size: usize) -> Self {
        self.max_response_message_size = size;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_request_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(config.allows_http1(Protocol::Web));
        assert!(config.allows_http1(Protocol::Transcoded));
        assert!(!config.allows_http1(Protocol::Native));
    }

    #[test]
    fn test_server_config_partial_json() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"http1_protocols":["native","web_text"],"writer":{"max_pending_parts":4}}"#,
        )
        .unwrap();
        assert!(config.allows_http1(Protocol::Native));
        assert!(!config.allows_http1(Protocol::Web));
        assert_eq!(config.writer.max_pending_parts, 4);
        assert_eq!(config.writer.max_coalesce_bytes, DEFAULT_MAX_COALESCE_BYTES);
    }

    #[test]
    fn test_client_config_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"protocol":"web","format":"json","request_compression":"gzip","default_timeout":{"secs":2,"nanos":0}}"#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::Web);
        assert_eq!(config.format, WireFormat::Json);
        assert_eq!(config.request_compression.as_deref(), Some("gzip"));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::default()
            .with_max_request_message_size(10)
            .with_system_query_param("api_key")
            .with_writer(WriterConfig::default().with_max_pending_parts(2));
        assert_eq!(config.max_request_message_size, 10);
        assert_eq!(config.system_query_params, vec!["api_key".to_string()]);
        assert_eq!(config.writer.max_pending_parts, 2);
    }
}
