//! Error types for grpc-wire.

use thiserror::Error;

use crate::status::{Code, GrpcStatus};

/// Main error type for all grpc-wire operations.
#[derive(Debug, Error)]
pub enum GrpcWireError {
    /// I/O error while compressing or decompressing a payload.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, reserved bits set, truncated stream, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single message exceeded the configured size limit.
    #[error("Message too large: {size} bytes exceeds maximum {limit}")]
    MessageTooLarge {
        /// Declared or decompressed size of the message.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The request content type is not acceptable on this connection.
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// A path template failed to compile.
    #[error("Invalid path template: {0}")]
    InvalidTemplate(String),

    /// Weaving a request or response for transcoding failed.
    #[error("Transcoding error: {0}")]
    Transcoding(String),

    /// An explicit non-OK status raised by either endpoint.
    #[error("{0}")]
    Status(GrpcStatus),

    /// No handler registered for the given method.
    #[error("Handler not found for method: {0}")]
    HandlerNotFound(String),

    /// Write attempted while the outbound queue reports not-ready.
    #[error("Write while not ready: outbound queue is full")]
    NotReady,

    /// The stream was cancelled locally or by the peer.
    #[error("Call cancelled")]
    Cancelled,

    /// Connection or stream closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl GrpcWireError {
    /// Shorthand for a status error.
    pub fn status(code: Code, message: impl Into<String>) -> Self {
        Self::Status(GrpcStatus::new(code).with_message(message))
    }

    /// Map this error onto the single status that terminates the call.
    ///
    /// Transcoding failures map to INTERNAL here; the transcoded path turns
    /// them into a 400-class response before this mapping is consulted.
    pub fn to_status(&self) -> GrpcStatus {
        match self {
            Self::Status(status) => status.clone(),
            Self::MessageTooLarge { .. } => {
                GrpcStatus::new(Code::ResourceExhausted).with_message(self.to_string())
            }
            Self::HandlerNotFound(_) => {
                GrpcStatus::new(Code::Unimplemented).with_message(self.to_string())
            }
            Self::Cancelled => GrpcStatus::new(Code::Cancelled).with_message("Call cancelled"),
            Self::ConnectionClosed => {
                GrpcStatus::new(Code::Unavailable).with_message("Connection closed")
            }
            Self::Json(e) => GrpcStatus::new(Code::InvalidArgument).with_message(e.to_string()),
            Self::Io(_)
            | Self::Protocol(_)
            | Self::UnsupportedMediaType(_)
            | Self::InvalidTemplate(_)
            | Self::Transcoding(_)
            | Self::NotReady => GrpcStatus::new(Code::Internal).with_message(self.to_string()),
        }
    }
}

impl From<GrpcStatus> for GrpcWireError {
    fn from(status: GrpcStatus) -> Self {
        Self::Status(status)
    }
}

/// Result type alias using GrpcWireError.
pub type Result<T> = std::result::Result<T, GrpcWireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_large_maps_to_resource_exhausted() {
        let err = GrpcWireError::MessageTooLarge { size: 11, limit: 10 };
        let status = err.to_status();
        assert_eq!(status.code(), Code::ResourceExhausted);
        assert!(status.message().unwrap().contains("exceeds maximum 10"));
    }

    #[test]
    fn test_transcoding_maps_to_internal() {
        let err = GrpcWireError::Transcoding("bad body".to_string());
        assert_eq!(err.to_status().code(), Code::Internal);
    }

    #[test]
    fn test_status_passthrough() {
        let err = GrpcWireError::status(Code::NotFound, "no such item");
        let status = err.to_status();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), Some("no such item"));
    }
}
