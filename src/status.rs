//! gRPC status codes, trailer encoding and transport-error mapping.
//!
//! A call ends with exactly one [`GrpcStatus`]. On the wire it travels as
//! trailer-position headers:
//!
//! ```text
//! grpc-status: <decimal code>            (required)
//! grpc-message: <percent-encoded text>   (optional)
//! grpc-status-details-bin: <base64>      (optional)
//! ```
//!
//! When a call fails before any response bytes are sent, the same headers are
//! folded into the response headers ("trailers-only").

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

use crate::percent::{decode_grpc_message, encode_grpc_message};

/// `grpc-status` header name.
pub const GRPC_STATUS: &str = "grpc-status";
/// `grpc-message` header name.
pub const GRPC_MESSAGE: &str = "grpc-message";
/// `grpc-status-details-bin` header name.
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";

/// Binary headers are sent unpadded but either form is accepted.
const BIN_HEADER_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The 17 gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Look up a code by its numeric value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => return None,
        })
    }

    /// Numeric value sent in `grpc-status`.
    #[inline]
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Canonical upper-case name, e.g. `DEADLINE_EXCEEDED`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// HTTP status used when a transcoded call ends with this code.
    pub fn to_http_status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Unknown | Self::Internal | Self::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument | Self::FailedPrecondition | Self::OutOfRange => {
                StatusCode::BAD_REQUEST
            }
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::Aborted => StatusCode::CONFLICT,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    /// Code for a response that carried a non-200 HTTP status and no
    /// `grpc-status`.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Self::Internal,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::Unimplemented,
            429 | 502 | 503 | 504 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    /// Code for a stream reset received from the transport.
    ///
    /// Codes without an agreed mapping (including `STREAM_CLOSED`) become
    /// UNKNOWN.
    pub fn from_reset_code(code: ResetCode) -> Self {
        match code {
            ResetCode::NO_ERROR
            | ResetCode::PROTOCOL_ERROR
            | ResetCode::INTERNAL_ERROR
            | ResetCode::FLOW_CONTROL_ERROR
            | ResetCode::SETTINGS_TIMEOUT
            | ResetCode::FRAME_SIZE_ERROR
            | ResetCode::COMPRESSION_ERROR
            | ResetCode::CONNECT_ERROR => Self::Internal,
            ResetCode::REFUSED_STREAM => Self::Unavailable,
            ResetCode::CANCEL => Self::Cancelled,
            ResetCode::ENHANCE_YOUR_CALM => Self::ResourceExhausted,
            ResetCode::INADEQUATE_SECURITY => Self::PermissionDenied,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP/2 `RST_STREAM` error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResetCode(pub u32);

impl ResetCode {
    pub const NO_ERROR: Self = Self(0x0);
    pub const PROTOCOL_ERROR: Self = Self(0x1);
    pub const INTERNAL_ERROR: Self = Self(0x2);
    pub const FLOW_CONTROL_ERROR: Self = Self(0x3);
    pub const SETTINGS_TIMEOUT: Self = Self(0x4);
    pub const STREAM_CLOSED: Self = Self(0x5);
    pub const FRAME_SIZE_ERROR: Self = Self(0x6);
    pub const REFUSED_STREAM: Self = Self(0x7);
    pub const CANCEL: Self = Self(0x8);
    pub const COMPRESSION_ERROR: Self = Self(0x9);
    pub const CONNECT_ERROR: Self = Self(0xA);
    pub const ENHANCE_YOUR_CALM: Self = Self(0xB);
    pub const INADEQUATE_SECURITY: Self = Self(0xC);
    pub const HTTP_1_1_REQUIRED: Self = Self(0xD);
}

/// Terminal outcome of one call.
#[derive(Debug, Clone)]
pub struct GrpcStatus {
    code: Code,
    message: Option<String>,
    details: Option<Bytes>,
    metadata: HeaderMap,
}

impl GrpcStatus {
    /// Create a status with no message.
    pub fn new(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: None,
            metadata: HeaderMap::new(),
        }
    }

    /// The OK status.
    pub fn ok() -> Self {
        Self::new(Code::Ok)
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach serialized `google.rpc.Status` details.
    pub fn with_details(mut self, details: Bytes) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach extra trailers sent alongside the status.
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    #[inline]
    pub fn code(&self) -> Code {
        self.code
    }

    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[inline]
    pub fn details(&self) -> Option<&Bytes> {
        self.details.as_ref()
    }

    #[inline]
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Write the status headers (and any extra metadata) into `headers`.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.metadata {
            headers.append(name.clone(), value.clone());
        }
        headers.insert(
            HeaderName::from_static(GRPC_STATUS),
            HeaderValue::from(self.code.value()),
        );
        if let Some(message) = &self.message {
            if let Ok(value) = HeaderValue::from_str(&encode_grpc_message(message)) {
                headers.insert(HeaderName::from_static(GRPC_MESSAGE), value);
            }
        }
        if let Some(details) = &self.details {
            if let Ok(value) = HeaderValue::from_str(&STANDARD_NO_PAD.encode(details)) {
                headers.insert(HeaderName::from_static(GRPC_STATUS_DETAILS_BIN), value);
            }
        }
    }

    /// Status headers as a fresh map.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.write_headers(&mut headers);
        headers
    }

    /// Read a status out of trailers (or trailers-only headers).
    ///
    /// Returns `None` when `grpc-status` is absent. A present but malformed
    /// value yields UNKNOWN.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = headers.get(GRPC_STATUS)?;
        let code = raw
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .and_then(Code::from_i32);

        let Some(code) = code else {
            return Some(
                Self::new(Code::Unknown).with_message(format!("Invalid grpc-status: {:?}", raw)),
            );
        };

        let mut status = Self::new(code);
        if let Some(message) = headers.get(GRPC_MESSAGE).and_then(|v| v.to_str().ok()) {
            status.message = Some(decode_grpc_message(message));
        }
        if let Some(details) = headers
            .get(GRPC_STATUS_DETAILS_BIN)
            .and_then(|v| BIN_HEADER_ENGINE.decode(v.as_bytes()).ok())
        {
            status.details = Some(Bytes::from(details));
        }

        let mut metadata = headers.clone();
        metadata.remove(GRPC_STATUS);
        metadata.remove(GRPC_MESSAGE);
        metadata.remove(GRPC_STATUS_DETAILS_BIN);
        status.metadata = metadata;
        Some(status)
    }

    /// Status for a transport-level stream reset.
    pub fn from_reset(code: ResetCode) -> Self {
        Self::new(Code::from_reset_code(code))
            .with_message(format!("Stream reset by peer (error code {})", code.0))
    }
}

impl PartialEq for GrpcStatus {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.details == other.details
    }
}

impl fmt::Display for GrpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Encode trailers as the HTTP/1-style header block carried inside a
/// gRPC-Web trailers frame.
pub fn encode_trailer_block(trailers: &HeaderMap) -> Bytes {
    let mut out = BytesMut::new();
    for (name, value) in trailers {
        out.put_slice(name.as_str().as_bytes());
        out.put_u8(b':');
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.freeze()
}

/// Parse a gRPC-Web trailer block. Lines without a colon are skipped.
pub fn parse_trailer_block(block: &[u8]) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = line[..colon].to_ascii_lowercase();
        let value = line[colon + 1..].trim_ascii();
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.trim_ascii()), HeaderValue::from_bytes(value))
        {
            trailers.append(name, value);
        }
    }
    trailers
}
