//! Method descriptors and dispatch keys.

use std::fmt;

use serde::Serialize;

use crate::protocol::WireFormat;

/// Streaming shape of an RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

impl MethodType {
    /// Whether the client sends more than one message.
    #[inline]
    pub fn client_streaming(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    /// Whether the server sends more than one message.
    #[inline]
    pub fn server_streaming(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }
}

/// Immutable descriptor of one RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceMethod {
    service_name: String,
    method_name: String,
    method_type: MethodType,
    format: WireFormat,
}

impl ServiceMethod {
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        method_type: MethodType,
        format: WireFormat,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            method_type,
            format,
        }
    }

    /// Unary method shorthand.
    pub fn unary(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        format: WireFormat,
    ) -> Self {
        Self::new(service_name, method_name, MethodType::Unary, format)
    }

    #[inline]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[inline]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    #[inline]
    pub fn method_type(&self) -> MethodType {
        self.method_type
    }

    #[inline]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// `service/method`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.service_name, self.method_name)
    }

    /// Request path, `/service/method`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service_name, self.method_name)
    }

    /// Dispatch key of this method.
    pub fn key(&self) -> MethodKey {
        MethodKey::new(&self.service_name, &self.method_name, self.format)
    }
}

impl fmt::Display for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_name, self.method_name)
    }
}

/// Registry key: methods are resolved by value, not by handler identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub service: String,
    pub method: String,
    pub format: WireFormat,
}

impl MethodKey {
    pub fn new(service: impl Into<String>, method: impl Into<String>, format: WireFormat) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            format,
        }
    }

    /// Key for a `package.Service/Method` selector.
    ///
    /// A selector without `/` is split at its last `.`.
    pub fn from_selector(selector: &str, format: WireFormat) -> Option<Self> {
        let (service, method) = selector
            .rsplit_once('/')
            .or_else(|| selector.rsplit_once('.'))?;
        if service.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::new(service, method, format))
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.service, self.method, self.format.as_str())
    }
}

/// Split a gRPC request path `/service/method`.
///
/// ```
/// use grpc_wire::handler::parse_method_path;
///
/// assert_eq!(parse_method_path("/pkg.Greeter/SayHello"), Some(("pkg.Greeter", "SayHello")));
/// assert_eq!(parse_method_path("/v1/items/42"), None);
/// ```
pub fn parse_method_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}
