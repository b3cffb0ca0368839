//! Server reflection.
//!
//! A JSON bidirectional method that answers one response per request:
//!
//! ```text
//! {"list_services": ""}                       -> {"list_services_response": {...}}
//! {"list_methods": "pkg.Greeter"}             -> {"list_methods_response": {...}}
//! {"file_containing_symbol": "pkg.Greeter"}   -> {"file_descriptor_response": {...}}
//! {"file_by_filename": "greeter.proto"}       -> {"file_descriptor_response": {...}}
//! ```
//!
//! Lookups that fail answer with an `error_response` and the stream stays
//! open. Descriptor contents are opaque bytes, sent base64 encoded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{GrpcWireError, Result};
use crate::handler::{
    BoxFuture, Handler, HandlerResult, MessageStream, MethodType, RequestContext, ServiceMethod,
    ServiceRegistry,
};
use crate::protocol::WireFormat;
use crate::status::Code;

pub const REFLECTION_SERVICE: &str = "grpc.reflection.v1.ServerReflection";
pub const REFLECTION_METHOD: &str = "ServerReflectionInfo";

/// The reflection method descriptor.
pub fn reflection_method() -> ServiceMethod {
    ServiceMethod::new(
        REFLECTION_SERVICE,
        REFLECTION_METHOD,
        MethodType::BidiStreaming,
        WireFormat::Json,
    )
}

/// An opaque descriptor file and the fully qualified symbols it defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    pub name: String,
    pub symbols: Vec<String>,
    pub content: Bytes,
}

impl DescriptorFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            symbols: Vec::new(),
            content: content.into(),
        }
    }

    /// Declare a symbol defined in this file.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbols.push(symbol.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub method_type: MethodType,
    pub formats: Vec<&'static str>,
}

/// Read-only index of services, methods and descriptor files.
#[derive(Debug, Default, Clone)]
pub struct ServiceIndex {
    services: BTreeMap<String, BTreeMap<String, MethodInfo>>,
    files: HashMap<String, Arc<DescriptorFile>>,
    symbols: HashMap<String, Arc<DescriptorFile>>,
}

impl ServiceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every method in `registry`.
    pub fn from_registry(registry: &ServiceRegistry) -> Self {
        let mut index = Self::new();
        for entry in registry.methods() {
            index.add_method(&entry.method);
        }
        index
    }

    /// Add a method. Formats of the same method are merged.
    pub fn add_method(&mut self, method: &ServiceMethod) {
        let info = self
            .services
            .entry(method.service_name().to_string())
            .or_default()
            .entry(method.method_name().to_string())
            .or_insert_with(|| MethodInfo {
                name: method.method_name().to_string(),
                method_type: method.method_type(),
                formats: Vec::new(),
            });
        let format = method.format().as_str();
        if !info.formats.contains(&format) {
            info.formats.push(format);
            info.formats.sort_unstable();
        }
    }

    /// Add a descriptor file. A later file replaces an earlier one with the
    /// same name or symbol.
    pub fn add_file(&mut self, file: DescriptorFile) {
        let file = Arc::new(file);
        for symbol in &file.symbols {
            self.symbols.insert(symbol.clone(), file.clone());
        }
        self.files.insert(file.name.clone(), file);
    }

    /// Service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Methods of `service`, sorted by name.
    pub fn methods(&self, service: &str) -> Option<Vec<&MethodInfo>> {
        self.services
            .get(service)
            .map(|methods| methods.values().collect())
    }

    /// The file defining `symbol`.
    ///
    /// A method symbol (`pkg.Service.Method`) resolves to its service's file.
    pub fn file_containing_symbol(&self, symbol: &str) -> Option<&DescriptorFile> {
        if let Some(file) = self.symbols.get(symbol) {
            return Some(&**file);
        }
        let (parent, _) = symbol.rsplit_once('.')?;
        self.symbols.get(parent).map(|file| &**file)
    }

    pub fn file_by_filename(&self, name: &str) -> Option<&DescriptorFile> {
        self.files.get(name).map(|file| &**file)
    }

    /// Answer one reflection request.
    pub fn respond(&self, request: &ReflectionRequest) -> ReflectionResponse {
        match request {
            ReflectionRequest::ListServices(_) => ReflectionResponse::ListServicesResponse {
                service: self
                    .services()
                    .into_iter()
                    .map(|name| ServiceName {
                        name: name.to_string(),
                    })
                    .collect(),
            },
            ReflectionRequest::ListMethods(service) => match self.methods(service) {
                Some(methods) => ReflectionResponse::ListMethodsResponse {
                    service: service.clone(),
                    method: methods.into_iter().cloned().collect(),
                },
                None => error_response(Code::NotFound, format!("Service not found: {}", service)),
            },
            ReflectionRequest::FileContainingSymbol(symbol) => {
                match self.file_containing_symbol(symbol) {
                    Some(file) => file_response(file),
                    None => error_response(Code::NotFound, format!("Symbol not found: {}", symbol)),
                }
            }
            ReflectionRequest::FileByFilename(name) => match self.file_by_filename(name) {
                Some(file) => file_response(file),
                None => error_response(Code::NotFound, format!("File not found: {}", name)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionRequest {
    ListServices(String),
    ListMethods(String),
    FileContainingSymbol(String),
    FileByFilename(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionResponse {
    ListServicesResponse {
        service: Vec<ServiceName>,
    },
    ListMethodsResponse {
        service: String,
        method: Vec<MethodInfo>,
    },
    FileDescriptorResponse {
        file_name: String,
        /// Base64 descriptor content.
        file_descriptor_proto: Vec<String>,
    },
    ErrorResponse {
        error_code: i32,
        error_message: String,
    },
}

fn file_response(file: &DescriptorFile) -> ReflectionResponse {
    ReflectionResponse::FileDescriptorResponse {
        file_name: file.name.clone(),
        file_descriptor_proto: vec![STANDARD.encode(&file.content)],
    }
}

fn error_response(code: Code, message: String) -> ReflectionResponse {
    ReflectionResponse::ErrorResponse {
        error_code: code.value(),
        error_message: message,
    }
}

/// Handler for [`reflection_method`].
#[derive(Debug, Clone)]
pub struct ReflectionHandler {
    index: Arc<ServiceIndex>,
}

impl ReflectionHandler {
    pub fn new(index: Arc<ServiceIndex>) -> Self {
        Self { index }
    }
}

impl Handler for ReflectionHandler {
    fn call(&self, mut messages: MessageStream, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let index = self.index.clone();
        Box::pin(async move {
            while let Some(message) = messages.next().await {
                let response = match serde_json::from_slice::<ReflectionRequest>(&message?) {
                    Ok(request) => index.respond(&request),
                    Err(e) => error_response(Code::InvalidArgument, format!("Invalid request: {}", e)),
                };
                write_when_ready(&ctx, &response).await?;
            }
            Ok(())
        })
    }
}

async fn write_when_ready(ctx: &RequestContext, response: &ReflectionResponse) -> Result<()> {
    loop {
        match ctx.write_json(response) {
            Err(GrpcWireError::NotReady) => ctx.ready().await,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::StreamingHandler;

    fn index() -> ServiceIndex {
        let mut registry = ServiceRegistry::new();
        for format in [WireFormat::Binary, WireFormat::Json] {
            registry.register(
                ServiceMethod::unary("pkg.Greeter", "SayHello", format),
                StreamingHandler::new(|_messages, _ctx| async { Ok(()) }),
            );
        }
        registry.register(
            ServiceMethod::new("pkg.Items", "Watch", MethodType::ServerStreaming, WireFormat::Json),
            StreamingHandler::new(|_messages, _ctx| async { Ok(()) }),
        );
        let mut index = ServiceIndex::from_registry(&registry);
        index.add_file(
            DescriptorFile::new("greeter.proto", Bytes::from_static(b"\x0a\x0dgreeter.proto"))
                .with_symbol("pkg.Greeter"),
        );
        index
    }

    #[test]
    fn test_lists_services_and_methods() {
        let index = index();
        assert_eq!(index.services(), vec!["pkg.Greeter", "pkg.Items"]);

        let methods = index.methods("pkg.Greeter").unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].formats, vec!["json", "proto"]);
        assert!(index.methods("pkg.Nope").is_none());
    }

    #[test]
    fn test_symbol_lookup() {
        let index = index();
        assert_eq!(index.file_containing_symbol("pkg.Greeter").unwrap().name, "greeter.proto");
        assert_eq!(
            index.file_containing_symbol("pkg.Greeter.SayHello").unwrap().name,
            "greeter.proto"
        );
        assert!(index.file_containing_symbol("pkg.Items").is_none());
        assert!(index.file_by_filename("greeter.proto").is_some());
    }

    #[test]
    fn test_response_json_shape() {
        let index = index();
        let request: ReflectionRequest = serde_json::from_str(r#"{"list_services": ""}"#).unwrap();
        let value = serde_json::to_value(index.respond(&request)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"list_services_response": {"service": [
                {"name": "pkg.Greeter"}, {"name": "pkg.Items"}
            ]}})
        );

        let request = ReflectionRequest::FileByFilename("missing.proto".into());
        let value = serde_json::to_value(index.respond(&request)).unwrap();
        assert_eq!(value["error_response"]["error_code"], 5);

        let request = ReflectionRequest::ListMethods("pkg.Items".into());
        let value = serde_json::to_value(index.respond(&request)).unwrap();
        assert_eq!(value["list_methods_response"]["method"][0]["type"], "server_streaming");
    }
}
