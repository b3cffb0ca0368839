//! Server side of the transport.
//!
//! The [`GrpcServerBuilder`] registers handlers and transcoding routes. The
//! built [`GrpcServer`] serves one HTTP stream per [`GrpcServer::serve`]
//! call:
//! 1. Negotiate protocol and format from `content-type`
//! 2. Resolve the method (path for framed calls, route trie for JSON)
//! 3. Negotiate compression and arm the deadline
//! 4. Read the request, run the handler, send exactly one status
//!
//! # Example
//!
//! ```ignore
//! use grpc_wire::server::GrpcServer;
//! use grpc_wire::transcode::MethodTranscodingOptions;
//!
//! let server = GrpcServer::builder()
//!     .unary_json("pkg.Items", "Get", |req: GetItem, _ctx| async move {
//!         Ok(Item { id: req.id })
//!     })
//!     .transcoding(MethodTranscodingOptions::get("pkg.Items/Get", "/v1/items/{id}"))
//!     .enable_reflection()
//!     .build()?;
//!
//! let status = server.serve(head, body, Box::new(sink)).await;
//! ```

mod inbound;
mod stream;
mod transcoding;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::codec::{CompressorRegistry, JsonCodec, RawCodec, GRPC_ACCEPT_ENCODING, GRPC_ENCODING};
use crate::config::ServerConfig;
use crate::deadline::{Deadline, DeadlineTimer};
use crate::error::{GrpcWireError, Result};
use crate::handler::{
    parse_method_path, Handler, HandlerResult, InvalidMessageObserver, MessageStream, MethodKey,
    MethodType, RegisteredMethod, RequestContext, ServerStreamingHandler, ServiceMethod, ServiceRegistry,
    StreamingHandler, UnaryHandler,
};
use crate::protocol::{
    GrpcMessage, Protocol, SerializationFormat, WireFormat, IDENTITY, TRANSCODING_CONTENT_TYPE,
};
use crate::reflection::{self, DescriptorFile, ServiceIndex};
use crate::status::{Code, GrpcStatus};
use crate::transcode::{weave_request, HttpEndpointSpec, MethodTranscodingOptions};
use crate::transport::{PartReceiver, RequestHead, StreamPart, StreamSink};
use crate::writer::{spawn_writer_task, WriterHandle};

use inbound::{collect_body, watch_reset, InboundError, InboundReader};
pub(crate) use stream::ServerStream;
use stream::StreamOptions;
use transcoding::{error_body, transcoding_error_status, TranscodingRoutes};

/// Request messages buffered between the body pump and a streaming handler.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Builder for configuring and creating a [`GrpcServer`].
pub struct GrpcServerBuilder {
    registry: ServiceRegistry,
    observers: Vec<(MethodKey, InvalidMessageObserver)>,
    transcoding: Vec<MethodTranscodingOptions>,
    config: ServerConfig,
    compressors: CompressorRegistry,
    reflection: Option<Vec<DescriptorFile>>,
}

impl GrpcServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            registry: ServiceRegistry::new(),
            observers: Vec::new(),
            transcoding: Vec::new(),
            config: ServerConfig::default(),
            compressors: CompressorRegistry::with_defaults(),
            reflection: None,
        }
    }

    /// Register a handler for `method`.
    pub fn service<H: Handler>(mut self, method: ServiceMethod, handler: H) -> Self {
        self.registry.register(method, handler);
        self
    }

    /// Register a unary method with JSON messages.
    pub fn unary_json<Req, Resp, F, Fut>(mut self, service: &str, method: &str, handler: F) -> Self
    where
        Req: Serialize + DeserializeOwned + Send + 'static,
        Resp: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        self.registry.register(
            ServiceMethod::unary(service, method, WireFormat::Json),
            UnaryHandler::<JsonCodec, Req, Resp, F, Fut>::new(handler),
        );
        self
    }

    /// Register a unary method over externally encoded binary messages.
    pub fn unary_raw<F, Fut>(mut self, service: &str, method: &str, handler: F) -> Self
    where
        F: Fn(Bytes, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.registry.register(
            ServiceMethod::unary(service, method, WireFormat::Binary),
            UnaryHandler::<RawCodec, Bytes, Bytes, F, Fut>::new(handler),
        );
        self
    }

    /// Register a server-streaming method with a JSON request.
    ///
    /// The handler writes responses through the context.
    pub fn server_streaming_json<Req, F, Fut>(
        mut self,
        service: &str,
        method: &str,
        handler: F,
    ) -> Self
    where
        Req: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(
            ServiceMethod::new(service, method, MethodType::ServerStreaming, WireFormat::Json),
            ServerStreamingHandler::<JsonCodec, Req, F, Fut>::new(handler),
        );
        self
    }

    /// Register a client-streaming or bidirectional method.
    pub fn streaming<F, Fut>(mut self, method: ServiceMethod, handler: F) -> Self
    where
        F: Fn(MessageStream, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(method, StreamingHandler::new(handler));
        self
    }

    /// Skip and report invalid request messages of `key` instead of failing
    /// the call.
    pub fn invalid_message_observer<F>(mut self, key: MethodKey, observer: F) -> Self
    where
        F: Fn(&GrpcWireError) + Send + Sync + 'static,
    {
        self.observers.push((key, Arc::new(observer)));
        self
    }

    /// Expose a unary JSON method over HTTP/JSON.
    pub fn transcoding(mut self, options: MethodTranscodingOptions) -> Self {
        self.transcoding.push(options);
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the compressor registry.
    pub fn compressors(mut self, compressors: CompressorRegistry) -> Self {
        self.compressors = compressors;
        self
    }

    /// Serve the reflection method.
    pub fn enable_reflection(mut self) -> Self {
        self.reflection.get_or_insert_with(Vec::new);
        self
    }

    /// Add a descriptor file to the reflection index (enables reflection).
    pub fn descriptor_file(mut self, file: DescriptorFile) -> Self {
        self.reflection.get_or_insert_with(Vec::new).push(file);
        self
    }

    /// Build the server.
    ///
    /// # Errors
    ///
    /// Fails if an observer names an unregistered method, or a transcoding
    /// rule does not compile or names a method that is not unary JSON.
    pub fn build(self) -> Result<GrpcServer> {
        let mut registry = self.registry;

        if let Some(files) = self.reflection {
            let method = reflection::reflection_method();
            let mut index = ServiceIndex::from_registry(&registry);
            index.add_method(&method);
            for file in files {
                index.add_file(file);
            }
            registry.register(method, reflection::ReflectionHandler::new(Arc::new(index)));
        }

        for (key, observer) in self.observers {
            if !registry.set_invalid_message_observer(&key, observer) {
                return Err(GrpcWireError::HandlerNotFound(key.to_string()));
            }
        }

        let routes = TranscodingRoutes::build(&self.transcoding, &registry, &self.config)?;
        let accept_encoding = HeaderValue::from_str(&self.compressors.accept_encoding_header())
            .map_err(|e| GrpcWireError::Protocol(format!("Invalid encoding name: {}", e)))?;

        tracing::debug!(
            "Server built with {} methods and {} HTTP endpoints",
            registry.len(),
            routes.endpoints().len()
        );

        Ok(GrpcServer {
            inner: Arc::new(Inner {
                registry,
                routes,
                config: self.config,
                compressors: self.compressors,
                accept_encoding,
            }),
        })
    }
}

impl Default for GrpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    registry: ServiceRegistry,
    routes: TranscodingRoutes,
    config: ServerConfig,
    compressors: CompressorRegistry,
    accept_encoding: HeaderValue,
}

/// A built server. Cheap to clone; every clone serves the same tables.
#[derive(Clone)]
pub struct GrpcServer {
    inner: Arc<Inner>,
}

/// A resolved call, ready to run.
struct Call {
    entry: RegisteredMethod,
    stream: Arc<ServerStream>,
    cancel: CancellationToken,
    deadline: Option<Deadline>,
}

impl GrpcServer {
    pub fn builder() -> GrpcServerBuilder {
        GrpcServerBuilder::new()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// Endpoint descriptors of every transcoding binding.
    pub fn endpoints(&self) -> &[HttpEndpointSpec] {
        self.inner.routes.endpoints()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Serve one stream to completion.
    ///
    /// Returns the status the call ended with. Calls rejected at the HTTP
    /// level report the gRPC code of their HTTP status.
    pub async fn serve(
        &self,
        head: RequestHead,
        body: PartReceiver,
        sink: Box<dyn StreamSink>,
    ) -> GrpcStatus {
        let (writer, writer_task) = spawn_writer_task(sink, self.inner.config.writer.clone());
        let status = self.dispatch(head, body, writer).await;

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Response stream closed early: {}", e),
            Err(e) => tracing::error!("Writer task failed: {}", e),
        }
        status
    }

    async fn dispatch(&self, head: RequestHead, body: PartReceiver, writer: WriterHandle) -> GrpcStatus {
        let sniffed = head.content_type().and_then(SerializationFormat::sniff);
        let format = match (sniffed, head.content_type()) {
            (Some(format), _) => format,
            // Plain HTTP requests without a body may omit the content type.
            (None, None) if self.inner.routes.lookup(&head.method, head.path_and_query()).is_some() => {
                SerializationFormat::new(Protocol::Transcoded, WireFormat::Json)
            }
            (None, content_type) => {
                tracing::debug!("Rejecting unsupported content type {:?}", content_type);
                return reject_media_type(&writer, content_type.unwrap_or_default());
            }
        };

        if head.is_http1() && !self.inner.config.allows_http1(format.protocol) {
            tracing::debug!("Rejecting {} over {:?}", format.media_type(), head.version);
            return reject_media_type(&writer, format.media_type());
        }

        match format.protocol {
            Protocol::Transcoded => self.serve_transcoded(head, body, writer).await,
            _ => self.serve_framed(format, head, body, writer).await,
        }
    }

    async fn serve_framed(
        &self,
        format: SerializationFormat,
        head: RequestHead,
        body: PartReceiver,
        writer: WriterHandle,
    ) -> GrpcStatus {
        let config = &self.inner.config;
        let accept = head
            .headers
            .get(GRPC_ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok());
        let cancel = CancellationToken::new();
        let stream = Arc::new(ServerStream::new(
            format,
            writer,
            cancel.clone(),
            StreamOptions {
                compressor: self.inner.compressors.negotiate(accept),
                accept_encoding: Some(self.inner.accept_encoding.clone()),
                max_response_message_size: config.max_response_message_size,
                transcoded: None,
            },
        ));

        let resolved = parse_method_path(head.path())
            .and_then(|(service, method)| self.inner.registry.lookup(service, method, format.format));
        let Some(entry) = resolved.cloned() else {
            let status = GrpcStatus::new(Code::Unimplemented)
                .with_message(format!("Method not found: {}", head.path()));
            tracing::debug!("{}", status);
            stream.finish(status.clone());
            return status;
        };

        let decompressor = match head.headers.get(GRPC_ENCODING).map(|v| v.to_str()) {
            None => None,
            Some(Ok(name)) if name.eq_ignore_ascii_case(IDENTITY) => None,
            Some(Ok(name)) if self.inner.compressors.supports(name) => self.inner.compressors.get(name),
            Some(value) => {
                let status = GrpcStatus::new(Code::Unimplemented).with_message(format!(
                    "Unsupported grpc-encoding {:?}",
                    value.unwrap_or_default()
                ));
                tracing::debug!("{}", status);
                stream.finish(status.clone());
                return status;
            }
        };

        let reader = InboundReader::new(
            body,
            format,
            config.max_request_message_size,
            decompressor,
            entry.invalid_message_observer.clone(),
        );
        let call = Call {
            deadline: Deadline::from_headers(&head.headers, config.propagate_deadlines),
            entry,
            stream,
            cancel,
        };
        self.run_framed(call, head, reader).await
    }

    async fn run_framed(&self, call: Call, head: RequestHead, mut reader: InboundReader) -> GrpcStatus {
        let timer = arm_deadline(&call);
        let observer = call.entry.invalid_message_observer.clone();

        let (messages, body_task) = if call.entry.method.method_type().client_streaming() {
            let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
            let task = tokio::spawn(reader.pump(tx, call.stream.clone()));
            (MessageStream::new(rx, observer), task)
        } else {
            let collected = tokio::select! {
                biased;
                _ = call.cancel.cancelled() => None,
                result = reader.collect() => Some(result),
            };
            let messages = match collected {
                None => return finished(&call, timer),
                Some(Ok(messages)) => messages,
                Some(Err(InboundError::Peer(status))) => {
                    call.stream.abort(status, None);
                    return finished(&call, timer);
                }
                Some(Err(InboundError::Fatal(e))) => {
                    tracing::debug!("Rejecting request of {}: {}", call.entry.method, e);
                    call.stream.finish(e.to_status());
                    return finished(&call, timer);
                }
            };
            if messages.len() != 1 {
                call.stream.finish(GrpcStatus::new(Code::Internal).with_message(format!(
                    "Expected exactly one request message for {}, got {}",
                    call.entry.method,
                    messages.len()
                )));
                return finished(&call, timer);
            }
            let mut stream = MessageStream::from_messages(messages);
            if let Some(observer) = observer {
                stream = stream.with_observer(observer);
            }
            (stream, tokio::spawn(reader.watch(call.stream.clone())))
        };

        self.run_handler(&call, head, messages, false).await;
        body_task.abort();
        finished(&call, timer)
    }

    async fn serve_transcoded(&self, head: RequestHead, mut body: PartReceiver, writer: WriterHandle) -> GrpcStatus {
        let config = &self.inner.config;
        let Some(route) = self.inner.routes.lookup(&head.method, head.path_and_query()) else {
            tracing::debug!("No transcoding route for {} {}", head.method, head.path());
            let status = GrpcStatus::new(Code::NotFound)
                .with_message(format!("No route for {} {}", head.method, head.path()));
            respond_plain(&writer, StatusCode::NOT_FOUND, TRANSCODING_CONTENT_TYPE, error_body(&status));
            return status;
        };
        let Some(entry) = self.inner.registry.get(&route.method).cloned() else {
            let status = GrpcWireError::HandlerNotFound(route.method.to_string()).to_status();
            respond_plain(
                &writer,
                status.code().to_http_status(),
                TRANSCODING_CONTENT_TYPE,
                error_body(&status),
            );
            return status;
        };

        let cancel = CancellationToken::new();
        let stream = Arc::new(ServerStream::new(
            SerializationFormat::new(Protocol::Transcoded, WireFormat::Json),
            writer,
            cancel.clone(),
            StreamOptions {
                compressor: None,
                accept_encoding: None,
                max_response_message_size: config.max_response_message_size,
                transcoded: Some(route.response_body_field_path.clone()),
            },
        ));
        let call = Call {
            deadline: Deadline::from_headers(&head.headers, config.propagate_deadlines),
            entry,
            stream,
            cancel,
        };
        let timer = arm_deadline(&call);

        let collected = tokio::select! {
            biased;
            _ = call.cancel.cancelled() => return finished(&call, timer),
            result = collect_body(&mut body, config.max_request_message_size) => result,
        };
        let raw = match collected {
            Ok(raw) => raw,
            Err(InboundError::Peer(status)) => {
                call.stream.abort(status, None);
                return finished(&call, timer);
            }
            Err(InboundError::Fatal(e)) => {
                call.stream.finish(transcoding_error_status(&e));
                return finished(&call, timer);
            }
        };

        let request = match weave_request(&raw, &route.bindings, route.body_field_path.as_deref()) {
            // A bodiless request to a route without variables is an empty message.
            Ok(request) if request.is_empty() => Bytes::from_static(b"{}"),
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Could not build request for {}: {}", call.entry.method, e);
                call.stream.finish(transcoding_error_status(&e));
                return finished(&call, timer);
            }
        };

        let watcher = tokio::spawn(watch_reset(body, call.stream.clone()));
        let request = GrpcMessage::identity(WireFormat::Json, request);
        let messages = MessageStream::from_messages(vec![request]);
        self.run_handler(&call, head, messages, true).await;
        watcher.abort();
        finished(&call, timer)
    }

    /// Run the handler until it returns or the call is cancelled, then end
    /// the call with the handler's outcome.
    async fn run_handler(&self, call: &Call, head: RequestHead, messages: MessageStream, transcoded: bool) {
        let ctx = RequestContext::attached(
            call.entry.method.clone(),
            Arc::new(head.headers),
            call.deadline,
            call.cancel.clone(),
            call.stream.clone(),
        );
        let handler = call.entry.handler.call(messages, ctx);

        let outcome = tokio::select! {
            biased;
            _ = call.cancel.cancelled() => None,
            result = handler => Some(result),
        };
        match outcome {
            None => tracing::debug!("Handler for {} cancelled", call.entry.method),
            Some(Ok(())) => {
                call.stream.finish(GrpcStatus::ok());
            }
            Some(Err(e)) => {
                tracing::debug!("Handler for {} failed: {}", call.entry.method, e);
                let status = if transcoded {
                    transcoding_error_status(&e)
                } else {
                    e.to_status()
                };
                call.stream.finish(status);
            }
        }
    }
}

impl std::fmt::Debug for GrpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcServer")
            .field("registry", &self.inner.registry)
            .field("endpoints", &self.inner.routes.endpoints().len())
            .finish()
    }
}

fn arm_deadline(call: &Call) -> Option<DeadlineTimer> {
    call.deadline.map(|deadline| {
        let stream = call.stream.clone();
        DeadlineTimer::schedule(deadline, move || stream.expire())
    })
}

fn finished(call: &Call, timer: Option<DeadlineTimer>) -> GrpcStatus {
    if let Some(timer) = timer {
        timer.cancel();
    }
    call.stream.final_status().unwrap_or_else(|| {
        // Every path above ends the stream; a missing status means the
        // handler was torn down by cancellation alone.
        GrpcStatus::new(Code::Cancelled).with_message("Call cancelled")
    })
}

fn respond_plain(writer: &WriterHandle, status: StatusCode, content_type: &'static str, body: Bytes) {
    let mut headers = http::HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    let result = writer
        .send(StreamPart::Headers {
            status: Some(status),
            headers,
            end_of_stream: body.is_empty(),
        })
        .and_then(|_| {
            if body.is_empty() {
                return Ok(());
            }
            writer.send(StreamPart::Data {
                data: body,
                end_of_stream: true,
            })
        });
    if let Err(e) = result {
        tracing::debug!("Could not send {} response: {}", status, e);
    }
}

fn reject_media_type(writer: &WriterHandle, content_type: &str) -> GrpcStatus {
    respond_plain(
        writer,
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "text/plain",
        Bytes::from(format!("Unsupported content type: {}", content_type)),
    );
    GrpcStatus::new(Code::from_http_status(StatusCode::UNSUPPORTED_MEDIA_TYPE))
        .with_message(format!("Unsupported content type {:?}", content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, BodyDecoder, BodyItem};
    use http::{Method, Version};
    use serde::Deserialize;
    use tokio::sync::mpsc;

    #[derive(Serialize, Deserialize)]
    struct GetItem {
        id: String,
        #[serde(default)]
        filter: Option<String>,
    }

    #[derive(Serialize, Deserialize)]
    struct Item {
        id: String,
        filter: Option<String>,
    }

    fn server() -> GrpcServer {
        GrpcServer::builder()
            .unary_raw("pkg.Greeter", "SayHello", |payload, _ctx| async move { Ok(payload) })
            .unary_json("pkg.Items", "Get", |req: GetItem, _ctx| async move {
                Ok(Item {
                    id: req.id,
                    filter: req.filter,
                })
            })
            .transcoding(MethodTranscodingOptions::get("pkg.Items/Get", "/v1/items/{id}"))
            .build()
            .unwrap()
    }

    async fn call(server: &GrpcServer, head: RequestHead, parts: Vec<StreamPart>) -> (GrpcStatus, Vec<StreamPart>) {
        let (body_tx, body_rx) = mpsc::channel(parts.len().max(1));
        for part in parts {
            body_tx.try_send(part).unwrap();
        }
        drop(body_tx);
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let status = server.serve(head, body_rx, Box::new(sink_tx)).await;
        let mut out = Vec::new();
        while let Some(part) = sink_rx.recv().await {
            out.push(part);
        }
        (status, out)
    }

    fn grpc_head(path: &str) -> RequestHead {
        RequestHead::new(Method::POST, path.parse().unwrap())
            .with_header("content-type", "application/grpc")
    }

    fn end(data: Bytes) -> StreamPart {
        StreamPart::Data {
            data,
            end_of_stream: true,
        }
    }

    #[tokio::test]
    async fn test_unary_native_echo() {
        let (status, parts) = call(
            &server(),
            grpc_head("/pkg.Greeter/SayHello"),
            vec![end(build_frame(b"ping", false))],
        )
        .await;

        assert!(status.is_ok());
        let mut decoder = BodyDecoder::new(Protocol::Native, 1024, false);
        let mut messages = Vec::new();
        for part in &parts {
            if let StreamPart::Data { data, .. } = part {
                for item in decoder.push(data).unwrap() {
                    if let BodyItem::Message(m) = item {
                        messages.push(m.into_payload());
                    }
                }
            }
        }
        assert_eq!(messages, vec![Bytes::from_static(b"ping")]);
        assert!(matches!(parts.last(), Some(StreamPart::Trailers(t)) if t.get("grpc-status").unwrap() == "0"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_unimplemented() {
        let (status, parts) = call(
            &server(),
            grpc_head("/pkg.Greeter/Nope"),
            vec![end(build_frame(b"", false))],
        )
        .await;

        assert_eq!(status.code(), Code::Unimplemented);
        assert!(matches!(
            &parts[0],
            StreamPart::Headers { headers, end_of_stream: true, .. }
                if headers.get("grpc-status").unwrap() == "12"
        ));
    }

    #[tokio::test]
    async fn test_unknown_encoding_advertises_supported() {
        let head = grpc_head("/pkg.Greeter/SayHello").with_header("grpc-encoding", "snappy");
        let (status, parts) = call(&server(), head, vec![end(build_frame(b"x", true))]).await;

        assert_eq!(status.code(), Code::Unimplemented);
        let StreamPart::Headers { headers, .. } = &parts[0] else {
            panic!("expected trailers-only response");
        };
        assert_eq!(headers.get("grpc-accept-encoding").unwrap(), "identity,gzip,deflate");
    }

    #[tokio::test]
    async fn test_native_over_http1_is_rejected() {
        let head = grpc_head("/pkg.Greeter/SayHello").with_version(Version::HTTP_11);
        let (_, parts) = call(&server(), head, vec![end(build_frame(b"x", false))]).await;
        assert!(matches!(
            &parts[0],
            StreamPart::Headers { status: Some(s), .. } if *s == StatusCode::UNSUPPORTED_MEDIA_TYPE
        ));
    }

    #[tokio::test]
    async fn test_unknown_content_type_is_rejected() {
        let head = RequestHead::new(Method::POST, "/pkg.Greeter/SayHello".parse().unwrap())
            .with_header("content-type", "text/plain");
        let (_, parts) = call(&server(), head, vec![end(Bytes::new())]).await;
        assert!(matches!(
            &parts[0],
            StreamPart::Headers { status: Some(s), .. } if *s == StatusCode::UNSUPPORTED_MEDIA_TYPE
        ));
    }

    #[tokio::test]
    async fn test_transcoded_get_without_content_type() {
        let head = RequestHead::new(Method::GET, "/v1/items/42?filter=x".parse().unwrap());
        let (status, parts) = call(
            &server(),
            head,
            vec![StreamPart::Headers {
                status: None,
                headers: http::HeaderMap::new(),
                end_of_stream: true,
            }],
        )
        .await;

        assert!(status.is_ok());
        let StreamPart::Data { data, .. } = &parts[1] else {
            panic!("expected body");
        };
        let body: serde_json::Value = serde_json::from_slice(data).unwrap();
        assert_eq!(body, serde_json::json!({"id": "42", "filter": "x"}));
    }

    #[tokio::test]
    async fn test_transcoded_unknown_route_is_404() {
        let head = RequestHead::new(Method::GET, "/v1/shelves".parse().unwrap())
            .with_header("content-type", "application/json");
        let (status, parts) = call(&server(), head, vec![end(Bytes::new())]).await;

        assert_eq!(status.code(), Code::NotFound);
        assert!(matches!(
            &parts[0],
            StreamPart::Headers { status: Some(s), .. } if *s == StatusCode::NOT_FOUND
        ));
    }

    #[test]
    fn test_build_rejects_observer_for_unknown_method() {
        let result = GrpcServer::builder()
            .invalid_message_observer(MethodKey::new("a.B", "C", WireFormat::Json), |_| {})
            .build();
        assert!(matches!(result, Err(GrpcWireError::HandlerNotFound(_))));
    }
}
