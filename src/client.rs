//! Client side of the transport.
//!
//! A [`GrpcClient`] opens one stream per call through a [`ClientTransport`]
//! and returns a [`ClientCall`]. The call lifecycle:
//! 1. Send request headers (content type, timeout, encodings)
//! 2. Write request messages, then half-close
//! 3. A reader task deframes responses until the terminal status
//! 4. The status is delivered exactly once, from trailers, a trailers frame,
//!    a reset, the deadline, or a local cancel
//!
//! # Example
//!
//! ```ignore
//! use grpc_wire::client::{CallOptions, GrpcClient};
//! use grpc_wire::transport::MemoryTransport;
//!
//! let client = GrpcClient::new(MemoryTransport::new(server));
//! let reply: Hello = client
//!     .unary_json("pkg.Greeter", "SayHello", &Hello { name: "ada".into() }, CallOptions::new())
//!     .await?;
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, TE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{Compressor, CompressorRegistry, MessageCodec, GRPC_ACCEPT_ENCODING, GRPC_ENCODING};
use crate::config::ClientConfig;
use crate::deadline::{Deadline, DeadlineTimer, GRPC_TIMEOUT};
use crate::error::{GrpcWireError, Result};
use crate::protocol::{
    encode_message, BodyDecoder, BodyItem, Protocol, SerializationFormat, WireFormat, IDENTITY,
};
use crate::status::{parse_trailer_block, Code, GrpcStatus, ResetCode};
use crate::transport::{ClientTransport, PartReceiver, RequestHead, StreamPart};
use crate::writer::{spawn_request_writer, WriterHandle};

/// Response messages buffered between the reader task and the caller.
const RESPONSE_CHANNEL_CAPACITY: usize = 32;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    metadata: HeaderMap,
    format: Option<WireFormat>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline for this call, overriding the client default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra request header.
    pub fn with_metadata(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.metadata.append(name, value);
        self
    }

    /// Wire format for this call, overriding the client default.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Client for calls over a [`ClientTransport`].
#[derive(Clone)]
pub struct GrpcClient {
    transport: Arc<dyn ClientTransport>,
    config: ClientConfig,
    compressors: CompressorRegistry,
}

impl GrpcClient {
    pub fn new<T: ClientTransport>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    /// Client over a shared transport.
    pub fn from_arc(transport: Arc<dyn ClientTransport>) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
            compressors: CompressorRegistry::with_defaults(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the compressor registry.
    pub fn with_compressors(mut self, compressors: CompressorRegistry) -> Self {
        self.compressors = compressors;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a call to `service/method`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration names an unknown compression or the
    /// transcoded protocol, or if the transport cannot open a stream.
    pub async fn start_call(
        &self,
        service: &str,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientCall> {
        let protocol = self.config.protocol;
        if !protocol.is_framed() {
            return Err(GrpcWireError::UnsupportedMediaType(
                "transcoded calls are plain HTTP requests".to_string(),
            ));
        }
        let format = SerializationFormat::new(protocol, options.format.unwrap_or(self.config.format));
        let compressor = match self.config.request_compression.as_deref() {
            None => None,
            Some(name) if name.eq_ignore_ascii_case(IDENTITY) => None,
            Some(name) => Some(self.compressors.get(name).ok_or_else(|| {
                GrpcWireError::Protocol(format!("Unknown request compression {:?}", name))
            })?),
        };
        let deadline = options
            .timeout
            .or(self.config.default_timeout)
            .map(Deadline::after);

        let head = self.request_head(service, method, format, compressor.as_deref(), deadline, options.metadata)?;
        let path = head.path().to_string();
        let (sink, parts) = self.transport.open(head).await?;
        let (writer, _writer_task) = spawn_request_writer(sink, self.config.writer.clone());

        let (status_tx, status_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            status: status_tx,
            response_headers: Mutex::new(None),
        });
        let cancel = CancellationToken::new();
        let (messages_tx, messages_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);

        let reader = ResponseReader {
            parts,
            protocol,
            compressors: self.compressors.clone(),
            max_message_size: self.config.max_response_message_size,
            decoder: None,
            http_status: None,
            messages: messages_tx,
            shared: shared.clone(),
        };
        let reader = tokio::spawn(reader.run(writer.clone(), cancel.clone()));

        let timer = deadline.map(|deadline| {
            let shared = shared.clone();
            let writer = writer.clone();
            let cancel = cancel.clone();
            DeadlineTimer::schedule(deadline, move || {
                tracing::debug!("Deadline exceeded");
                let status = GrpcStatus::new(Code::DeadlineExceeded).with_message("Deadline exceeded");
                if shared.complete(status) {
                    writer.reset(ResetCode::CANCEL);
                }
                cancel.cancel();
            })
        });

        Ok(ClientCall {
            path,
            format,
            writer,
            compressor,
            messages: messages_rx,
            shared,
            status: status_rx,
            cancel,
            half_closed: false,
            deadline,
            _timer: timer,
            _reader: reader,
        })
    }

    fn request_head(
        &self,
        service: &str,
        method: &str,
        format: SerializationFormat,
        compressor: Option<&dyn Compressor>,
        deadline: Option<Deadline>,
        metadata: HeaderMap,
    ) -> Result<RequestHead> {
        let uri: Uri = format!("/{}/{}", service, method)
            .parse()
            .map_err(|e| GrpcWireError::Protocol(format!("Invalid method path: {}", e)))?;
        let version = match format.protocol {
            Protocol::Native => Version::HTTP_2,
            _ => Version::HTTP_11,
        };
        let mut head = RequestHead::new(Method::POST, uri).with_version(version);

        head.headers = metadata;
        head.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(format.media_type()));
        match format.protocol {
            Protocol::Native => {
                head.headers.insert(TE, HeaderValue::from_static("trailers"));
            }
            _ => {
                head.headers
                    .insert("x-grpc-web", HeaderValue::from_static("1"));
            }
        }
        if let Some(deadline) = deadline {
            if let Ok(value) = HeaderValue::from_str(&deadline.to_header_value()) {
                head.headers.insert(GRPC_TIMEOUT, value);
            }
        }
        if let Some(compressor) = compressor {
            if let Ok(value) = HeaderValue::from_str(compressor.encoding()) {
                head.headers.insert(GRPC_ENCODING, value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.compressors.accept_encoding_header()) {
            head.headers.insert(GRPC_ACCEPT_ENCODING, value);
        }
        Ok(head)
    }

    /// Send one request and wait for exactly one response.
    ///
    /// # Errors
    ///
    /// A non-OK status is returned as [`GrpcWireError::Status`].
    pub async fn unary(
        &self,
        service: &str,
        method: &str,
        request: Bytes,
        options: CallOptions,
    ) -> Result<Bytes> {
        let mut call = self.start_call(service, method, options).await?;
        call.write(request)?;
        call.half_close()?;

        let mut responses = Vec::new();
        while let Some(message) = call.next_message().await {
            responses.push(message);
        }
        let status = call.status().await;
        if !status.is_ok() {
            return Err(status.into());
        }
        let mut responses = responses.into_iter().collect::<Result<Vec<_>>>()?;
        if responses.len() != 1 {
            return Err(GrpcWireError::status(
                Code::Internal,
                format!("Expected exactly one response message, got {}", responses.len()),
            ));
        }
        Ok(responses.swap_remove(0))
    }

    /// [`unary`](Self::unary) with JSON messages.
    pub async fn unary_json<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = Bytes::from(serde_json::to_vec(request)?);
        let response = self
            .unary(service, method, payload, options.with_format(WireFormat::Json))
            .await?;
        Ok(serde_json::from_slice(&response)?)
    }
}

impl std::fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClient")
            .field("config", &self.config)
            .field("compressors", &self.compressors)
            .finish()
    }
}

/// State shared by a call, its reader task and its deadline timer.
struct Shared {
    status: watch::Sender<Option<GrpcStatus>>,
    response_headers: Mutex<Option<HeaderMap>>,
}

impl Shared {
    /// Record the terminal status. Only the first caller wins.
    fn complete(&self, status: GrpcStatus) -> bool {
        self.status.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(status);
            true
        })
    }

    fn is_complete(&self) -> bool {
        self.status.borrow().is_some()
    }
}

/// One in-flight client call.
pub struct ClientCall {
    path: String,
    format: SerializationFormat,
    writer: WriterHandle,
    compressor: Option<Arc<dyn Compressor>>,
    messages: mpsc::Receiver<Result<Bytes>>,
    shared: Arc<Shared>,
    status: watch::Receiver<Option<GrpcStatus>>,
    cancel: CancellationToken,
    half_closed: bool,
    deadline: Option<Deadline>,
    _timer: Option<DeadlineTimer>,
    _reader: JoinHandle<()>,
}

impl ClientCall {
    /// Request path, `/service/method`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn deadline(&self) -> Option<&Deadline> {
        self.deadline.as_ref()
    }

    /// Send one request message.
    ///
    /// Fails with `NotReady` while the outbound queue is full.
    pub fn write(&self, payload: Bytes) -> Result<()> {
        if self.half_closed {
            return Err(GrpcWireError::Protocol("Write after half-close".to_string()));
        }
        if let Some(status) = self.status.borrow().as_ref() {
            return Err(if status.is_ok() {
                GrpcWireError::Protocol("Write after the call ended".to_string())
            } else {
                status.clone().into()
            });
        }
        let frame = encode_message(&payload, self.compressor.as_deref(), self.format.protocol)?;
        self.writer.send(StreamPart::data(frame))
    }

    /// Send one message encoded with `C`.
    pub fn write_message<C, T>(&self, message: &T) -> Result<()>
    where
        C: MessageCodec<T>,
    {
        self.write(C::encode(message)?)
    }

    pub fn write_json<T: Serialize>(&self, message: &T) -> Result<()> {
        self.write(Bytes::from(serde_json::to_vec(message)?))
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.writer.is_ready()
    }

    /// One-shot notification of the next transition to ready.
    pub fn on_ready(&self) -> oneshot::Receiver<()> {
        self.writer.on_ready()
    }

    pub async fn ready(&self) {
        self.writer.ready().await
    }

    /// Signal that no more request messages follow.
    pub fn half_close(&mut self) -> Result<()> {
        if self.half_closed {
            return Ok(());
        }
        self.half_closed = true;
        self.writer.send(StreamPart::Data {
            data: Bytes::new(),
            end_of_stream: true,
        })
    }

    /// Next response message; `None` once the response stream ended.
    ///
    /// After `None`, [`status`](Self::status) tells how the call ended.
    pub async fn next_message(&mut self) -> Option<Result<Bytes>> {
        self.messages.recv().await
    }

    /// Next response message decoded as JSON.
    pub async fn next_json<T: DeserializeOwned>(&mut self) -> Option<Result<T>> {
        let message = self.next_message().await?;
        Some(message.and_then(|payload| Ok(serde_json::from_slice(&payload)?)))
    }

    /// Wait for the terminal status.
    pub async fn status(&mut self) -> GrpcStatus {
        match self.status.wait_for(Option::is_some).await {
            Ok(status) => status.clone().unwrap_or_else(GrpcStatus::ok),
            Err(_) => GrpcStatus::new(Code::Unknown).with_message("Call state dropped"),
        }
    }

    /// Response headers, once received.
    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.shared
            .response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel the call: it ends with CANCELLED and the stream is reset.
    pub fn cancel(&self) {
        if self
            .shared
            .complete(GrpcStatus::new(Code::Cancelled).with_message("Call cancelled by client"))
        {
            self.writer.reset(ResetCode::CANCEL);
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ClientCall {
    fn drop(&mut self) {
        if !self.shared.is_complete() {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for ClientCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCall")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("half_closed", &self.half_closed)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// A failure detected locally; the stream is reset.
struct LocalFailure(GrpcStatus);

impl From<GrpcWireError> for LocalFailure {
    fn from(e: GrpcWireError) -> Self {
        Self(e.to_status())
    }
}

type ReadResult = std::result::Result<Option<GrpcStatus>, LocalFailure>;

struct ResponseReader {
    parts: PartReceiver,
    protocol: Protocol,
    compressors: CompressorRegistry,
    max_message_size: usize,
    decoder: Option<BodyDecoder>,
    http_status: Option<StatusCode>,
    messages: mpsc::Sender<Result<Bytes>>,
    shared: Arc<Shared>,
}

impl ResponseReader {
    async fn run(mut self, writer: WriterHandle, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            outcome = self.read() => outcome,
        };
        match outcome {
            Ok(status) => {
                tracing::debug!("Call ended with {}", status);
                self.shared.complete(status);
            }
            Err(LocalFailure(status)) => {
                tracing::debug!("Abandoning response stream: {}", status);
                if self.shared.complete(status) {
                    writer.reset(ResetCode::CANCEL);
                }
            }
        }
    }

    async fn read(&mut self) -> std::result::Result<GrpcStatus, LocalFailure> {
        loop {
            let Some(part) = self.parts.recv().await else {
                return Ok(GrpcStatus::new(Code::Unavailable)
                    .with_message("Stream closed without a status"));
            };
            let status = match part {
                StreamPart::Headers {
                    status,
                    headers,
                    end_of_stream,
                } => self.on_headers(status, headers, end_of_stream)?,
                StreamPart::Data {
                    data,
                    end_of_stream,
                } => self.on_data(&data, end_of_stream).await?,
                StreamPart::Trailers(trailers) => {
                    self.finish_body().await?;
                    Some(self.status_from(&trailers))
                }
                StreamPart::Reset(code) => {
                    tracing::debug!("Server reset the stream with code {}", code.0);
                    Some(GrpcStatus::from_reset(code))
                }
            };
            if let Some(status) = status {
                return Ok(status);
            }
        }
    }

    fn on_headers(
        &mut self,
        status: Option<StatusCode>,
        headers: HeaderMap,
        end_of_stream: bool,
    ) -> ReadResult {
        if self.decoder.is_some() {
            // Headers after the body start are trailers.
            return Ok(end_of_stream.then(|| self.status_from(&headers)));
        }

        self.http_status = status;
        *self
            .shared
            .response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(headers.clone());

        let http_ok = status.map_or(true, |s| s == StatusCode::OK);
        if end_of_stream || !http_ok {
            // Trailers-only, or not a gRPC response at all.
            return Ok(Some(self.status_from(&headers)));
        }

        let decompressor = match headers.get(GRPC_ENCODING).map(|v| v.to_str()) {
            None => None,
            Some(Ok(name)) if name.eq_ignore_ascii_case(IDENTITY) => None,
            Some(Ok(name)) if self.compressors.supports(name) => self.compressors.get(name),
            Some(value) => {
                return Err(LocalFailure(GrpcStatus::new(Code::Internal).with_message(format!(
                    "Unsupported response grpc-encoding {:?}",
                    value.unwrap_or_default()
                ))));
            }
        };
        self.decoder = Some(
            BodyDecoder::new(
                self.protocol,
                self.max_message_size,
                self.protocol.trailers_in_body(),
            )
            .with_decompressor(decompressor),
        );
        Ok(None)
    }

    async fn on_data(&mut self, data: &[u8], end_of_stream: bool) -> ReadResult {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(LocalFailure(
                GrpcStatus::new(Code::Internal).with_message("Response body before headers"),
            ));
        };
        let items = decoder.push(data)?;
        if let Some(status) = self.deliver(items).await? {
            return Ok(Some(status));
        }
        if !end_of_stream {
            return Ok(None);
        }
        if let Some(status) = self.finish_body().await? {
            return Ok(Some(status));
        }
        Ok(Some(self.missing_status()))
    }

    async fn finish_body(&mut self) -> ReadResult {
        let items = match self.decoder.as_mut() {
            Some(decoder) => decoder.finish()?,
            None => return Ok(None),
        };
        self.deliver(items).await
    }

    async fn deliver(&mut self, items: Vec<BodyItem>) -> ReadResult {
        for item in items {
            match item {
                BodyItem::Message(message) => {
                    if self.messages.send(Ok(message.into_payload())).await.is_err() {
                        tracing::debug!("Response message dropped: caller stopped reading");
                    }
                }
                BodyItem::Invalid(e) => {
                    let status = e.to_status();
                    let _ = self.messages.send(Err(e)).await;
                    return Err(LocalFailure(status));
                }
                BodyItem::Trailers(block) => {
                    return Ok(Some(self.status_from(&parse_trailer_block(&block))));
                }
            }
        }
        Ok(None)
    }

    fn status_from(&self, trailers: &HeaderMap) -> GrpcStatus {
        GrpcStatus::from_headers(trailers).unwrap_or_else(|| self.missing_status())
    }

    fn missing_status(&self) -> GrpcStatus {
        match self.http_status {
            Some(status) if status != StatusCode::OK => {
                GrpcStatus::new(Code::from_http_status(status))
                    .with_message(format!("HTTP status {} without grpc-status", status))
            }
            _ => GrpcStatus::new(Code::Internal).with_message("Response ended without grpc-status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxFuture;
    use crate::protocol::{build_frame, build_trailers_frame, encode_chunk};
    use crate::status::encode_trailer_block;
    use crate::transport::StreamSink;

    /// Transport that records the request and replays a canned response.
    struct Scripted {
        response: Vec<StreamPart>,
        head: Mutex<Option<RequestHead>>,
        requests: Mutex<Option<mpsc::Receiver<StreamPart>>>,
    }

    impl Scripted {
        fn new(response: Vec<StreamPart>) -> Arc<Self> {
            Arc::new(Self {
                response,
                head: Mutex::new(None),
                requests: Mutex::new(None),
            })
        }
    }

    impl ClientTransport for Arc<Scripted> {
        fn open(&self, head: RequestHead) -> BoxFuture<'_, Result<(Box<dyn StreamSink>, PartReceiver)>> {
            Box::pin(async move {
                *self.head.lock().unwrap() = Some(head);
                let (request_tx, request_rx) = mpsc::channel(16);
                *self.requests.lock().unwrap() = Some(request_rx);
                let (response_tx, response_rx) = mpsc::channel(16);
                for part in self.response.clone() {
                    response_tx.try_send(part).unwrap();
                }
                let sink: Box<dyn StreamSink> = Box::new(request_tx);
                Ok((sink, response_rx))
            })
        }
    }

    fn ok_headers() -> StreamPart {
        StreamPart::Headers {
            status: Some(StatusCode::OK),
            headers: HeaderMap::new(),
            end_of_stream: false,
        }
    }

    fn trailers(code: &str) -> HeaderMap {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_str(code).unwrap());
        trailers
    }

    #[tokio::test]
    async fn test_native_response_and_request_headers() {
        let transport = Scripted::new(vec![
            ok_headers(),
            StreamPart::data(build_frame(b"pong", false)),
            StreamPart::Trailers(trailers("0")),
        ]);
        let client = GrpcClient::new(transport.clone());
        let options = CallOptions::new().with_timeout(Duration::from_secs(5));
        let reply = client
            .unary("pkg.Greeter", "SayHello", Bytes::from_static(b"ping"), options)
            .await
            .unwrap();
        assert_eq!(&reply[..], b"pong");

        let head = transport.head.lock().unwrap().clone().unwrap();
        assert_eq!(head.path(), "/pkg.Greeter/SayHello");
        assert_eq!(head.headers.get("content-type").unwrap(), "application/grpc+proto");
        assert_eq!(head.headers.get("te").unwrap(), "trailers");
        assert!(head.headers.get("grpc-timeout").is_some());
    }

    #[tokio::test]
    async fn test_trailers_only_error() {
        let mut headers = trailers("5");
        headers.insert("grpc-message", HeaderValue::from_static("no%20such%20item"));
        let transport = Scripted::new(vec![StreamPart::Headers {
            status: Some(StatusCode::OK),
            headers,
            end_of_stream: true,
        }]);
        let client = GrpcClient::new(transport);
        let err = client
            .unary("pkg.Items", "Get", Bytes::new(), CallOptions::new())
            .await
            .unwrap_err();
        let status = err.to_status();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), Some("no such item"));
    }

    #[tokio::test]
    async fn test_web_text_trailers_in_body() {
        let mut body = build_frame(b"one", false).to_vec();
        body.extend_from_slice(&build_trailers_frame(&encode_trailer_block(&trailers("0"))));
        let transport = Scripted::new(vec![
            ok_headers(),
            StreamPart::Data {
                data: encode_chunk(&body),
                end_of_stream: true,
            },
        ]);
        let client = GrpcClient::new(transport.clone())
            .with_config(ClientConfig::default().with_protocol(Protocol::WebText));

        let mut call = client
            .start_call("pkg.S", "M", CallOptions::new())
            .await
            .unwrap();
        call.half_close().unwrap();
        assert_eq!(&call.next_message().await.unwrap().unwrap()[..], b"one");
        assert!(call.next_message().await.is_none());
        assert!(call.status().await.is_ok());

        let head = transport.head.lock().unwrap().clone().unwrap();
        assert_eq!(head.headers.get("x-grpc-web").unwrap(), "1");
        assert_eq!(head.version, Version::HTTP_11);
    }

    #[tokio::test]
    async fn test_http_error_without_grpc_status() {
        let transport = Scripted::new(vec![StreamPart::Headers {
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            headers: HeaderMap::new(),
            end_of_stream: false,
        }]);
        let client = GrpcClient::new(transport);
        let mut call = client.start_call("pkg.S", "M", CallOptions::new()).await.unwrap();
        assert_eq!(call.status().await.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_missing_status_on_ok_response() {
        let transport = Scripted::new(vec![ok_headers(), StreamPart::Trailers(HeaderMap::new())]);
        let client = GrpcClient::new(transport);
        let mut call = client.start_call("pkg.S", "M", CallOptions::new()).await.unwrap();
        assert_eq!(call.status().await.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_closed_without_status_is_unavailable() {
        let transport = Scripted::new(vec![ok_headers()]);
        let client = GrpcClient::new(transport);
        let mut call = client.start_call("pkg.S", "M", CallOptions::new()).await.unwrap();
        assert_eq!(call.status().await.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_reset_maps_to_status() {
        let transport = Scripted::new(vec![ok_headers(), StreamPart::Reset(ResetCode::REFUSED_STREAM)]);
        let client = GrpcClient::new(transport);
        let mut call = client.start_call("pkg.S", "M", CallOptions::new()).await.unwrap();
        assert_eq!(call.status().await.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_oversized_response_resets_stream() {
        let transport = Scripted::new(vec![ok_headers(), StreamPart::data(build_frame(&[7u8; 11], false))]);
        let client = GrpcClient::new(transport.clone())
            .with_config(ClientConfig::default().with_max_response_message_size(10));
        let mut call = client.start_call("pkg.S", "M", CallOptions::new()).await.unwrap();
        assert_eq!(call.status().await.code(), Code::ResourceExhausted);

        let mut requests = transport.requests.lock().unwrap().take().unwrap();
        assert!(matches!(requests.recv().await, Some(StreamPart::Reset(ResetCode::CANCEL))));
    }

    #[tokio::test]
    async fn test_cancel_sends_reset() {
        let transport = Scripted::new(vec![ok_headers()]);
        let client = GrpcClient::from_arc(Arc::new(HoldOpen(transport.clone())));
        let mut call = client.start_call("pkg.S", "M", CallOptions::new()).await.unwrap();
        call.cancel();
        assert_eq!(call.status().await.code(), Code::Cancelled);
        assert!(call.write(Bytes::new()).is_err());

        let mut requests = transport.requests.lock().unwrap().take().unwrap();
        assert!(matches!(requests.recv().await, Some(StreamPart::Reset(ResetCode::CANCEL))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let transport = Scripted::new(vec![ok_headers()]);
        // Keep the response stream open so only the deadline can end the call.
        let transport = Arc::new(HoldOpen(transport));
        let client = GrpcClient::from_arc(transport);
        let mut call = client
            .start_call("pkg.S", "M", CallOptions::new().with_timeout(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(call.status().await.code(), Code::DeadlineExceeded);
    }

    /// Wraps a scripted transport and keeps its response sender alive.
    struct HoldOpen(Arc<Scripted>);

    impl ClientTransport for HoldOpen {
        fn open(&self, head: RequestHead) -> BoxFuture<'_, Result<(Box<dyn StreamSink>, PartReceiver)>> {
            Box::pin(async move {
                let (sink, mut scripted) = self.0.open(head).await?;
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(async move {
                    while let Some(part) = scripted.recv().await {
                        if tx.send(part).await.is_err() {
                            return;
                        }
                    }
                    // Never close.
                    std::future::pending::<()>().await;
                });
                Ok((sink, rx))
            })
        }
    }
}
