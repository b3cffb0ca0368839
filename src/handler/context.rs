//! Request context and inbound message stream for handlers.
//!
//! [`RequestContext`] is how a handler talks back to its caller:
//! - `write` / `write_json` / `write_message` - send one response message
//! - `is_ready` / `on_ready` / `ready` - outbound backpressure
//! - `finish` - end the call with an explicit status
//! - `cancel` / `cancelled` - cooperative cancellation
//!
//! [`MessageStream`] yields the request messages, already deframed and
//! decompressed, as [`GrpcMessage`]s tagged with their wire format.
//!
//! # Example
//!
//! ```ignore
//! async fn count(mut messages: MessageStream, ctx: RequestContext) -> Result<()> {
//!     let mut n = 0u64;
//!     while let Some(message) = messages.next().await {
//!         message?;
//!         n += 1;
//!     }
//!     ctx.write_json(&n)
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::ServiceMethod;
use crate::codec::MessageCodec;
use crate::deadline::Deadline;
use crate::error::{GrpcWireError, Result};
use crate::protocol::GrpcMessage;
use crate::server::ServerStream;
use crate::status::GrpcStatus;

/// Callback for messages that fail to decode or exceed the size limit.
///
/// With an observer registered the stream skips the bad message and
/// continues; without one the error ends the call.
pub type InvalidMessageObserver = Arc<dyn Fn(&GrpcWireError) + Send + Sync>;

/// Request messages of one call, in arrival order.
pub struct MessageStream {
    rx: mpsc::Receiver<Result<GrpcMessage>>,
    observer: Option<InvalidMessageObserver>,
}

impl MessageStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<GrpcMessage>>,
        observer: Option<InvalidMessageObserver>,
    ) -> Self {
        Self { rx, observer }
    }

    /// Stream over an already complete list of messages.
    pub fn from_messages(messages: Vec<GrpcMessage>) -> Self {
        let (tx, rx) = mpsc::channel(messages.len().max(1));
        for message in messages {
            // Capacity covers every message.
            let _ = tx.try_send(Ok(message));
        }
        Self::new(rx, None)
    }

    /// Attach an invalid-message observer.
    pub fn with_observer(mut self, observer: InvalidMessageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Next message, or `None` once the client half-closed.
    pub async fn next_message(&mut self) -> Option<Result<GrpcMessage>> {
        self.rx.recv().await
    }

    /// Next raw payload.
    pub async fn next(&mut self) -> Option<Result<Bytes>> {
        Some(self.next_message().await?.map(GrpcMessage::into_payload))
    }

    /// Next message decoded with `C`.
    ///
    /// A message that fails to decode is passed to the observer and skipped
    /// when one is registered; otherwise the decode error is returned.
    pub async fn next_decoded<C, T>(&mut self) -> Option<Result<T>>
    where
        C: MessageCodec<T>,
    {
        loop {
            let message = match self.next_message().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e)),
            };
            match C::decode(message.payload()) {
                Ok(message) => return Some(Ok(message)),
                Err(e) => match &self.observer {
                    Some(observer) => {
                        tracing::debug!("Skipping invalid message: {}", e);
                        observer(&e);
                    }
                    None => return Some(Err(e)),
                },
            }
        }
    }
}

/// Context passed to request handlers.
///
/// `RequestContext` is `Clone`; clones share the same call.
#[derive(Clone)]
pub struct RequestContext {
    method: Arc<ServiceMethod>,
    headers: Arc<HeaderMap>,
    deadline: Option<Deadline>,
    cancel: CancellationToken,
    stream: Option<Arc<ServerStream>>,
}

impl RequestContext {
    /// Create a detached context (for testing without a stream). Writes are
    /// accepted and discarded.
    pub fn new(method: ServiceMethod, headers: HeaderMap) -> Self {
        Self {
            method: Arc::new(method),
            headers: Arc::new(headers),
            deadline: None,
            cancel: CancellationToken::new(),
            stream: None,
        }
    }

    pub(crate) fn attached(
        method: Arc<ServiceMethod>,
        headers: Arc<HeaderMap>,
        deadline: Option<Deadline>,
        cancel: CancellationToken,
        stream: Arc<ServerStream>,
    ) -> Self {
        Self {
            method,
            headers,
            deadline,
            cancel,
            stream: Some(stream),
        }
    }

    /// Set the deadline of a detached context.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The method being called.
    #[inline]
    pub fn method(&self) -> &ServiceMethod {
        &self.method
    }

    /// Request headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Deadline propagated from the caller, if any.
    #[inline]
    pub fn deadline(&self) -> Option<&Deadline> {
        self.deadline.as_ref()
    }

    /// Add a response header. Fails once the response headers are sent.
    pub fn set_response_header(&self, name: HeaderName, value: HeaderValue) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.set_response_header(name, value),
            None => Ok(()),
        }
    }

    /// Send one response message.
    ///
    /// Fails with `NotReady` if the outbound queue is full; wait on
    /// [`on_ready`](Self::on_ready) before writing again.
    pub fn write(&self, payload: Bytes) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GrpcWireError::Cancelled);
        }
        match &self.stream {
            Some(stream) => stream.send_message(payload),
            None => Ok(()),
        }
    }

    /// Send one message encoded with `C`.
    pub fn write_message<C, T>(&self, message: &T) -> Result<()>
    where
        C: MessageCodec<T>,
    {
        self.write(C::encode(message)?)
    }

    /// Send one message as JSON.
    pub fn write_json<T: Serialize>(&self, message: &T) -> Result<()> {
        self.write(Bytes::from(serde_json::to_vec(message)?))
    }

    /// Whether another write is allowed.
    pub fn is_ready(&self) -> bool {
        self.stream.as_ref().map_or(true, |s| s.is_ready())
    }

    /// One-shot notification of the next transition to ready.
    pub fn on_ready(&self) -> oneshot::Receiver<()> {
        match &self.stream {
            Some(stream) => stream.on_ready(),
            None => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(());
                rx
            }
        }
    }

    /// Wait until another write is allowed.
    pub async fn ready(&self) {
        if let Some(stream) = &self.stream {
            stream.ready().await;
        }
    }

    /// End the call with `status`.
    ///
    /// Returns `false` if the call already ended. Returning `Ok(())` from the
    /// handler finishes with OK; an explicit finish takes precedence.
    pub fn finish(&self, status: GrpcStatus) -> bool {
        match &self.stream {
            Some(stream) => stream.finish(status),
            None => false,
        }
    }

    /// Cancel the call and reset the stream.
    pub fn cancel(&self) {
        match &self.stream {
            Some(stream) => stream.cancel(),
            None => self.cancel.cancel(),
        }
    }

    /// Whether the call was cancelled by either side or its deadline.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method.full_name())
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::protocol::WireFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn json(payload: &'static [u8]) -> GrpcMessage {
        GrpcMessage::identity(WireFormat::Json, Bytes::from_static(payload))
    }

    fn detached() -> RequestContext {
        RequestContext::new(
            ServiceMethod::unary("pkg.Items", "Get", WireFormat::Json),
            HeaderMap::new(),
        )
    }

    #[tokio::test]
    async fn test_from_messages_in_order() {
        let mut stream = MessageStream::from_messages(vec![json(b"a"), json(b"b")]);
        let first = stream.next_message().await.unwrap().unwrap();
        assert_eq!(first.format(), WireFormat::Json);
        assert_eq!(&first.payload()[..], b"a");
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_decode_error_without_observer_is_returned() {
        let mut stream = MessageStream::from_messages(vec![json(b"not json")]);
        let result = stream.next_decoded::<JsonCodec, u32>().await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_observer_skips_invalid_messages() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut stream = MessageStream::from_messages(vec![json(b"oops"), json(b"7")])
        .with_observer(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let value = stream.next_decoded::<JsonCodec, u32>().await.unwrap().unwrap();
        assert_eq!(value, 7);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(stream.next_decoded::<JsonCodec, u32>().await.is_none());
    }

    #[tokio::test]
    async fn test_detached_context() {
        let ctx = detached().with_deadline(Deadline::after(Duration::from_secs(1)));
        assert_eq!(ctx.method().full_name(), "pkg.Items/Get");
        assert!(ctx.deadline().is_some());
        assert!(ctx.is_ready());
        ctx.write_json(&serde_json::json!({"id": 1})).unwrap();
        assert!(!ctx.finish(GrpcStatus::ok()));

        let mut ready = ctx.on_ready();
        assert!(ready.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_detached_cancel() {
        let ctx = detached();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
        assert!(matches!(
            ctx.write(Bytes::new()),
            Err(GrpcWireError::Cancelled)
        ));
    }
}
