//! Handler registry for dispatching calls by method identity.
//!
//! Methods are keyed by [`MethodKey`] (service, method, wire format) and
//! resolved by value equality. The registry is filled at configuration time
//! and only read while serving.
//!
//! # Example
//!
//! ```
//! use grpc_wire::codec::JsonCodec;
//! use grpc_wire::handler::{MethodKey, ServiceMethod, ServiceRegistry, UnaryHandler};
//! use grpc_wire::protocol::WireFormat;
//!
//! let mut registry = ServiceRegistry::new();
//! registry.register(
//!     ServiceMethod::unary("pkg.Greeter", "SayHello", WireFormat::Json),
//!     UnaryHandler::<JsonCodec, String, String, _, _>::new(|name: String, _ctx| async move {
//!         Ok(format!("hello {}", name))
//!     }),
//! );
//!
//! let key = MethodKey::new("pkg.Greeter", "SayHello", WireFormat::Json);
//! assert!(registry.get(&key).is_some());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::{InvalidMessageObserver, MessageStream, MethodKey, RequestContext, ServiceMethod};
use crate::codec::MessageCodec;
use crate::error::{GrpcWireError, Result};
use crate::protocol::WireFormat;
use crate::status::Code;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
///
/// Returning `Ok(())` ends the call with OK unless the handler already
/// finished it; returning an error ends it with the error's status.
pub trait Handler: Send + Sync + 'static {
    /// Handle one call.
    fn call(&self, messages: MessageStream, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

async fn first_message<C, T>(messages: &mut MessageStream) -> Result<T>
where
    C: MessageCodec<T>,
{
    match messages.next_decoded::<C, T>().await {
        Some(message) => message,
        None => Err(GrpcWireError::status(
            Code::Internal,
            "Call ended without a request message",
        )),
    }
}

/// Unary adapter: decodes the request with `C`, encodes the response with `C`.
pub struct UnaryHandler<C, Req, Resp, F, Fut> {
    handler: Arc<F>,
    _phantom: PhantomData<fn(C, Req) -> (Resp, Fut)>,
}

impl<C, Req, Resp, F, Fut> UnaryHandler<C, Req, Resp, F, Fut>
where
    C: MessageCodec<Req> + MessageCodec<Resp>,
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    /// Create a new unary handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<C, Req, Resp, F, Fut> Handler for UnaryHandler<C, Req, Resp, F, Fut>
where
    C: MessageCodec<Req> + MessageCodec<Resp>,
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    fn call(&self, mut messages: MessageStream, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = first_message::<C, Req>(&mut messages).await?;
            let response = handler(request, ctx.clone()).await?;
            ctx.write_message::<C, Resp>(&response)
        })
    }
}

/// Server-streaming adapter: decodes one request, the handler writes any
/// number of responses through the context.
pub struct ServerStreamingHandler<C, Req, F, Fut> {
    handler: Arc<F>,
    _phantom: PhantomData<fn(C, Req) -> Fut>,
}

impl<C, Req, F, Fut> ServerStreamingHandler<C, Req, F, Fut>
where
    C: MessageCodec<Req>,
    Req: Send + 'static,
    F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new server-streaming handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<C, Req, F, Fut> Handler for ServerStreamingHandler<C, Req, F, Fut>
where
    C: MessageCodec<Req>,
    Req: Send + 'static,
    F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, mut messages: MessageStream, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = first_message::<C, Req>(&mut messages).await?;
            handler(request, ctx).await
        })
    }
}

/// Raw adapter over the whole message stream; used for client-streaming and
/// bidirectional methods.
pub struct StreamingHandler<F, Fut> {
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> StreamingHandler<F, Fut>
where
    F: Fn(MessageStream, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new streaming handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for StreamingHandler<F, Fut>
where
    F: Fn(MessageStream, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, messages: MessageStream, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(messages, ctx))
    }
}

/// Entry for a registered method.
#[derive(Clone)]
pub struct RegisteredMethod {
    pub method: Arc<ServiceMethod>,
    pub handler: Arc<dyn Handler>,
    pub invalid_message_observer: Option<InvalidMessageObserver>,
}

/// Registry mapping method keys to handlers.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    methods: HashMap<MethodKey, RegisteredMethod>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method handler, replacing any handler with the same key.
    pub fn register<H: Handler>(&mut self, method: ServiceMethod, handler: H) {
        self.register_arc(method, Arc::new(handler));
    }

    /// Register a shared handler.
    pub fn register_arc(&mut self, method: ServiceMethod, handler: Arc<dyn Handler>) {
        let key = method.key();
        if self.methods.contains_key(&key) {
            tracing::warn!("Replacing handler for {}", key);
        }
        self.methods.insert(
            key,
            RegisteredMethod {
                method: Arc::new(method),
                handler,
                invalid_message_observer: None,
            },
        );
    }

    /// Attach an invalid-message observer to a registered method.
    ///
    /// Returns `false` if no method has this key.
    pub fn set_invalid_message_observer(
        &mut self,
        key: &MethodKey,
        observer: InvalidMessageObserver,
    ) -> bool {
        match self.methods.get_mut(key) {
            Some(entry) => {
                entry.invalid_message_observer = Some(observer);
                true
            }
            None => false,
        }
    }

    /// Get a method by key.
    pub fn get(&self, key: &MethodKey) -> Option<&RegisteredMethod> {
        self.methods.get(key)
    }

    /// Get a method by its parts.
    pub fn lookup(&self, service: &str, method: &str, format: WireFormat) -> Option<&RegisteredMethod> {
        self.get(&MethodKey::new(service, method, format))
    }

    /// Whether any format of `service/method` is registered.
    pub fn has_method(&self, service: &str, method: &str) -> bool {
        self.methods
            .keys()
            .any(|k| k.service == service && k.method == method)
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        self.methods
            .keys()
            .map(|k| k.service.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every registered method.
    pub fn methods(&self) -> impl Iterator<Item = &RegisteredMethod> {
        self.methods.values()
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.methods.keys().map(|k| k.to_string()).collect();
        keys.sort();
        f.debug_struct("ServiceRegistry").field("methods", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, RawCodec};
    use crate::protocol::GrpcMessage;
    use bytes::Bytes;
    use http::HeaderMap;

    fn ctx(method: &ServiceMethod) -> RequestContext {
        RequestContext::new(method.clone(), HeaderMap::new())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ServiceRegistry::new();
        let method = ServiceMethod::unary("pkg.Echo", "Echo", WireFormat::Binary);
        registry.register(
            method.clone(),
            UnaryHandler::<RawCodec, Bytes, Bytes, _, _>::new(|data, _ctx| async move { Ok(data) }),
        );

        assert!(registry.get(&method.key()).is_some());
        assert!(registry.lookup("pkg.Echo", "Echo", WireFormat::Binary).is_some());
        assert!(registry.lookup("pkg.Echo", "Echo", WireFormat::Json).is_none());
        assert!(registry.has_method("pkg.Echo", "Echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_services_sorted_and_unique() {
        let mut registry = ServiceRegistry::new();
        for (service, method) in [("b.S", "One"), ("a.S", "Two"), ("b.S", "Three")] {
            registry.register(
                ServiceMethod::unary(service, method, WireFormat::Json),
                StreamingHandler::new(|_messages, _ctx| async { Ok(()) }),
            );
        }
        assert_eq!(registry.services(), vec!["a.S", "b.S"]);
    }

    #[test]
    fn test_observer_requires_registered_key() {
        let mut registry = ServiceRegistry::new();
        let key = MethodKey::new("s", "m", WireFormat::Json);
        assert!(!registry.set_invalid_message_observer(&key, Arc::new(|_| {})));
    }

    #[tokio::test]
    async fn test_unary_handler_decodes_request() {
        let method = ServiceMethod::unary("pkg.Math", "Double", WireFormat::Json);
        let handler = UnaryHandler::<JsonCodec, u32, u32, _, _>::new(|n: u32, _ctx| async move {
            Ok(n * 2)
        });

        let messages = MessageStream::from_messages(vec![GrpcMessage::identity(
            WireFormat::Json,
            Bytes::from_static(b"21"),
        )]);
        handler.call(messages, ctx(&method)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unary_handler_without_request() {
        let method = ServiceMethod::unary("pkg.Math", "Double", WireFormat::Json);
        let handler = UnaryHandler::<JsonCodec, u32, u32, _, _>::new(|n: u32, _ctx| async move {
            Ok(n * 2)
        });

        let err = handler
            .call(MessageStream::from_messages(Vec::new()), ctx(&method))
            .await
            .unwrap_err();
        assert_eq!(err.to_status().code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_unary_handler_propagates_status() {
        let method = ServiceMethod::unary("pkg.Items", "Get", WireFormat::Json);
        let handler = UnaryHandler::<JsonCodec, String, String, _, _>::new(
            |_id: String, _ctx| async move {
                Err::<String, _>(GrpcWireError::status(Code::NotFound, "missing"))
            },
        );

        let messages = MessageStream::from_messages(vec![GrpcMessage::identity(
            WireFormat::Json,
            Bytes::from_static(b"\"7\""),
        )]);
        let err = handler.call(messages, ctx(&method)).await.unwrap_err();
        assert_eq!(err.to_status().code(), Code::NotFound);
    }
}
