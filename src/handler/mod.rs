//! Handler module - method descriptors, handlers and dispatch.
//!
//! Provides:
//! - [`ServiceMethod`] / [`MethodKey`] - method identity
//! - [`ServiceRegistry`] - maps method keys to handlers
//! - [`Handler`] and its typed adapters
//! - [`RequestContext`] / [`MessageStream`] - a handler's view of one call
//!
//! # Example
//!
//! ```ignore
//! use grpc_wire::handler::{ServiceMethod, ServiceRegistry, StreamingHandler, MethodType};
//!
//! let mut registry = ServiceRegistry::new();
//! registry.register(
//!     ServiceMethod::new("pkg.Counter", "Count", MethodType::ClientStreaming, WireFormat::Json),
//!     StreamingHandler::new(|mut messages, ctx| async move {
//!         let mut n = 0u64;
//!         while let Some(message) = messages.next().await {
//!             message?;
//!             n += 1;
//!         }
//!         ctx.write_json(&n)
//!     }),
//! );
//! ```

mod context;
mod method;
mod registry;

pub use context::{InvalidMessageObserver, MessageStream, RequestContext};
pub use method::{parse_method_path, MethodKey, MethodType, ServiceMethod};
pub use registry::{
    BoxFuture, Handler, HandlerResult, RegisteredMethod, ServerStreamingHandler, ServiceRegistry,
    StreamingHandler, UnaryHandler,
};
