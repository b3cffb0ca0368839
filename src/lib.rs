//! # grpc-wire
//!
//! gRPC wire protocol and HTTP/JSON transcoding over a generic HTTP stack.
//!
//! This crate speaks gRPC (native, gRPC-Web and gRPC-Web-text) directly on
//! HTTP streams handed to it by an external server or client, and rewrites
//! REST-style JSON requests into unary calls.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): 5-byte length-prefixed frames, base64 text
//!   bodies, content-type negotiation
//! - **Status** ([`status`], [`deadline`]): codes, trailers, `grpc-timeout`
//! - **Transcoding** ([`transcode`]): path templates, route trie, JSON weaving
//! - **Calls** ([`server`], [`client`]): one writer task per stream, bounded
//!   by backpressure, ended by exactly one status
//!
//! The HTTP stack plugs in through [`transport::StreamSink`] and
//! [`transport::ClientTransport`]; [`transport::MemoryTransport`] connects a
//! client to a server in-process.
//!
//! ## Example
//!
//! ```ignore
//! use grpc_wire::{CallOptions, GrpcClient, GrpcServer, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> grpc_wire::Result<()> {
//!     let server = GrpcServer::builder()
//!         .unary_json("pkg.Greeter", "SayHello", |req: Hello, _ctx| async move {
//!             Ok(Reply { message: format!("Hello, {}", req.name) })
//!         })
//!         .build()?;
//!
//!     let client = GrpcClient::new(MemoryTransport::new(server));
//!     let reply: Reply = client
//!         .unary_json("pkg.Greeter", "SayHello", &Hello { name: "ada".into() }, CallOptions::new())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backpressure;
pub mod client;
pub mod codec;
pub mod config;
pub mod deadline;
pub mod error;
pub mod handler;
pub mod percent;
pub mod protocol;
pub mod reflection;
pub mod server;
pub mod status;
pub mod transcode;
pub mod transport;
pub mod writer;

pub use client::{CallOptions, ClientCall, GrpcClient};
pub use config::{ClientConfig, ServerConfig, WriterConfig};
pub use error::{GrpcWireError, Result};
pub use handler::{MessageStream, RequestContext, ServiceMethod};
pub use protocol::{GrpcMessage, Protocol, WireFormat};
pub use server::{GrpcServer, GrpcServerBuilder};
pub use status::{Code, GrpcStatus};
pub use transcode::MethodTranscodingOptions;
pub use transport::MemoryTransport;
