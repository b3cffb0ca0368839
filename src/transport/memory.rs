//! In-process transport connecting a client straight to a server.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ClientTransport, PartReceiver, RequestHead, StreamSink};
use crate::error::Result;
use crate::handler::BoxFuture;
use crate::server::GrpcServer;

/// Default capacity of each direction of an in-memory stream.
const DEFAULT_CAPACITY: usize = 64;

/// A [`ClientTransport`] whose streams are served by a [`GrpcServer`] in the
/// same process. Each opened stream spawns one `serve` task.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    server: Arc<GrpcServer>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new(server: GrpcServer) -> Self {
        Self {
            server: Arc::new(server),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Parts buffered in each direction before a write suspends.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

impl ClientTransport for MemoryTransport {
    fn open(&self, head: RequestHead) -> BoxFuture<'_, Result<(Box<dyn StreamSink>, PartReceiver)>> {
        Box::pin(async move {
            let (request_tx, request_rx) = mpsc::channel(self.capacity);
            let (response_tx, response_rx) = mpsc::channel(self.capacity);
            let server = self.server.clone();

            tokio::spawn(async move {
                let path = head.path().to_string();
                let status = server.serve(head, request_rx, Box::new(response_tx)).await;
                tracing::debug!("{} served with {}", path, status);
            });

            let sink: Box<dyn StreamSink> = Box::new(request_tx);
            Ok((sink, response_rx))
        })
    }
}
