//! Dedicated writer task for one stream's outbound parts.
//!
//! Callers never touch the [`StreamSink`] directly. They push [`StreamPart`]s
//! through a [`WriterHandle`] into a channel drained by a writer task, which
//! is the only place the stream suspends on the peer.
//!
//! # Architecture
//!
//! ```text
//! Handler ─┐
//! Deadline ┼─► WriterHandle ─► mpsc ─► Writer Task ─► StreamSink
//! Reader  ─┘
//! ```
//!
//! - **Coalescing**: consecutive data parts already queued are merged into one
//!   sink write.
//! - **Backpressure**: queued data parts are counted by a
//!   [`BackpressureController`]; `send` fails with `NotReady` at the limit.
//! - **Reset**: [`WriterHandle::reset`] discards queued parts and writes a
//!   single reset; [`WriterHandle::abort`] discards them silently.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backpressure::BackpressureController;
use crate::config::WriterConfig;
use crate::error::{GrpcWireError, Result};
use crate::status::ResetCode;
use crate::transport::{StreamPart, StreamSink};

/// Maximum parts merged into a single write.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for sending parts to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks of one stream.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<StreamPart>,
    backpressure: BackpressureController,
    shutdown: CancellationToken,
    reset_code: Arc<Mutex<Option<ResetCode>>>,
}

impl WriterHandle {
    /// Queue a part for writing.
    ///
    /// Flow-controlled parts fail with `NotReady` while the queue is full;
    /// headers and stream-closing parts always queue.
    pub fn send(&self, part: StreamPart) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(GrpcWireError::Cancelled);
        }

        if part.is_flow_controlled() {
            self.backpressure.try_reserve()?;
        } else {
            self.backpressure.reserve_terminal();
        }

        self.tx.send(part).map_err(|_| {
            self.backpressure.release_many(1);
            GrpcWireError::ConnectionClosed
        })
    }

    /// Whether another data part may be sent.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.backpressure.is_ready()
    }

    /// One-shot notification of the next transition to ready.
    pub fn on_ready(&self) -> oneshot::Receiver<()> {
        self.backpressure.on_ready()
    }

    /// Wait until another data part may be sent.
    pub async fn ready(&self) {
        self.backpressure.ready().await
    }

    /// Get current pending part count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending_count()
    }

    /// Discard queued parts and reset the stream with `code`.
    pub fn reset(&self, code: ResetCode) {
        {
            let mut slot = self
                .reset_code
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert(code);
        }
        self.shutdown.cancel();
    }

    /// Discard queued parts and stop without writing anything further.
    pub fn abort(&self) {
        self.shutdown.cancel();
    }

    /// Whether the stream was reset or aborted locally.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending parts.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle resolves
/// once the stream is closed (a terminal part written, a reset, or every
/// handle dropped).
pub fn spawn_writer_task(
    sink: Box<dyn StreamSink>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>) {
    spawn(sink, config, false)
}

/// Spawn a writer for the request half of a client stream.
///
/// Unlike [`spawn_writer_task`], the task outlives the half-close: a
/// [`WriterHandle::reset`] after end of stream is still written. It ends
/// once every handle is dropped.
pub fn spawn_request_writer(
    sink: Box<dyn StreamSink>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>) {
    spawn(sink, config, true)
}

fn spawn(
    sink: Box<dyn StreamSink>,
    config: WriterConfig,
    reset_after_end: bool,
) -> (WriterHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WriterHandle {
        tx,
        backpressure: BackpressureController::new(config.max_pending_parts),
        shutdown: CancellationToken::new(),
        reset_code: Arc::new(Mutex::new(None)),
    };

    let task = tokio::spawn(writer_loop(
        rx,
        sink,
        handle.backpressure.clone(),
        handle.shutdown.clone(),
        handle.reset_code.clone(),
        config.max_coalesce_bytes,
        reset_after_end,
    ));

    (handle, task)
}

enum Step {
    Next(StreamPart),
    Written,
    Failed(GrpcWireError),
    Drained,
    Shutdown,
}

/// Main writer loop - receives parts and writes them to the sink.
async fn writer_loop(
    mut rx: mpsc::UnboundedReceiver<StreamPart>,
    mut sink: Box<dyn StreamSink>,
    backpressure: BackpressureController,
    shutdown: CancellationToken,
    reset_code: Arc<Mutex<Option<ResetCode>>>,
    max_coalesce_bytes: usize,
    reset_after_end: bool,
) -> Result<()> {
    let mut carry: Option<StreamPart> = None;
    let mut ended = false;

    loop {
        let first = match carry.take() {
            Some(part) => part,
            None => {
                let step = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => Step::Shutdown,
                    part = rx.recv() => part.map_or(Step::Drained, Step::Next),
                };
                match step {
                    Step::Next(part) => part,
                    Step::Drained => return Ok(()),
                    _ => break,
                }
            }
        };

        if ended {
            tracing::debug!("Dropping part queued after end of stream");
            backpressure.release_many(1);
            continue;
        }

        let (part, count) = coalesce(first, &mut rx, &mut carry, max_coalesce_bytes);
        let terminal = part.is_terminal();

        let step = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Step::Shutdown,
            result = sink.write(part) => match result {
                Ok(()) => Step::Written,
                Err(e) => Step::Failed(e),
            },
        };

        match step {
            Step::Written => {
                backpressure.release_many(count);
                if terminal && !reset_after_end {
                    return Ok(());
                }
                ended |= terminal;
            }
            Step::Failed(e) => {
                tracing::error!("Stream write failed: {}", e);
                shutdown.cancel();
                backpressure.release_many(backpressure.pending_count());
                return Err(e);
            }
            _ => break,
        }
    }

    // Reset or abort: queued parts are dropped unwritten.
    rx.close();
    backpressure.release_many(backpressure.pending_count());

    let code = reset_code
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(code) = code {
        if let Err(e) = sink.write(StreamPart::Reset(code)).await {
            tracing::debug!("Could not deliver stream reset {:?}: {}", code, e);
        }
    }
    Ok(())
}

/// Merge already-queued data parts following `first`. A queued part of any
/// other kind is left in `carry` for the next iteration.
fn coalesce(
    first: StreamPart,
    rx: &mut mpsc::UnboundedReceiver<StreamPart>,
    carry: &mut Option<StreamPart>,
    max_bytes: usize,
) -> (StreamPart, usize) {
    let data = match first {
        StreamPart::Data {
            data,
            end_of_stream: false,
        } => data,
        other => return (other, 1),
    };

    let mut chunks: Vec<Bytes> = vec![data];
    let mut total = chunks[0].len();
    let mut end_of_stream = false;

    while !end_of_stream && total < max_bytes && chunks.len() < MAX_BATCH_SIZE {
        match rx.try_recv() {
            Ok(StreamPart::Data {
                data,
                end_of_stream: eos,
            }) => {
                total += data.len();
                end_of_stream = eos;
                chunks.push(data);
            }
            Ok(other) => {
                *carry = Some(other);
                break;
            }
            Err(_) => break,
        }
    }

    let count = chunks.len();
    let data = if count == 1 {
        chunks.pop().unwrap_or_default()
    } else {
        let mut merged = BytesMut::with_capacity(total);
        for chunk in &chunks {
            merged.extend_from_slice(chunk);
        }
        merged.freeze()
    };

    (
        StreamPart::Data {
            data,
            end_of_stream,
        },
        count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::time::Duration;

    fn channel_sink(capacity: usize) -> (Box<dyn StreamSink>, mpsc::Receiver<StreamPart>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Box::new(tx), rx)
    }

    fn data(bytes: &'static [u8]) -> StreamPart {
        StreamPart::data(Bytes::from_static(bytes))
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_parts, crate::backpressure::DEFAULT_MAX_PENDING);
    }

    #[tokio::test]
    async fn test_queued_data_is_coalesced() {
        let (sink, mut out) = channel_sink(8);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default());

        handle.send(data(b"ab")).unwrap();
        handle.send(data(b"cd")).unwrap();
        handle.send(data(b"ef")).unwrap();
        handle.send(StreamPart::Trailers(HeaderMap::new())).unwrap();

        match out.recv().await.unwrap() {
            StreamPart::Data {
                data,
                end_of_stream,
            } => {
                assert_eq!(&data[..], b"abcdef");
                assert!(!end_of_stream);
            }
            other => panic!("unexpected part: {:?}", other),
        }
        assert!(matches!(out.recv().await, Some(StreamPart::Trailers(_))));

        task.await.unwrap().unwrap();
        assert_eq!(handle.pending_count(), 0);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_coalescing_respects_byte_limit() {
        let (sink, mut out) = channel_sink(8);
        let config = WriterConfig::default().with_max_coalesce_bytes(3);
        let (handle, _task) = spawn_writer_task(sink, config);

        handle.send(data(b"ab")).unwrap();
        handle.send(data(b"cd")).unwrap();
        handle.send(data(b"ef")).unwrap();

        let mut sizes = Vec::new();
        for _ in 0..2 {
            if let Some(StreamPart::Data { data, .. }) = out.recv().await {
                sizes.push(data.len());
            }
        }
        assert_eq!(sizes, vec![4, 2]);
    }

    #[tokio::test]
    async fn test_not_ready_at_limit() {
        let (sink, mut out) = channel_sink(8);
        let config = WriterConfig::default().with_max_pending_parts(2);
        let (handle, _task) = spawn_writer_task(sink, config);

        handle.send(data(b"1")).unwrap();
        handle.send(data(b"2")).unwrap();
        assert!(!handle.is_ready());
        assert!(matches!(
            handle.send(data(b"3")),
            Err(GrpcWireError::NotReady)
        ));

        // Terminal parts still go through.
        handle.send(StreamPart::Trailers(HeaderMap::new())).unwrap();

        let ready = handle.on_ready();
        assert!(out.recv().await.is_some());
        tokio::time::timeout(Duration::from_secs(1), ready)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_ready());
    }

    #[tokio::test]
    async fn test_reset_discards_queue() {
        let (sink, mut out) = channel_sink(1);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default());

        handle
            .send(StreamPart::Headers {
                status: Some(http::StatusCode::OK),
                headers: HeaderMap::new(),
                end_of_stream: false,
            })
            .unwrap();
        while handle.pending_count() > 0 {
            tokio::task::yield_now().await;
        }
        // The sink is full now; everything else waits in the queue.
        handle.send(data(b"payload")).unwrap();
        handle.send(StreamPart::Trailers(HeaderMap::new())).unwrap();
        handle.reset(ResetCode::CANCEL);

        assert!(matches!(out.recv().await, Some(StreamPart::Headers { .. })));
        assert!(matches!(
            out.recv().await,
            Some(StreamPart::Reset(ResetCode::CANCEL))
        ));
        task.await.unwrap().unwrap();
        assert!(out.recv().await.is_none());
        assert!(matches!(
            handle.send(data(b"late")),
            Err(GrpcWireError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_request_writer_resets_after_half_close() {
        let (sink, mut out) = channel_sink(4);
        let (handle, task) = spawn_request_writer(sink, WriterConfig::default());

        handle
            .send(StreamPart::Data {
                data: Bytes::from_static(b"last"),
                end_of_stream: true,
            })
            .unwrap();
        assert!(matches!(out.recv().await, Some(StreamPart::Data { end_of_stream: true, .. })));

        handle.reset(ResetCode::CANCEL);
        assert!(matches!(out.recv().await, Some(StreamPart::Reset(ResetCode::CANCEL))));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_writer_ends_when_handles_drop() {
        let (sink, mut out) = channel_sink(4);
        let (handle, task) = spawn_request_writer(sink, WriterConfig::default());

        handle
            .send(StreamPart::Data {
                data: Bytes::new(),
                end_of_stream: true,
            })
            .unwrap();
        handle.send(data(b"late")).unwrap();
        drop(handle);

        task.await.unwrap().unwrap();
        assert!(matches!(out.recv().await, Some(StreamPart::Data { end_of_stream: true, .. })));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let (sink, mut out) = channel_sink(4);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default());

        handle.abort();
        task.await.unwrap().unwrap();
        assert!(out.recv().await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_sink_failure_ends_task() {
        let (sink, out) = channel_sink(1);
        drop(out);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default());

        handle.send(data(b"x")).unwrap();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(GrpcWireError::ConnectionClosed)));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (sink, _out) = channel_sink(1);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
