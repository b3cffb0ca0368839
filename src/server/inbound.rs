//! Request body reading.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use super::stream::ServerStream;
use crate::codec::Compressor;
use crate::error::{GrpcWireError, Result};
use crate::handler::InvalidMessageObserver;
use crate::protocol::{BodyDecoder, BodyItem, GrpcMessage, SerializationFormat};
use crate::status::{Code, GrpcStatus};
use crate::transport::{PartReceiver, StreamPart};

/// Why a request body could not be read to the end.
#[derive(Debug)]
pub(crate) enum InboundError {
    /// The peer reset or abandoned the stream; no status can be delivered.
    Peer(GrpcStatus),
    /// The body is unacceptable; the call ends with this error's status.
    Fatal(GrpcWireError),
}

fn client_gone() -> InboundError {
    InboundError::Peer(
        GrpcStatus::new(Code::Cancelled).with_message("Client closed the stream before half-close"),
    )
}

/// Reads framed request messages off the inbound half of a stream.
pub(crate) struct InboundReader {
    body: PartReceiver,
    decoder: BodyDecoder,
    observer: Option<InvalidMessageObserver>,
    ready: std::collections::VecDeque<GrpcMessage>,
    done: bool,
}

impl InboundReader {
    pub(crate) fn new(
        body: PartReceiver,
        format: SerializationFormat,
        max_message_size: usize,
        decompressor: Option<Arc<dyn Compressor>>,
        observer: Option<InvalidMessageObserver>,
    ) -> Self {
        Self {
            body,
            decoder: BodyDecoder::new(format.protocol, max_message_size, false)
                .with_format(format.format)
                .with_decompressor(decompressor),
            observer,
            ready: Default::default(),
            done: false,
        }
    }

    /// Next message, `Ok(None)` once the client half-closed.
    pub(crate) async fn next(&mut self) -> std::result::Result<Option<GrpcMessage>, InboundError> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(Some(message));
            }
            if self.done {
                return Ok(None);
            }

            let Some(part) = self.body.recv().await else {
                return Err(client_gone());
            };
            let (items, end) = match part {
                StreamPart::Data {
                    data,
                    end_of_stream,
                } => {
                    let mut items = self.decoder.push(&data).map_err(InboundError::Fatal)?;
                    if end_of_stream {
                        items.extend(self.decoder.finish().map_err(InboundError::Fatal)?);
                    }
                    (items, end_of_stream)
                }
                StreamPart::Trailers(_) => {
                    (self.decoder.finish().map_err(InboundError::Fatal)?, true)
                }
                StreamPart::Headers { end_of_stream, .. } => {
                    if end_of_stream {
                        (self.decoder.finish().map_err(InboundError::Fatal)?, true)
                    } else {
                        (Vec::new(), false)
                    }
                }
                StreamPart::Reset(code) => {
                    tracing::debug!("Client reset the stream with code {}", code.0);
                    return Err(InboundError::Peer(GrpcStatus::from_reset(code)));
                }
            };
            self.done = end;
            self.accept(items)?;
        }
    }

    fn accept(&mut self, items: Vec<BodyItem>) -> std::result::Result<(), InboundError> {
        for item in items {
            match item {
                BodyItem::Message(message) => self.ready.push_back(message),
                BodyItem::Invalid(e) => match &self.observer {
                    Some(observer) => {
                        tracing::debug!("Skipping invalid request message: {}", e);
                        observer(&e);
                    }
                    None => return Err(InboundError::Fatal(e)),
                },
                BodyItem::Trailers(_) => {}
            }
        }
        Ok(())
    }

    /// Read the whole body.
    pub(crate) async fn collect(&mut self) -> std::result::Result<Vec<GrpcMessage>, InboundError> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Forward messages to a handler's stream until the body ends, then keep
    /// watching for a reset.
    ///
    /// Failures end the call through `stream`.
    pub(crate) async fn pump(mut self, tx: mpsc::Sender<Result<GrpcMessage>>, stream: Arc<ServerStream>) {
        loop {
            match self.next().await {
                Ok(Some(message)) => {
                    if tx.send(Ok(message)).await.is_err() {
                        // Handler stopped reading.
                        return;
                    }
                }
                Ok(None) => {
                    drop(tx);
                    return watch_reset(self.body, stream).await;
                }
                Err(InboundError::Peer(status)) => {
                    stream.abort(status, None);
                    return;
                }
                Err(InboundError::Fatal(e)) => {
                    tracing::debug!("Request stream failed: {}", e);
                    stream.fail(e.to_status());
                    return;
                }
            }
        }
    }

    /// Hand the exhausted body over to [`watch_reset`].
    pub(crate) async fn watch(self, stream: Arc<ServerStream>) {
        watch_reset(self.body, stream).await
    }
}

/// Abort `stream` if the client resets after half-closing.
pub(crate) async fn watch_reset(mut body: PartReceiver, stream: Arc<ServerStream>) {
    while let Some(part) = body.recv().await {
        if let StreamPart::Reset(code) = part {
            tracing::debug!("Client reset the stream with code {}", code.0);
            stream.abort(GrpcStatus::from_reset(code), None);
            return;
        }
    }
}

/// Read an unframed (transcoded) body of at most `limit` bytes.
pub(crate) async fn collect_body(
    body: &mut PartReceiver,
    limit: usize,
) -> std::result::Result<Bytes, InboundError> {
    let mut buffer = BytesMut::new();
    loop {
        let Some(part) = body.recv().await else {
            return Err(client_gone());
        };
        let end = match part {
            StreamPart::Data {
                data,
                end_of_stream,
            } => {
                if buffer.len() + data.len() > limit {
                    return Err(InboundError::Fatal(GrpcWireError::MessageTooLarge {
                        size: buffer.len() + data.len(),
                        limit,
                    }));
                }
                buffer.extend_from_slice(&data);
                end_of_stream
            }
            StreamPart::Headers { end_of_stream, .. } => end_of_stream,
            StreamPart::Trailers(_) => true,
            StreamPart::Reset(code) => {
                return Err(InboundError::Peer(GrpcStatus::from_reset(code)));
            }
        };
        if end {
            return Ok(buffer.freeze());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::stream::StreamOptions;
    use crate::config::WriterConfig;
    use crate::protocol::{build_frame, Protocol, WireFormat};
    use crate::status::ResetCode;
    use crate::transport::StreamSink;
    use crate::writer::spawn_writer_task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn body(parts: Vec<StreamPart>) -> PartReceiver {
        let (tx, rx) = mpsc::channel(parts.len().max(1));
        for part in parts {
            tx.try_send(part).unwrap();
        }
        rx
    }

    fn native() -> SerializationFormat {
        SerializationFormat::new(Protocol::Native, WireFormat::Binary)
    }

    fn payloads(messages: Vec<GrpcMessage>) -> Vec<Bytes> {
        messages.into_iter().map(GrpcMessage::into_payload).collect()
    }

    fn end(data: Bytes) -> StreamPart {
        StreamPart::Data {
            data,
            end_of_stream: true,
        }
    }

    #[tokio::test]
    async fn test_collect_messages() {
        let mut two = build_frame(b"a", false).to_vec();
        two.extend_from_slice(&build_frame(b"b", false));
        let mut reader = InboundReader::new(
            body(vec![end(Bytes::from(two))]),
            native(),
            1024,
            None,
            None,
        );
        let messages = reader.collect().await.unwrap();
        assert!(messages.iter().all(|m| m.format() == WireFormat::Binary));
        assert_eq!(payloads(messages), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn test_oversized_without_observer_is_fatal() {
        let mut reader = InboundReader::new(
            body(vec![end(build_frame(&[1u8; 11], false))]),
            native(),
            10,
            None,
            None,
        );
        match reader.collect().await {
            Err(InboundError::Fatal(e)) => {
                assert_eq!(e.to_status().code(), Code::ResourceExhausted)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_with_observer_is_skipped() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut data = build_frame(&[1u8; 11], false).to_vec();
        data.extend_from_slice(&build_frame(b"ok", false));
        let mut reader = InboundReader::new(
            body(vec![end(Bytes::from(data))]),
            native(),
            10,
            None,
            Some(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let messages = reader.collect().await.unwrap();
        assert_eq!(payloads(messages), vec![Bytes::from_static(b"ok")]);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_and_early_close() {
        let mut reader = InboundReader::new(
            body(vec![StreamPart::Reset(ResetCode::CANCEL)]),
            native(),
            1024,
            None,
            None,
        );
        assert!(matches!(
            reader.collect().await,
            Err(InboundError::Peer(s)) if s.code() == Code::Cancelled
        ));

        let mut reader = InboundReader::new(
            body(vec![StreamPart::data(build_frame(b"x", false))]),
            native(),
            1024,
            None,
            None,
        );
        assert!(matches!(reader.collect().await, Err(InboundError::Peer(_))));
    }

    #[tokio::test]
    async fn test_collect_body_limit() {
        let mut rx = body(vec![
            StreamPart::data(Bytes::from_static(b"{\"a\":")),
            end(Bytes::from_static(b"1}")),
        ]);
        assert_eq!(&collect_body(&mut rx, 64).await.unwrap()[..], b"{\"a\":1}");

        let mut rx = body(vec![end(Bytes::from_static(b"0123456789"))]);
        assert!(matches!(
            collect_body(&mut rx, 4).await,
            Err(InboundError::Fatal(GrpcWireError::MessageTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_pump_ends_handler_stream_while_body_stays_open() {
        let (body_tx, body_rx) = mpsc::channel(4);
        body_tx.try_send(end(build_frame(b"last", false))).unwrap();

        let (sink_tx, _sink_rx) = mpsc::channel(8);
        let sink: Box<dyn StreamSink> = Box::new(sink_tx);
        let (writer, _task) = spawn_writer_task(sink, WriterConfig::default());
        let stream = Arc::new(ServerStream::new(
            native(),
            writer,
            CancellationToken::new(),
            StreamOptions {
                compressor: None,
                accept_encoding: None,
                max_response_message_size: 1024,
                transcoded: None,
            },
        ));

        let (tx, mut rx) = mpsc::channel(4);
        let reader = InboundReader::new(body_rx, native(), 1024, None, None);
        let pump = tokio::spawn(reader.pump(tx, stream));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(&first.unwrap().unwrap().payload()[..], b"last");
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(closed.is_none());

        // The pump keeps watching for a reset until the body closes.
        assert!(!pump.is_finished());
        drop(body_tx);
        tokio::time::timeout(Duration::from_secs(1), pump).await.unwrap().unwrap();
    }
}
