//! Server-side call state machine.
//!
//! A [`ServerStream`] owns the response half of one call. Its phase only
//! moves forward:
//!
//! ```text
//! Idle ──first message──► HeadersSent ──finish──► Closed
//!   └──────────finish (trailers-only)─────────────►┘
//! ```
//!
//! The terminal status is produced exactly once: the first `finish` wins and
//! later calls return `false`. Transcoded calls buffer their response and
//! emit a single JSON body with the mapped HTTP status at finish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::transcoding::{error_body, transcoding_error_status};
use crate::codec::{Compressor, GRPC_ACCEPT_ENCODING, GRPC_ENCODING};
use crate::error::{GrpcWireError, Result};
use crate::protocol::{
    build_trailers_frame, encode_chunk, encode_message, Protocol, SerializationFormat,
    TRANSCODING_CONTENT_TYPE,
};
use crate::status::{encode_trailer_block, Code, GrpcStatus, ResetCode};
use crate::transcode::weave_response;
use crate::transport::StreamPart;
use crate::writer::WriterHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    HeadersSent,
    Closed,
}

#[derive(Debug)]
struct StreamState {
    phase: Phase,
    response_headers: HeaderMap,
    final_status: Option<GrpcStatus>,
    /// Transcoded responses, held until finish.
    buffered: Vec<Bytes>,
}

/// Response-side options fixed at negotiation time.
pub(crate) struct StreamOptions {
    pub compressor: Option<Arc<dyn Compressor>>,
    pub accept_encoding: Option<HeaderValue>,
    pub max_response_message_size: usize,
    /// Set for transcoded calls: which response field becomes the body.
    pub transcoded: Option<Option<String>>,
}

pub(crate) struct ServerStream {
    format: SerializationFormat,
    writer: WriterHandle,
    cancel: CancellationToken,
    options: StreamOptions,
    state: Mutex<StreamState>,
}

impl ServerStream {
    pub(crate) fn new(
        format: SerializationFormat,
        writer: WriterHandle,
        cancel: CancellationToken,
        options: StreamOptions,
    ) -> Self {
        Self {
            format,
            writer,
            cancel,
            options,
            state: Mutex::new(StreamState {
                phase: Phase::Idle,
                response_headers: HeaderMap::new(),
                final_status: None,
                buffered: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_transcoded(&self) -> bool {
        self.options.transcoded.is_some()
    }

    pub(crate) fn set_response_header(&self, name: HeaderName, value: HeaderValue) -> Result<()> {
        let mut state = self.state();
        if state.phase != Phase::Idle {
            return Err(GrpcWireError::Protocol(
                "Response headers already sent".to_string(),
            ));
        }
        state.response_headers.append(name, value);
        Ok(())
    }

    /// Queue one response message.
    pub(crate) fn send_message(&self, payload: Bytes) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GrpcWireError::Cancelled);
        }
        let limit = self.options.max_response_message_size;
        if payload.len() > limit {
            return Err(GrpcWireError::MessageTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let mut state = self.state();
        if state.phase == Phase::Closed {
            return Err(GrpcWireError::Protocol(
                "Write after the call ended".to_string(),
            ));
        }
        if self.is_transcoded() {
            state.buffered.push(payload);
            return Ok(());
        }
        if !self.writer.is_ready() {
            return Err(GrpcWireError::NotReady);
        }

        let frame = encode_message(
            &payload,
            self.options.compressor.as_deref(),
            self.format.protocol,
        )?;
        if state.phase == Phase::Idle {
            let headers = self.take_response_headers(&mut state);
            self.writer.send(StreamPart::Headers {
                status: Some(StatusCode::OK),
                headers,
                end_of_stream: false,
            })?;
            state.phase = Phase::HeadersSent;
        }
        self.writer.send(StreamPart::data(frame))
    }

    fn take_response_headers(&self, state: &mut StreamState) -> HeaderMap {
        let mut headers = std::mem::take(&mut state.response_headers);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(self.format.media_type()),
        );
        if let Some(compressor) = &self.options.compressor {
            if let Ok(value) = HeaderValue::from_str(compressor.encoding()) {
                headers.insert(GRPC_ENCODING, value);
            }
        }
        if let Some(accept) = &self.options.accept_encoding {
            headers.insert(GRPC_ACCEPT_ENCODING, accept.clone());
        }
        headers
    }

    /// End the call with `status`. Returns `false` if it already ended.
    pub(crate) fn finish(&self, status: GrpcStatus) -> bool {
        let mut state = self.state();
        if state.phase == Phase::Closed {
            return false;
        }
        let previous = std::mem::replace(&mut state.phase, Phase::Closed);

        let (status, result) = match &self.options.transcoded {
            Some(response_body) => self.finish_transcoded(&mut state, response_body.as_deref(), status),
            None => {
                let result = self.finish_framed(&mut state, previous, &status);
                (status, result)
            }
        };
        if let Err(e) = result {
            tracing::debug!("Could not send status {}: {}", status, e);
        }
        state.final_status = Some(status);
        true
    }

    fn finish_framed(
        &self,
        state: &mut StreamState,
        previous: Phase,
        status: &GrpcStatus,
    ) -> Result<()> {
        if previous == Phase::Idle {
            let mut headers = self.take_response_headers(state);
            status.write_headers(&mut headers);
            return self.writer.send(StreamPart::Headers {
                status: Some(StatusCode::OK),
                headers,
                end_of_stream: true,
            });
        }

        if !self.format.protocol.trailers_in_body() {
            return self.writer.send(StreamPart::Trailers(status.to_headers()));
        }

        let frame = build_trailers_frame(&encode_trailer_block(&status.to_headers()));
        let data = match self.format.protocol {
            Protocol::WebText => encode_chunk(&frame),
            _ => frame,
        };
        self.writer.send(StreamPart::Data {
            data,
            end_of_stream: true,
        })
    }

    fn finish_transcoded(
        &self,
        state: &mut StreamState,
        response_body: Option<&str>,
        mut status: GrpcStatus,
    ) -> (GrpcStatus, Result<()>) {
        let mut body = None;
        if status.is_ok() {
            let message = if state.buffered.is_empty() {
                Bytes::from_static(b"{}")
            } else {
                state.buffered.swap_remove(0)
            };
            match weave_response(&message, response_body) {
                Ok(woven) => body = Some(woven),
                Err(e) => {
                    tracing::warn!("Could not build transcoded response: {}", e);
                    status = transcoding_error_status(&e);
                }
            }
        }

        let (http_status, body) = match body {
            Some(body) => (StatusCode::OK, body),
            None => (status.code().to_http_status(), error_body(&status)),
        };

        let mut headers = std::mem::take(&mut state.response_headers);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(TRANSCODING_CONTENT_TYPE),
        );
        let result = self
            .writer
            .send(StreamPart::Headers {
                status: Some(http_status),
                headers,
                end_of_stream: false,
            })
            .and_then(|_| {
                self.writer.send(StreamPart::Data {
                    data: body,
                    end_of_stream: true,
                })
            });
        (status, result)
    }

    /// Tear the call down without an in-band status.
    ///
    /// `reset` is sent to the peer when set; otherwise queued output is
    /// simply dropped (the peer is already gone).
    pub(crate) fn abort(&self, status: GrpcStatus, reset: Option<ResetCode>) {
        {
            let mut state = self.state();
            state.phase = Phase::Closed;
            state.final_status.get_or_insert(status);
        }
        match reset {
            Some(code) => self.writer.reset(code),
            None => self.writer.abort(),
        }
        self.cancel.cancel();
    }

    /// Finish with `status` and stop the handler.
    pub(crate) fn fail(&self, status: GrpcStatus) {
        self.finish(status);
        self.cancel.cancel();
    }

    /// Local cancellation requested by the handler.
    pub(crate) fn cancel(&self) {
        self.abort(
            GrpcStatus::new(Code::Cancelled).with_message("Call cancelled by server"),
            Some(ResetCode::CANCEL),
        );
    }

    /// Deadline expiry.
    ///
    /// Completes the call with DEADLINE_EXCEEDED while a status can still be
    /// sent; once the status is out, the stream is reset instead.
    pub(crate) fn expire(&self) {
        tracing::debug!("Deadline exceeded");
        let status = GrpcStatus::new(Code::DeadlineExceeded).with_message("Deadline exceeded");
        if !self.finish(status) {
            self.writer.reset(ResetCode::CANCEL);
        }
        self.cancel.cancel();
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.is_transcoded() || self.writer.is_ready()
    }

    pub(crate) fn on_ready(&self) -> oneshot::Receiver<()> {
        if self.is_transcoded() {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            return rx;
        }
        self.writer.on_ready()
    }

    pub(crate) async fn ready(&self) {
        if !self.is_transcoded() {
            self.writer.ready().await;
        }
    }

    pub(crate) fn final_status(&self) -> Option<GrpcStatus> {
        self.state().final_status.clone()
    }
}
