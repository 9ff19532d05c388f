//! Push-stream connection for one run.
//!
//! The client never reconnects on its own: a lost connection yields a single
//! [`StreamSignal::Disconnected`] and the client goes quiet until its owner
//! closes it or opens it again.

use crate::error::SyncError;
use async_trait::async_trait;
use futures_util::{future::BoxFuture, stream::BoxStream, StreamExt};
use runwatch_core::{
    stream_wire::{decode_stream_message, SseFrameDecoder, StreamMessage, StreamUpdate},
    RunId,
};
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, info, warn};

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, SyncError>>;

/// Opens the raw byte stream behind `GET /runs/{id}/stream`.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, run_id: RunId) -> Result<ByteStream, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    Connected,
    Update(StreamUpdate),
    Disconnected { reason: String },
}

enum Phase {
    Opening(BoxFuture<'static, Result<ByteStream, SyncError>>),
    Open {
        body: ByteStream,
        decoder: SseFrameDecoder,
        backlog: VecDeque<StreamUpdate>,
    },
    Lost,
}

struct ActiveStream {
    run_id: RunId,
    phase: Phase,
}

pub struct StreamClient {
    transport: Arc<dyn StreamTransport>,
    max_frame_bytes: usize,
    active: Option<ActiveStream>,
}

impl StreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>, max_frame_bytes: usize) -> Self {
        Self {
            transport,
            max_frame_bytes,
            active: None,
        }
    }

    /// Run the client is opening or connected to; `None` once lost or closed.
    pub fn live_run(&self) -> Option<RunId> {
        self.active
            .as_ref()
            .filter(|active| !matches!(active.phase, Phase::Lost))
            .map(|active| active.run_id)
    }

    pub fn open(&mut self, run_id: RunId) {
        if self.live_run() == Some(run_id) {
            return;
        }
        self.close();
        let transport = Arc::clone(&self.transport);
        info!(event = "stream_open", run_id);
        self.active = Some(ActiveStream {
            run_id,
            phase: Phase::Opening(Box::pin(async move { transport.connect(run_id).await })),
        });
    }

    /// Drops the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(event = "stream_close", run_id = active.run_id);
        }
    }

    /// Waits for the next signal. Pends forever while idle or lost.
    ///
    /// Cancel-safe: state only advances after an inner await completes.
    pub async fn next_signal(&mut self) -> StreamSignal {
        let max_frame_bytes = self.max_frame_bytes;
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        let run_id = active.run_id;
        loop {
            match &mut active.phase {
                Phase::Opening(connecting) => match connecting.await {
                    Ok(body) => {
                        active.phase = Phase::Open {
                            body,
                            decoder: SseFrameDecoder::new(max_frame_bytes),
                            backlog: VecDeque::new(),
                        };
                        info!(event = "stream_connected", run_id);
                        return StreamSignal::Connected;
                    }
                    Err(err) => {
                        active.phase = Phase::Lost;
                        return lost(run_id, err.to_string());
                    }
                },
                Phase::Open {
                    body,
                    decoder,
                    backlog,
                } => {
                    if let Some(update) = backlog.pop_front() {
                        return StreamSignal::Update(update);
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => {
                            let report = decoder.push_chunk(&chunk);
                            for err in report.errors {
                                warn!(event = "stream_decode_error", run_id, error = %err);
                            }
                            backlog.extend(report.frames.iter().filter_map(|frame| {
                                decode_update(run_id, &frame.data)
                            }));
                        }
                        Some(Err(err)) => {
                            active.phase = Phase::Lost;
                            return lost(run_id, err.to_string());
                        }
                        None => {
                            let report = decoder.finish();
                            for err in report.errors {
                                warn!(event = "stream_decode_error", run_id, error = %err);
                            }
                            let tail: VecDeque<StreamUpdate> = report
                                .frames
                                .iter()
                                .filter_map(|frame| decode_update(run_id, &frame.data))
                                .collect();
                            if tail.is_empty() {
                                active.phase = Phase::Lost;
                                return lost(run_id, "stream closed by server".to_string());
                            }
                            // Deliver what was buffered, then report the close.
                            backlog.extend(tail);
                            *body = Box::pin(futures_util::stream::empty());
                        }
                    }
                }
                Phase::Lost => return std::future::pending().await,
            }
        }
    }
}

fn lost(run_id: RunId, reason: String) -> StreamSignal {
    warn!(event = "stream_disconnected", run_id, reason = %reason);
    StreamSignal::Disconnected { reason }
}

fn decode_update(run_id: RunId, data: &str) -> Option<StreamUpdate> {
    match decode_stream_message(data) {
        Ok(StreamMessage::Update(update)) => Some(update),
        Ok(StreamMessage::Ignored { kind }) => {
            debug!(event = "stream_message_ignored", run_id, kind = %kind);
            None
        }
        Err(err) => {
            warn!(event = "stream_decode_error", run_id, error = %err);
            None
        }
    }
}
