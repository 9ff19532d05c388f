use crate::{Event, RunId, RunStatus, Task};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Typed update carried in the `data:` field of one push-stream frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    Event { event: Event },
    RunUpdate { status: RunStatus },
    TaskUpdate { task: Task },
}

impl StreamUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamUpdate::Event { .. } => "event",
            StreamUpdate::RunUpdate { .. } => "run_update",
            StreamUpdate::TaskUpdate { .. } => "task_update",
        }
    }
}

/// Informational notices a server may interleave with updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamNotice {
    Connected { run_id: RunId },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Update(StreamUpdate),
    /// A well-formed message whose `type` this client does not handle.
    Ignored { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// One dispatched Server-Sent Events frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> DecodeReport<T> {
    fn push_frame(&mut self, frame: T) {
        self.frames.push(frame);
    }

    fn push_error(&mut self, error: FrameError) {
        self.errors.push(error);
    }
}

pub fn decode_stream_message(data: &str) -> Result<StreamMessage, FrameError> {
    let value: Value =
        serde_json::from_str(data).map_err(|err| FrameError::Decode(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FrameError::Decode("message has no string `type` field".to_string()))?
        .to_string();
    match kind.as_str() {
        "event" | "run_update" | "task_update" => serde_json::from_value(value)
            .map(StreamMessage::Update)
            .map_err(|err| FrameError::Decode(format!("{kind}: {err}"))),
        _ => Ok(StreamMessage::Ignored { kind }),
    }
}

#[derive(Debug, Default)]
struct PartialFrame {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
    size: usize,
    /// Set once the frame outgrew the limit; its remaining data lines are dropped.
    discarding: bool,
}

/// Incremental decoder for a `text/event-stream` body.
pub struct SseFrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    current: PartialFrame,
}

impl SseFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            current: PartialFrame::default(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<SseFrame> {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
            self.current = PartialFrame::default();
        }

        report
    }

    /// Flushes a trailing line and frame left without their terminators.
    pub fn finish(&mut self) -> DecodeReport<SseFrame> {
        let mut report = DecodeReport::default();
        if !self.pending.is_empty() {
            let mut line = std::mem::take(&mut self.pending);
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }
        self.dispatch(&mut report);
        report
    }

    fn process_line(&mut self, line: &[u8], report: &mut DecodeReport<SseFrame>) {
        if line.is_empty() {
            self.dispatch(report);
            return;
        }
        if line.starts_with(b":") {
            return;
        }
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(err) => {
                report.push_error(FrameError::Decode(format!("invalid utf-8 line: {err}")));
                return;
            }
        };
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.current.discarding {
                    return;
                }
                self.current.size += value.len() + 1;
                let size = self.current.size.saturating_sub(1);
                if size > self.max_frame_bytes {
                    report.push_error(FrameError::OversizedFrame {
                        size,
                        max: self.max_frame_bytes,
                    });
                    self.current.data = Vec::new();
                    self.current.discarding = true;
                    return;
                }
                self.current.data.push(value.to_string());
            }
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, report: &mut DecodeReport<SseFrame>) {
        let frame = std::mem::take(&mut self.current);
        if frame.discarding || frame.data.is_empty() {
            return;
        }
        report.push_frame(SseFrame {
            event: frame.event,
            id: frame.id,
            data: frame.data.join("\n"),
        });
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}
