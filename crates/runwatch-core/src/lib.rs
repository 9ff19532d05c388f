use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub mod stream_wire;

pub type RunId = i64;
pub type TaskId = i64;
pub type EventId = i64;

/// Default size of the recent-event window kept per run.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Run {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RunId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: RunStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: TaskId,
    #[serde(deserialize_with = "deserialize_id")]
    pub run_id: RunId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: EventId,
    #[serde(deserialize_with = "deserialize_id")]
    pub run_id: RunId,
    #[serde(default)]
    pub event_type: EventType,
    pub message: String,
    /// Opaque payload; never interpreted by the client.
    #[serde(default, alias = "metadata")]
    pub event_metadata: Option<String>,
    pub created_at: String,
}

/// A run together with its tasks and the most recent events, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub recent_events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Tasks share the run status vocabulary.
pub type TaskStatus = RunStatus;

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    System,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Info => "info",
            EventType::Success => "success",
            EventType::Warning => "warning",
            EventType::Error => "error",
            EventType::System => "system",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Request bodies for the REST surface.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRun {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewEvent {
    #[serde(default)]
    pub event_type: EventType,
    pub message: String,
    #[serde(default, alias = "metadata")]
    pub event_metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub status: RunStatus,
}

/// Deserialize an ID that can be either a string or a number into an i64
fn deserialize_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("id out of range")),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
