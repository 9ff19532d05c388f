use runwatch_core::{stream_wire::DEFAULT_MAX_FRAME_BYTES, DEFAULT_EVENT_CAPACITY};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the runs API, without a trailing slash.
    pub api_url: String,
    /// Upper bound on events held for the selected run.
    pub event_capacity: usize,
    /// Fixed wait between losing the stream and the reseed attempt.
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = normalize_api_url(&api_url.into());
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let api_url = non_empty(lookup("RUNWATCH_API_URL"))
            .map(|value| normalize_api_url(&value))
            .unwrap_or(defaults.api_url);
        let event_capacity = non_empty(lookup("RUNWATCH_EVENT_CAPACITY"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.event_capacity);
        let reconnect_delay = non_empty(lookup("RUNWATCH_RECONNECT_DELAY_MS"))
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_delay);
        let request_timeout = non_empty(lookup("RUNWATCH_REQUEST_TIMEOUT_SECS"))
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        Self {
            api_url,
            event_capacity,
            reconnect_delay,
            request_timeout,
            ..defaults
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn normalize_api_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
