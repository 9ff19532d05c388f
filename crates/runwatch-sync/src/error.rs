use runwatch_core::{stream_wire::FrameError, RunId};
use thiserror::Error;

/// Failure classes of the synchronization engine.
///
/// None of them is fatal: `Decode` is logged and skipped, `Transport` turns into
/// a reconnect, `NotFound` is shown to the user, `Stale` is dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("run {0} not found")]
    NotFound(RunId),
    #[error("stale response for run {run_id} (epoch {epoch})")]
    Stale { run_id: RunId, epoch: u64 },
}

impl From<FrameError> for SyncError {
    fn from(err: FrameError) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}
