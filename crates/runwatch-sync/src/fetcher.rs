use crate::error::SyncError;
use async_trait::async_trait;
use runwatch_core::{RunDetail, RunId};

/// One-shot read of a run's full state, used as the synchronization baseline.
///
/// Implementations do not retry; the lifecycle manager decides when to ask again.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_run_detail(&self, run_id: RunId) -> Result<RunDetail, SyncError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Serves canned details; a run can be held until the test releases it.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        details: Mutex<HashMap<RunId, Result<RunDetail, SyncError>>>,
        held: Mutex<HashMap<RunId, oneshot::Receiver<()>>>,
        calls: Mutex<Vec<RunId>>,
    }

    impl FakeFetcher {
        pub(crate) fn set(&self, run_id: RunId, result: Result<RunDetail, SyncError>) {
            self.details
                .lock()
                .expect("details lock")
                .insert(run_id, result);
        }

        /// Makes the next fetch of `run_id` wait until the returned sender fires.
        pub(crate) fn hold(&self, run_id: RunId) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.held.lock().expect("held lock").insert(run_id, rx);
            tx
        }

        pub(crate) fn calls(&self) -> Vec<RunId> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl SnapshotFetcher for FakeFetcher {
        async fn fetch_run_detail(&self, run_id: RunId) -> Result<RunDetail, SyncError> {
            self.calls.lock().expect("calls lock").push(run_id);
            let gate = self.held.lock().expect("held lock").remove(&run_id);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.details
                .lock()
                .expect("details lock")
                .get(&run_id)
                .cloned()
                .unwrap_or(Err(SyncError::NotFound(run_id)))
        }
    }
}
