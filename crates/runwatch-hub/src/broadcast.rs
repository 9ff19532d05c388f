use runwatch_core::RunId;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::broadcast;
use tracing::debug;

/// Per-run fan-out of pre-encoded stream messages.
///
/// A channel exists only while the run has subscribers.
#[derive(Debug)]
pub struct Broadcaster {
    channels: Mutex<HashMap<RunId, broadcast::Sender<Arc<str>>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        })
    }

    pub fn subscribe(self: &Arc<Self>, run_id: RunId) -> RunSubscription {
        let mut channels = lock(&self.channels);
        let receiver = channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(event = "stream_subscribe", run_id);
        RunSubscription {
            run_id,
            receiver: Some(receiver),
            broadcaster: Arc::clone(self),
        }
    }

    /// Returns how many subscribers the message reached.
    pub fn publish(&self, run_id: RunId, message: Arc<str>) -> usize {
        let channels = lock(&self.channels);
        match channels.get(&run_id) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops the run's channel, ending its open streams once they drain.
    pub fn disconnect(&self, run_id: RunId) -> bool {
        let removed = lock(&self.channels).remove(&run_id).is_some();
        if removed {
            debug!(event = "stream_channel_dropped", run_id);
        }
        removed
    }

    pub fn subscriber_count(&self, run_id: RunId) -> usize {
        lock(&self.channels)
            .get(&run_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    fn release(&self, run_id: RunId) {
        let mut channels = lock(&self.channels);
        if channels
            .get(&run_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&run_id);
            debug!(event = "stream_channel_removed", run_id);
        }
    }
}

pub struct RunSubscription {
    run_id: RunId,
    receiver: Option<broadcast::Receiver<Arc<str>>>,
    broadcaster: Arc<Broadcaster>,
}

impl RunSubscription {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub async fn recv(&mut self) -> Result<Arc<str>, broadcast::error::RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for RunSubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.broadcaster.release(self.run_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
