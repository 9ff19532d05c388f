//! In-memory runs server speaking the REST and push-stream contract the sync
//! engine consumes.

pub mod broadcast;
pub mod routes;
pub mod store;

use axum::{
    routing::{get, patch, post},
    Router,
};
use broadcast::Broadcaster;
use routes::ApiError;
use runwatch_core::{stream_wire::StreamUpdate, RunId, DEFAULT_EVENT_CAPACITY};
use std::{future::Future, sync::Arc, time::Duration};
use store::RunStore;
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, info};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub event_window: usize,
    pub keep_alive: Duration,
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_window: DEFAULT_EVENT_CAPACITY,
            keep_alive: DEFAULT_KEEP_ALIVE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

pub struct HubState {
    pub config: HubConfig,
    pub store: RunStore,
    pub broadcaster: Arc<Broadcaster>,
    shutdown: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
}

impl HubState {
    pub fn new(config: HubConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown) = watch::channel(false);
        Arc::new(Self {
            store: RunStore::new(config.event_window),
            broadcaster: Broadcaster::new(config.channel_capacity),
            config,
            shutdown,
            shutdown_tx,
        })
    }

    /// Encodes `update` once and fans it out to the run's open streams.
    pub fn publish(&self, run_id: RunId, update: &StreamUpdate) -> Result<usize, ApiError> {
        let data =
            serde_json::to_string(update).map_err(|err| ApiError::Internal(err.to_string()))?;
        let delivered = self.broadcaster.publish(run_id, Arc::from(data));
        debug!(event = "stream_publish", run_id, kind = update.kind(), delivered);
        Ok(delivered)
    }

    /// Ends every open stream; new requests are still served.
    pub fn close_streams(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/runs", get(routes::list_runs).post(routes::create_run))
        .route("/runs/:run_id", get(routes::get_run).patch(routes::update_run))
        .route(
            "/runs/:run_id/tasks",
            get(routes::list_tasks).post(routes::create_task),
        )
        .route("/runs/:run_id/tasks/:task_id", patch(routes::update_task))
        .route("/runs/:run_id/events", post(routes::create_event))
        .route("/runs/:run_id/stream", get(routes::stream_run))
        .with_state(hub)
}

/// Serves until `shutdown` resolves, then closes open streams so the graceful
/// drain can finish.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<HubState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(hub.clone());
    let signal = async move {
        shutdown.await;
        info!(event = "hub_shutdown");
        hub.close_streams();
    };
    axum::serve(listener, app).with_graceful_shutdown(signal).await
}
