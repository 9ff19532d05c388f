//! Binds a stream and a reconciler to the currently selected run.
//!
//! Everything runs on one task: commands, snapshot completions, stream signals
//! and the reconnect timer are multiplexed with `tokio::select!`, so the
//! reconciler is only ever touched from here.

use crate::{
    api::ApiClient,
    config::SyncConfig,
    error::SyncError,
    fetcher::SnapshotFetcher,
    reconciler::{Reconciler, Subscription},
    stream::{StreamClient, StreamSignal, StreamTransport},
};
use runwatch_core::{RunDetail, RunId};
use std::{pin::Pin, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Sleep,
};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 64;
const FETCH_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Select(RunId),
    Clear,
    /// Re-issues a failed initial load, or reconnects now when disconnected.
    Retry,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Loading,
    Connecting,
    Connected,
    Disconnected { reason: String },
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Loading => "loading",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected { .. } => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Read-only state published to presentation code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncView {
    pub run_id: Option<RunId>,
    pub detail: Option<RunDetail>,
    pub connection: ConnectionStatus,
    /// Set when the first snapshot of a selection failed; cleared on success.
    pub load_error: Option<SyncError>,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPurpose {
    Initial,
    Reseed,
}

#[derive(Debug)]
struct FetchOutcome {
    run_id: RunId,
    epoch: u64,
    fetch_seq: u64,
    purpose: FetchPurpose,
    result: Result<RunDetail, SyncError>,
}

struct Selection {
    run_id: RunId,
    epoch: u64,
    reconciler: Reconciler,
    _publisher: Subscription,
    fetch: Option<JoinHandle<()>>,
    /// Sequence number of the latest fetch; outcomes of earlier ones are stale.
    fetch_seq: u64,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Drop for Selection {
    fn drop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
    }
}

pub struct LifecycleManager {
    config: SyncConfig,
    fetcher: Arc<dyn SnapshotFetcher>,
    stream: StreamClient,
    commands: mpsc::Receiver<SyncCommand>,
    fetch_tx: mpsc::Sender<FetchOutcome>,
    fetch_rx: mpsc::Receiver<FetchOutcome>,
    view: Arc<watch::Sender<SyncView>>,
    selection: Option<Selection>,
    next_epoch: u64,
    next_fetch: u64,
}

impl LifecycleManager {
    pub fn new(
        config: SyncConfig,
        fetcher: Arc<dyn SnapshotFetcher>,
        transport: Arc<dyn StreamTransport>,
        commands: mpsc::Receiver<SyncCommand>,
        view: watch::Sender<SyncView>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_QUEUE_CAPACITY);
        let stream = StreamClient::new(transport, config.max_frame_bytes);
        Self {
            config,
            fetcher,
            stream,
            commands,
            fetch_tx,
            fetch_rx,
            view: Arc::new(view),
            selection: None,
            next_epoch: 0,
            next_fetch: 0,
        }
    }

    pub async fn run(mut self) {
        info!(event = "sync_start", api_url = %self.config.api_url);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(SyncCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(outcome) = self.fetch_rx.recv() => self.handle_fetch(outcome),
                signal = self.stream.next_signal() => self.handle_stream_signal(signal),
                () = reconnect_due(&mut self.selection) => self.handle_reconnect_due(),
            }
        }
        self.deselect();
        info!(event = "sync_stop");
    }

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Select(run_id) => self.select(run_id),
            SyncCommand::Clear => {
                self.deselect();
                self.publish(|view| {
                    view.run_id = None;
                    view.detail = None;
                    view.connection = ConnectionStatus::Idle;
                    view.load_error = None;
                });
            }
            SyncCommand::Retry => self.retry(),
            SyncCommand::Shutdown => {}
        }
    }

    fn select(&mut self, run_id: RunId) {
        if self.selection.as_ref().map(|selection| selection.run_id) == Some(run_id) {
            debug!(event = "run_already_selected", run_id);
            return;
        }
        // The previous run's connection must be gone before anything for the
        // new one starts.
        self.deselect();

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let mut reconciler = Reconciler::new(self.config.event_capacity);
        let view = Arc::clone(&self.view);
        let publisher = reconciler.subscribe(move |_, detail| {
            let detail = detail.clone();
            view.send_modify(|view| {
                view.detail = Some(detail);
                view.revision += 1;
            });
        });
        self.selection = Some(Selection {
            run_id,
            epoch,
            reconciler,
            _publisher: publisher,
            fetch: None,
            fetch_seq: 0,
            reconnect: None,
        });
        self.publish(|view| {
            view.run_id = Some(run_id);
            view.detail = None;
            view.connection = ConnectionStatus::Loading;
            view.load_error = None;
        });
        info!(event = "run_selected", run_id, epoch);
        self.start_fetch(FetchPurpose::Initial);
    }

    fn deselect(&mut self) {
        self.stream.close();
        if let Some(selection) = self.selection.take() {
            debug!(event = "run_released", run_id = selection.run_id, epoch = selection.epoch);
        }
    }

    fn retry(&mut self) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        if selection.fetch.is_some() {
            return;
        }
        let run_id = selection.run_id;
        if !selection.reconciler.is_seeded() {
            info!(event = "initial_load_retry", run_id);
            self.publish(|view| {
                view.connection = ConnectionStatus::Loading;
                view.load_error = None;
            });
            self.start_fetch(FetchPurpose::Initial);
        } else if self.stream.live_run().is_none() {
            info!(event = "reconnect_now", run_id);
            selection.reconnect = None;
            self.start_fetch(FetchPurpose::Reseed);
        }
    }

    fn start_fetch(&mut self, purpose: FetchPurpose) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        if let Some(previous) = selection.fetch.take() {
            previous.abort();
        }
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.fetch_tx.clone();
        let run_id = selection.run_id;
        let epoch = selection.epoch;
        self.next_fetch += 1;
        let fetch_seq = self.next_fetch;
        selection.fetch_seq = fetch_seq;
        debug!(event = "snapshot_fetch", run_id, epoch, fetch_seq, purpose = ?purpose);
        selection.fetch = Some(tokio::spawn(async move {
            let result = fetcher.fetch_run_detail(run_id).await;
            let _ = tx
                .send(FetchOutcome {
                    run_id,
                    epoch,
                    fetch_seq,
                    purpose,
                    result,
                })
                .await;
        }));
    }

    fn handle_fetch(&mut self, outcome: FetchOutcome) {
        let current = self
            .selection
            .as_ref()
            .map(|selection| (selection.run_id, selection.epoch, selection.fetch_seq));
        if current != Some((outcome.run_id, outcome.epoch, outcome.fetch_seq)) {
            let stale = SyncError::Stale {
                run_id: outcome.run_id,
                epoch: outcome.epoch,
            };
            debug!(event = "snapshot_discarded", fetch_seq = outcome.fetch_seq, error = %stale);
            return;
        }
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        selection.fetch = None;
        let run_id = selection.run_id;

        match outcome.result {
            Ok(detail) => {
                info!(
                    event = "snapshot_applied",
                    run_id,
                    purpose = ?outcome.purpose,
                    tasks = detail.tasks.len(),
                    events = detail.recent_events.len(),
                );
                selection.reconciler.seed(detail);
                self.stream.open(run_id);
                self.publish(|view| {
                    view.connection = ConnectionStatus::Connecting;
                    view.load_error = None;
                });
            }
            Err(err) => {
                let reason = err.to_string();
                match outcome.purpose {
                    FetchPurpose::Initial => {
                        warn!(event = "initial_load_failed", run_id, error = %err);
                        self.publish(|view| {
                            view.connection = ConnectionStatus::Disconnected { reason };
                            view.load_error = Some(err);
                        });
                    }
                    FetchPurpose::Reseed => {
                        warn!(event = "reseed_failed", run_id, error = %err);
                        self.publish(|view| {
                            view.connection = ConnectionStatus::Disconnected { reason };
                        });
                        self.schedule_reconnect();
                    }
                }
            }
        }
    }

    fn handle_stream_signal(&mut self, signal: StreamSignal) {
        let Some(selection) = self.selection.as_mut() else {
            self.stream.close();
            return;
        };
        let run_id = selection.run_id;
        match signal {
            StreamSignal::Connected => {
                self.publish(|view| view.connection = ConnectionStatus::Connected);
            }
            StreamSignal::Update(update) => {
                let kind = update.kind();
                if !selection.reconciler.apply(update) {
                    debug!(event = "update_dropped", run_id, kind);
                }
            }
            StreamSignal::Disconnected { reason } => {
                self.stream.close();
                self.publish(|view| {
                    view.connection = ConnectionStatus::Disconnected { reason };
                });
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect_delay;
        if let Some(selection) = self.selection.as_mut() {
            info!(
                event = "reconnect_scheduled",
                run_id = selection.run_id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            );
            selection.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
        }
    }

    fn handle_reconnect_due(&mut self) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        selection.reconnect = None;
        if selection.fetch.is_some() {
            debug!(event = "reconnect_skipped", run_id = selection.run_id);
            return;
        }
        info!(event = "reconnect_attempt", run_id = selection.run_id);
        // The stream may have missed messages during the gap, so reseed first.
        self.start_fetch(FetchPurpose::Reseed);
    }

    fn publish(&self, update: impl FnOnce(&mut SyncView)) {
        self.view.send_modify(|view| {
            update(view);
            view.revision += 1;
        });
    }
}

async fn reconnect_due(selection: &mut Option<Selection>) {
    match selection
        .as_mut()
        .and_then(|selection| selection.reconnect.as_mut())
    {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Owner-side handle of a running [`LifecycleManager`].
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    view: watch::Receiver<SyncView>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub async fn select(&self, run_id: RunId) {
        self.send(SyncCommand::Select(run_id)).await;
    }

    pub async fn clear(&self) {
        self.send(SyncCommand::Clear).await;
    }

    pub async fn retry(&self) {
        self.send(SyncCommand::Retry).await;
    }

    /// Change notifications for the published view.
    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    pub fn current(&self) -> SyncView {
        self.view.borrow().clone()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        let _ = self.task.await;
    }

    async fn send(&self, command: SyncCommand) {
        if self.commands.send(command).await.is_err() {
            debug!(event = "sync_command_dropped", command = ?command);
        }
    }
}

/// Starts a lifecycle manager on the current tokio runtime.
pub fn spawn(
    config: SyncConfig,
    fetcher: Arc<dyn SnapshotFetcher>,
    transport: Arc<dyn StreamTransport>,
) -> SyncHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (view_tx, view_rx) = watch::channel(SyncView::default());
    let manager = LifecycleManager::new(config, fetcher, transport, command_rx, view_tx);
    let task = tokio::spawn(manager.run());
    SyncHandle {
        commands: command_tx,
        view: view_rx,
        task,
    }
}

/// Starts a lifecycle manager talking HTTP to `config.api_url`.
pub fn spawn_http(config: SyncConfig) -> Result<SyncHandle, SyncError> {
    let client = Arc::new(ApiClient::new(&config)?);
    let fetcher: Arc<dyn SnapshotFetcher> = client.clone();
    let transport: Arc<dyn StreamTransport> = client;
    Ok(spawn(config, fetcher, transport))
}
