use runwatch_core::{NewRun, RunStatus};
use runwatch_hub::{HubConfig, HubState};
use runwatch_sync::{ApiClient, ConnectionStatus, SyncConfig, SyncError, SyncView};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{oneshot, watch},
};

async fn start_hub() -> (String, Arc<HubState>, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let hub = HubState::new(HubConfig::default());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(runwatch_hub::serve(listener, hub.clone(), async move {
        let _ = stop_rx.await;
    }));
    (format!("http://{addr}"), hub, stop_tx)
}

fn config(api_url: &str) -> SyncConfig {
    SyncConfig {
        reconnect_delay: Duration::from_millis(200),
        ..SyncConfig::default()
    }
    .with_api_url(api_url)
}

async fn wait_until(
    view: &mut watch::Receiver<SyncView>,
    predicate: impl FnMut(&SyncView) -> bool,
) -> SyncView {
    let current = tokio::time::timeout(Duration::from_secs(10), view.wait_for(predicate))
        .await
        .expect("view condition timed out")
        .expect("sync engine stopped");
    (*current).clone()
}

#[tokio::test]
async fn engine_follows_a_live_run() {
    let (base, hub, _stop) = start_hub().await;
    let api = ApiClient::new(&config(&base)).expect("client");
    let run = api
        .create_run(&NewRun {
            title: "nightly".to_string(),
            description: None,
        })
        .await
        .expect("create run");
    let listed = api.list_runs(0, 10).await.expect("list runs");
    assert_eq!(listed.iter().map(|run| run.id).collect::<Vec<_>>(), vec![run.id]);
    assert!(api.list_runs(1, 10).await.expect("list runs").is_empty());
    let http = reqwest::Client::new();
    let task: runwatch_core::Task = http
        .post(format!("{base}/runs/{}/tasks", run.id))
        .json(&json!({ "title": "compile" }))
        .send()
        .await
        .expect("create task")
        .json()
        .await
        .expect("task body");

    let sync = runwatch_sync::spawn_http(config(&base)).expect("spawn");
    let mut view = sync.subscribe();
    sync.select(run.id).await;
    let seeded = wait_until(&mut view, |view| view.connection.is_connected()).await;
    assert_eq!(seeded.detail.as_ref().map(|detail| detail.tasks.len()), Some(1));
    assert_eq!(hub.broadcaster.subscriber_count(run.id), 1);

    http.post(format!("{base}/runs/{}/events", run.id))
        .json(&json!({ "event_type": "success", "message": "compiled" }))
        .send()
        .await
        .expect("post event");
    http.patch(format!("{base}/runs/{}", run.id))
        .json(&json!({ "status": "running" }))
        .send()
        .await
        .expect("patch run");
    http.patch(format!("{base}/runs/{}/tasks/{}", run.id, task.id))
        .json(&json!({ "status": "completed" }))
        .send()
        .await
        .expect("patch task");

    let live = wait_until(&mut view, |view| {
        view.detail
            .as_ref()
            .map(|detail| {
                detail.run.status == RunStatus::Running
                    && detail.tasks[0].status == RunStatus::Completed
                    && !detail.recent_events.is_empty()
            })
            .unwrap_or(false)
    })
    .await;
    let detail = live.detail.expect("detail");
    assert_eq!(detail.recent_events[0].message, "compiled");
    assert_eq!(detail.run.title, "nightly");

    sync.shutdown().await;
}

#[tokio::test]
async fn unknown_run_surfaces_load_error() {
    let (base, _hub, _stop) = start_hub().await;
    let sync = runwatch_sync::spawn_http(config(&base)).expect("spawn");
    let mut view = sync.subscribe();

    sync.select(404).await;
    let failed = wait_until(&mut view, |view| view.load_error.is_some()).await;
    assert_eq!(failed.load_error, Some(SyncError::NotFound(404)));
    assert!(matches!(
        failed.connection,
        ConnectionStatus::Disconnected { .. }
    ));

    sync.shutdown().await;
}

#[tokio::test]
async fn dropped_stream_is_reseeded_and_reopened() {
    let (base, hub, _stop) = start_hub().await;
    let api = ApiClient::new(&config(&base)).expect("client");
    let run = api
        .create_run(&NewRun {
            title: "flaky".to_string(),
            description: None,
        })
        .await
        .expect("create run");
    let sync = runwatch_sync::spawn_http(config(&base)).expect("spawn");
    let mut view = sync.subscribe();
    sync.select(run.id).await;
    wait_until(&mut view, |view| view.connection.is_connected()).await;

    // Written to the store without a broadcast, so only a reseed can see it.
    hub.store.set_run_status(run.id, RunStatus::Failed).await;
    assert!(hub.broadcaster.disconnect(run.id));
    wait_until(&mut view, |view| !view.connection.is_connected()).await;

    let reseeded = wait_until(&mut view, |view| {
        view.connection.is_connected()
            && view.detail.as_ref().map(|detail| detail.run.status) == Some(RunStatus::Failed)
    })
    .await;
    assert_eq!(reseeded.run_id, Some(run.id));

    sync.shutdown().await;
}
