use futures_util::StreamExt;
use runwatch_core::{
    stream_wire::{decode_stream_message, SseFrameDecoder, StreamMessage, StreamUpdate},
    Event, Run, RunDetail, RunStatus, Task,
};
use runwatch_hub::{HubConfig, HubState};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot};

struct TestHub {
    base: String,
    hub: Arc<HubState>,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for TestHub {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start_hub(config: HubConfig) -> TestHub {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let hub = HubState::new(config);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(runwatch_hub::serve(listener, hub.clone(), async move {
        let _ = stop_rx.await;
    }));
    TestHub {
        base: format!("http://{addr}"),
        hub,
        stop: Some(stop_tx),
    }
}

async fn create_run(client: &reqwest::Client, base: &str, title: &str) -> Run {
    let response = client
        .post(format!("{base}/runs"))
        .json(&json!({ "title": title }))
        .send()
        .await
        .expect("create run");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response.json().await.expect("run body")
}

#[tokio::test]
async fn unknown_run_is_404_with_detail() {
    let hub = start_hub(HubConfig::default()).await;
    let client = reqwest::Client::new();

    for path in ["/runs/9", "/runs/9/tasks", "/runs/9/stream"] {
        let response = client
            .get(format!("{}{path}", hub.base))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND, "{path}");
        let body: Value = response.json().await.expect("error body");
        assert_eq!(body, json!({ "detail": "Run not found" }));
    }
}

#[tokio::test]
async fn invalid_bodies_are_unprocessable() {
    let hub = start_hub(HubConfig::default()).await;
    let client = reqwest::Client::new();

    let empty_title = client
        .post(format!("{}/runs", hub.base))
        .json(&json!({ "title": "" }))
        .send()
        .await
        .expect("request");
    assert_eq!(empty_title.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let run = create_run(&client, &hub.base, "checks").await;
    let bad_status = client
        .patch(format!("{}/runs/{}", hub.base, run.id))
        .json(&json!({ "status": "paused" }))
        .send()
        .await
        .expect("request");
    assert_eq!(bad_status.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let not_json = client
        .post(format!("{}/runs/{}/events", hub.base, run.id))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(not_json.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn run_list_pages_newest_first() {
    let hub = start_hub(HubConfig::default()).await;
    let client = reqwest::Client::new();
    for title in ["first", "second", "third"] {
        create_run(&client, &hub.base, title).await;
    }

    let list = |query: &'static str| {
        let client = client.clone();
        let url = format!("{}/runs{query}", hub.base);
        async move {
            let response = client.get(url).send().await.expect("list runs");
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let runs: Vec<Run> = response.json().await.expect("runs body");
            runs.into_iter().map(|run| run.title).collect::<Vec<_>>()
        }
    };
    assert_eq!(list("").await, vec!["third", "second", "first"]);
    assert_eq!(list("?skip=1&limit=1").await, vec!["second"]);
    assert_eq!(list("?skip=2").await, vec!["first"]);

    let bad_limit = client
        .get(format!("{}/runs?limit=-1", hub.base))
        .send()
        .await
        .expect("request");
    assert_eq!(bad_limit.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn run_detail_reflects_tasks_events_and_status() {
    let hub = start_hub(HubConfig {
        event_window: 2,
        ..HubConfig::default()
    })
    .await;
    let client = reqwest::Client::new();
    let run = create_run(&client, &hub.base, "deploy").await;
    assert_eq!(run.status, RunStatus::Pending);

    let task: Task = client
        .post(format!("{}/runs/{}/tasks", hub.base, run.id))
        .json(&json!({ "title": "build" }))
        .send()
        .await
        .expect("create task")
        .json()
        .await
        .expect("task body");
    for message in ["one", "two", "three"] {
        let event: Event = client
            .post(format!("{}/runs/{}/events", hub.base, run.id))
            .json(&json!({ "event_type": "success", "message": message, "metadata": "{}" }))
            .send()
            .await
            .expect("create event")
            .json()
            .await
            .expect("event body");
        assert_eq!(event.event_metadata.as_deref(), Some("{}"));
    }
    client
        .patch(format!("{}/runs/{}/tasks/{}", hub.base, run.id, task.id))
        .json(&json!({ "status": "completed" }))
        .send()
        .await
        .expect("update task");
    client
        .patch(format!("{}/runs/{}", hub.base, run.id))
        .json(&json!({ "status": "running" }))
        .send()
        .await
        .expect("update run");

    let detail: RunDetail = client
        .get(format!("{}/runs/{}", hub.base, run.id))
        .send()
        .await
        .expect("get run")
        .json()
        .await
        .expect("detail body");
    assert_eq!(detail.run.status, RunStatus::Running);
    assert_eq!(detail.tasks.len(), 1);
    assert_eq!(detail.tasks[0].status, RunStatus::Completed);
    let messages: Vec<&str> = detail
        .recent_events
        .iter()
        .map(|event| event.message.as_str())
        .collect();
    assert_eq!(messages, vec!["three", "two"]);

    let runs: Vec<Run> = client
        .get(format!("{}/runs", hub.base))
        .send()
        .await
        .expect("list runs")
        .json()
        .await
        .expect("runs body");
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn stream_announces_then_forwards_updates() {
    let hub = start_hub(HubConfig::default()).await;
    let client = reqwest::Client::new();
    let run = create_run(&client, &hub.base, "streamed").await;

    let response = client
        .get(format!("{}/runs/{}/stream", hub.base, run.id))
        .send()
        .await
        .expect("open stream");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(hub.hub.broadcaster.subscriber_count(run.id), 1);
    let mut body = response.bytes_stream();
    let mut decoder = SseFrameDecoder::default();
    let mut frames = Vec::new();

    client
        .post(format!("{}/runs/{}/events", hub.base, run.id))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .expect("create event");

    while frames.len() < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("stream stalled")
            .expect("stream ended")
            .expect("chunk");
        frames.extend(decoder.push_chunk(&chunk).frames);
    }

    let connected: Value = serde_json::from_str(&frames[0].data).expect("connected json");
    assert_eq!(connected, json!({ "type": "connected", "run_id": run.id }));
    match decode_stream_message(&frames[1].data).expect("update") {
        StreamMessage::Update(StreamUpdate::Event { event }) => {
            assert_eq!(event.message, "hello");
            assert_eq!(event.run_id, run.id);
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn closing_streams_ends_open_responses() {
    let hub = start_hub(HubConfig::default()).await;
    let client = reqwest::Client::new();
    let run = create_run(&client, &hub.base, "closing").await;

    let mut body = client
        .get(format!("{}/runs/{}/stream", hub.base, run.id))
        .send()
        .await
        .expect("open stream")
        .bytes_stream();
    hub.hub.close_streams();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = body.next().await {
            if chunk.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "stream should end after close_streams");
}
