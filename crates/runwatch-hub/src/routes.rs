use crate::{broadcast::RunSubscription, store::Missing, HubState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::{stream, Stream, StreamExt};
use runwatch_core::{
    stream_wire::{StreamNotice, StreamUpdate},
    Event, NewEvent, NewRun, NewTask, Run, RunDetail, RunId, StatusChange, Task, TaskId,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use thiserror::Error;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{info, warn};

const MAX_TITLE_CHARS: usize = 255;
const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Run not found")]
    RunNotFound,
    #[error("Task not found")]
    TaskNotFound,
    #[error("{0}")]
    InvalidBody(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::RunNotFound | ApiError::TaskNotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl From<Missing> for ApiError {
    fn from(missing: Missing) -> Self {
        match missing {
            Missing::Run => ApiError::RunNotFound,
            Missing::Task => ApiError::TaskNotFound,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub(crate) async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

pub(crate) async fn list_runs(
    State(hub): State<Arc<HubState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<Run>>> {
    let Query(params) = params?;
    Ok(Json(hub.store.list_runs(params.skip, params.limit).await))
}

pub(crate) async fn create_run(
    State(hub): State<Arc<HubState>>,
    body: Result<Json<NewRun>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let Json(request) = body?;
    validate_title(&request.title)?;
    let run = hub.store.create_run(request).await;
    info!(event = "run_created", run_id = run.id);
    Ok((StatusCode::CREATED, Json(run)))
}

pub(crate) async fn get_run(
    State(hub): State<Arc<HubState>>,
    Path(run_id): Path<RunId>,
) -> ApiResult<Json<RunDetail>> {
    hub.store
        .run_detail(run_id)
        .await
        .map(Json)
        .ok_or(ApiError::RunNotFound)
}

pub(crate) async fn update_run(
    State(hub): State<Arc<HubState>>,
    Path(run_id): Path<RunId>,
    body: Result<Json<StatusChange>, JsonRejection>,
) -> ApiResult<Json<Run>> {
    let Json(change) = body?;
    let run = hub
        .store
        .set_run_status(run_id, change.status)
        .await
        .ok_or(ApiError::RunNotFound)?;
    hub.publish(
        run_id,
        &StreamUpdate::RunUpdate {
            status: run.status,
        },
    )?;
    Ok(Json(run))
}

pub(crate) async fn create_task(
    State(hub): State<Arc<HubState>>,
    Path(run_id): Path<RunId>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let Json(request) = body?;
    validate_title(&request.title)?;
    let task = hub
        .store
        .create_task(run_id, request)
        .await
        .ok_or(ApiError::RunNotFound)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub(crate) async fn list_tasks(
    State(hub): State<Arc<HubState>>,
    Path(run_id): Path<RunId>,
) -> ApiResult<Json<Vec<Task>>> {
    hub.store
        .list_tasks(run_id)
        .await
        .map(Json)
        .ok_or(ApiError::RunNotFound)
}

pub(crate) async fn update_task(
    State(hub): State<Arc<HubState>>,
    Path((run_id, task_id)): Path<(RunId, TaskId)>,
    body: Result<Json<StatusChange>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let Json(change) = body?;
    let task = hub
        .store
        .set_task_status(run_id, task_id, change.status)
        .await?;
    hub.publish(run_id, &StreamUpdate::TaskUpdate { task: task.clone() })?;
    Ok(Json(task))
}

pub(crate) async fn create_event(
    State(hub): State<Arc<HubState>>,
    Path(run_id): Path<RunId>,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let Json(request) = body?;
    if request.message.is_empty() {
        return Err(ApiError::InvalidBody("message must not be empty".to_string()));
    }
    let event = hub
        .store
        .append_event(run_id, request)
        .await
        .ok_or(ApiError::RunNotFound)?;
    hub.publish(run_id, &StreamUpdate::Event { event: event.clone() })?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub(crate) async fn stream_run(
    State(hub): State<Arc<HubState>>,
    Path(run_id): Path<RunId>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    if !hub.store.contains(run_id).await {
        return Err(ApiError::RunNotFound);
    }
    let connected = serde_json::to_string(&StreamNotice::Connected { run_id })
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let subscription = hub.broadcaster.subscribe(run_id);
    info!(
        event = "stream_open",
        run_id,
        subscribers = hub.broadcaster.subscriber_count(run_id)
    );

    let updates = stream::unfold(
        (subscription, hub.shutdown.clone()),
        |(mut subscription, mut shutdown)| async move {
            let data = next_message(&mut subscription, &mut shutdown).await?;
            Some((
                Ok::<_, Infallible>(SseEvent::default().data(&*data)),
                (subscription, shutdown),
            ))
        },
    );
    let body = stream::once(async move { Ok::<_, Infallible>(SseEvent::default().data(connected)) })
        .chain(updates);
    Ok(Sse::new(body).keep_alive(KeepAlive::new().interval(hub.config.keep_alive)))
}

async fn next_message(
    subscription: &mut RunSubscription,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Arc<str>> {
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        _ = shutdown.changed() => None,
        message = subscription.recv() => match message {
            Ok(data) => Some(data),
            Err(RecvError::Lagged(skipped)) => {
                warn!(event = "stream_lagged", run_id = subscription.run_id(), skipped);
                None
            }
            Err(RecvError::Closed) => None,
        },
    }
}

fn validate_title(title: &str) -> ApiResult<()> {
    let chars = title.chars().count();
    if chars == 0 || chars > MAX_TITLE_CHARS {
        return Err(ApiError::InvalidBody(format!(
            "title must be 1 to {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}
