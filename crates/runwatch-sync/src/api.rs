//! HTTP client for the runs API.

use crate::{
    config::SyncConfig,
    error::SyncError,
    fetcher::SnapshotFetcher,
    stream::{ByteStream, StreamTransport},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use runwatch_core::{NewRun, Run, RunDetail, RunId};
use serde::de::DeserializeOwned;

/// API client for run snapshots and live streams.
///
/// Snapshot requests share a client with a total timeout; streams use a second
/// client bounded only on connect, since a stream body never completes.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    stream_client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a new API client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: config.api_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists runs, newest first.
    /// Lists runs newest first.
    pub async fn list_runs(&self, skip: usize, limit: usize) -> Result<Vec<Run>, SyncError> {
        let url = format!("{}/runs", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("skip", skip), ("limit", limit)])
            .send()
            .await?;
        parse_json(check_status(response, None).await?).await
    }

    pub async fn create_run(&self, request: &NewRun) -> Result<Run, SyncError> {
        let url = format!("{}/runs", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        parse_json(check_status(response, None).await?).await
    }

    /// Fetches a run with its tasks and recent events.
    pub async fn get_run(&self, run_id: RunId) -> Result<RunDetail, SyncError> {
        let url = format!("{}/runs/{run_id}", self.base_url);
        let response = self.client.get(&url).send().await?;
        parse_json(check_status(response, Some(run_id)).await?).await
    }

    pub async fn open_stream(&self, run_id: RunId) -> Result<ByteStream, SyncError> {
        let url = format!("{}/runs/{run_id}/stream", self.base_url);
        let response = self
            .stream_client
            .get(&url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = check_status(response, Some(run_id)).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| SyncError::Transport(err.to_string()))
            })
            .boxed())
    }
}

#[async_trait]
impl SnapshotFetcher for ApiClient {
    async fn fetch_run_detail(&self, run_id: RunId) -> Result<RunDetail, SyncError> {
        self.get_run(run_id).await
    }
}

#[async_trait]
impl StreamTransport for ApiClient {
    async fn connect(&self, run_id: RunId) -> Result<ByteStream, SyncError> {
        self.open_stream(run_id).await
    }
}

async fn check_status(response: Response, run_id: Option<RunId>) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(run_id)) = (status, run_id) {
        return Err(SyncError::NotFound(run_id));
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Transport(format!("API error ({status}): {body}")))
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, SyncError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|err| SyncError::Decode(err.to_string()))
}
