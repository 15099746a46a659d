//! Authenticated HTTP client for the remote system.
//!
//! The negotiate handshake the remote requires only works with the
//! synchronous `reqwest` client, so the client is built off the scheduler
//! and every call is dispatched through [`tokio::task::spawn_blocking`] and
//! awaited back on the scheduler. A slow or stuck call therefore never
//! blocks the pipelines of other identifiers.

use std::time::Duration;

use tokio::task;
use url::Url;

use extruder_shared::{AppConfig, ExtruderError, Result, resolve_base_url};

/// User-Agent presented to the remote system.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/97.0.4692.71 Safari/537.36 Edg/97.0.1072.55";

/// Content type the template-resolution endpoint expects.
const JSON_CONTENT_TYPE: &str = "application/json, text/javascript, */*; q=0.01";

/// Content type of the form-encoded grid query.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

/// A numeric status in [200, 400) is success; anything else is failure,
/// including codes below 200.
pub fn status_success(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Status and body of one remote call.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    pub fn is_failure(&self) -> bool {
        !status_success(self.status)
    }
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

/// Shared handle over the blocking HTTP client. Cheap to clone.
#[derive(Clone)]
pub struct RemoteClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl RemoteClient {
    /// Build a client from config. The base URL comes from
    /// `[remote].base_url` or the configured env var.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let base_url = resolve_base_url(config)?;
        Url::parse(&base_url)
            .map_err(|e| ExtruderError::config(format!("invalid base URL '{base_url}': {e}")))?;

        let connect_timeout = Duration::from_secs(config.remote.connect_timeout_secs);
        let request_timeout = Duration::from_secs(config.remote.request_timeout_secs);

        let client = task::spawn_blocking(move || {
            reqwest::blocking::Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(connect_timeout)
                .timeout(request_timeout)
                .build()
        })
        .await
        .map_err(|e| ExtruderError::Network(format!("worker thread failed: {e}")))?
        .map_err(|e| ExtruderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// POST a JSON body.
    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<RemoteResponse> {
        let client = self.client.clone();
        let url = format!("{}{path}", self.base_url);
        dispatch(move || {
            client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(body.to_string())
                .send()
        })
        .await
    }

    /// POST an already form-encoded body.
    pub async fn post_form(&self, path: &str, body: String) -> Result<RemoteResponse> {
        let client = self.client.clone();
        let url = format!("{}{path}", self.base_url);
        dispatch(move || {
            client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(body)
                .send()
        })
        .await
    }

    /// GET a path (query string included by the caller).
    pub async fn get(&self, path_and_query: &str) -> Result<RemoteResponse> {
        let client = self.client.clone();
        let url = format!("{}{path_and_query}", self.base_url);
        dispatch(move || client.get(&url).send()).await
    }
}

/// Run one blocking request on a worker thread and await the outcome here.
async fn dispatch<F>(call: F) -> Result<RemoteResponse>
where
    F: FnOnce() -> reqwest::Result<reqwest::blocking::Response> + Send + 'static,
{
    task::spawn_blocking(move || {
        let response = call().map_err(|e| ExtruderError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| ExtruderError::Network(e.to_string()))?;
        Ok(RemoteResponse { status, body })
    })
    .await
    .map_err(|e| ExtruderError::Network(format!("worker thread failed: {e}")))?
}
