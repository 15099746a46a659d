//! Browser front end for interactive extraction runs.
//!
//! Five operations over HTTP, all on localhost: serve the static shell,
//! list the sheets of a chosen spreadsheet, preview a sheet, start a
//! background batch for a chosen identifier column, and poll-and-drain the
//! accumulated event queue. The queue is an [`EventSink`] like any other
//! subscriber; delivery to the browser is at-most-once and non-durable —
//! events produced between polls are batched, drained events are never
//! redelivered.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};

use extruder_core::{BatchConfig, run_batch};
use extruder_pipeline::RemoteClient;
use extruder_shared::{AppConfig, Event, EventSink, ExtruderError, Result};

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// Drainable queue of stage events, filled by running batches and emptied
/// by the browser's poll.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<Vec<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything accumulated since the last drain.
    pub fn drain(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl EventSink for EventQueue {
    fn handle(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    queue: Arc<EventQueue>,
    batch: BatchConfig,
    client: RemoteClient,
}

/// Start the front end on localhost. Runs until the process exits.
pub async fn serve(config: AppConfig, port: u16) -> Result<()> {
    let client = RemoteClient::connect(&config).await?;
    let state = AppState {
        queue: Arc::new(EventQueue::new()),
        batch: BatchConfig::from(&config),
        client,
    };

    let app = app_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ExtruderError::Server(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, "front end listening");
    println!("extruder front end on http://localhost:{port}/");

    axum::serve(listener, app)
        .await
        .map_err(|e| ExtruderError::Server(e.to_string()))
}

fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/sheets", get(sheets))
        .route("/preview", get(preview))
        .route("/run", get(run))
        .route("/events", get(events))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DatasetQuery {
    dataset: String,
}

#[derive(Deserialize)]
struct SheetQuery {
    dataset: String,
    sheet: usize,
}

#[derive(Deserialize)]
struct RunQuery {
    dataset: String,
    sheet: usize,
    column: usize,
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

async fn sheets(Query(query): Query<DatasetQuery>) -> Response {
    match extruder_sheets::sheet_names(Path::new(&query.dataset)) {
        Ok(names) => Json(names).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn preview(Query(query): Query<SheetQuery>) -> Response {
    match extruder_sheets::preview(Path::new(&query.dataset), query.sheet) {
        Ok(preview) => Json(preview).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Start a background batch and return the identifier listing right away.
/// Progress flows through the event queue.
async fn run(State(state): State<AppState>, Query(query): Query<RunQuery>) -> Response {
    let input = PathBuf::from(&query.dataset);
    let ids = match extruder_sheets::identifier_column(&input, query.sheet, query.column) {
        Ok(ids) => ids,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    info!(items = ids.len(), dataset = %query.dataset, "starting background batch");

    let batch_ids = ids.clone();
    tokio::spawn(async move {
        let sink: Arc<dyn EventSink> = state.queue.clone();
        match run_batch(&batch_ids, &state.batch, &state.client, Some(sink)).await {
            Ok(outcome) => {
                if let Err(e) = extruder_sheets::write_results(&input, &outcome.rows) {
                    error!(error = %e, "failed to write result table");
                }
            }
            Err(e) => error!(error = %e, "background batch failed"),
        }
    });

    Json(serde_json::json!({ "items": ids })).into_response()
}

async fn events(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.queue.drain())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use extruder_shared::StageKind;

    use super::*;

    async fn test_state() -> AppState {
        let mut config = AppConfig::default();
        // The client only validates the URL at build time; no traffic flows
        config.remote.base_url = Some("http://127.0.0.1:9".into());
        let client = RemoteClient::connect(&config).await.unwrap();
        AppState {
            queue: Arc::new(EventQueue::new()),
            batch: BatchConfig::from(&config),
            client,
        }
    }

    #[test]
    fn queue_drains_at_most_once() {
        let queue = EventQueue::new();
        queue.handle(&Event::success(StageKind::ResolveTemplate, "111"));
        queue.handle(&Event::failure(StageKind::FindTask, "222"));

        // Events between polls come out batched, in order
        let first = queue.drain();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].stage, StageKind::ResolveTemplate);
        assert_eq!(first[1].stage, StageKind::FindTask);

        // A second poll never redelivers
        assert!(queue.drain().is_empty());

        // New events after the drain show up in the next poll
        queue.handle(&Event::success(StageKind::GetValue, "111"));
        assert_eq!(queue.drain().len(), 1);
    }

    #[tokio::test]
    async fn index_serves_the_shell() {
        let router = app_router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("extruder"));
    }

    #[tokio::test]
    async fn events_endpoint_drains_the_queue() {
        let state = test_state().await;
        state
            .queue
            .handle(&Event::success(StageKind::FetchDocument, "111"));
        let router = app_router(state.clone());

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let events: Vec<Event> = serde_json::from_slice(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, StageKind::FetchDocument);

        // Drained: the next poll is empty
        let response = router
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let events: Vec<Event> = serde_json::from_slice(&body).unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn missing_dataset_is_a_bad_request() {
        let router = app_router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/sheets?dataset=/no/such/file.xlsx")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
