//! Batch orchestration: one concurrent pipeline run per identifier.
//!
//! The snapshot is read once before any run starts and written once after
//! every run has finished; records are exclusively owned by their run in
//! between. Stage failures never abort the batch — a failed identifier is
//! simply absent from the result rows.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use extruder_pipeline::{RemoteClient, run_pipeline};
use extruder_shared::{
    AppConfig, ConsoleSink, EntityRecord, EsupDate, Event, EventSink, Result, ResultRow,
    StageCall, StageKind,
};
use extruder_snapshot::SnapshotStore;

// ---------------------------------------------------------------------------
// Config / outcome
// ---------------------------------------------------------------------------

/// Configuration of one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Task name matched during `findTask`.
    pub task_name: String,
    /// Field name read during `getValue`.
    pub field_name: String,
    /// Maximum concurrently running pipelines.
    pub concurrency: usize,
    /// Path of the snapshot file.
    pub snapshot_path: PathBuf,
}

impl From<&AppConfig> for BatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            task_name: config.defaults.task_name.clone(),
            field_name: config.defaults.field_name.clone(),
            concurrency: config.defaults.concurrency.max(1),
            snapshot_path: PathBuf::from(&config.defaults.snapshot_path),
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Number of identifiers a pipeline was launched for.
    pub processed: usize,
    /// One row per identifier whose field read succeeded.
    pub rows: Vec<ResultRow>,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

// ---------------------------------------------------------------------------
// run_batch
// ---------------------------------------------------------------------------

/// Run the full extraction batch.
///
/// 1. Load the snapshot (empty on any load problem).
/// 2. Create or reuse a record per identifier; duplicates collapse onto
///    one record, since a record is owned by exactly one run at a time.
/// 3. Attach the caller's sink (or a console sink) to each record.
/// 4. Launch every pipeline, bounded by the configured concurrency.
/// 5. Collect one terminal event per identifier; a panicked run is
///    isolated into a failure event instead of taking the batch down.
/// 6. Build result rows from successful field reads.
/// 7. Strip transient state from every record and re-persist the mapping.
#[instrument(skip_all, fields(ids = ids.len(), task = %config.task_name))]
pub async fn run_batch(
    ids: &[String],
    config: &BatchConfig,
    client: &RemoteClient,
    sink: Option<Arc<dyn EventSink>>,
) -> Result<BatchOutcome> {
    let start = Instant::now();

    let store = SnapshotStore::new(&config.snapshot_path);
    let mut records = store.load();

    let mut seen = HashSet::new();
    let batch_ids: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let template: Arc<Vec<StageCall>> = Arc::new(vec![
        StageCall::ResolveTemplate,
        StageCall::FindTask {
            task_name: config.task_name.clone(),
        },
        StageCall::FetchDocument,
        StageCall::GetValue {
            field: config.field_name.clone(),
        },
    ]);

    let run_sink: Arc<dyn EventSink> = match &sink {
        Some(sink) => sink.clone(),
        None => Arc::new(ConsoleSink),
    };

    info!(
        launched = batch_ids.len(),
        cached = records.len(),
        concurrency = config.concurrency,
        "starting batch"
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut handles = Vec::with_capacity(batch_ids.len());

    for id in &batch_ids {
        let mut record = records
            .remove(id)
            .unwrap_or_else(|| EntityRecord::new(id.clone()));
        record.attach_sink(run_sink.clone());

        let client = client.clone();
        let template = template.clone();
        let sem = semaphore.clone();

        handles.push((
            id.clone(),
            tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let terminal = run_pipeline(&mut record, &client, &template).await;
                (record, terminal)
            }),
        ));
    }

    let mut terminals = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        match handle.await {
            Ok((record, terminal)) => {
                records.insert(id, record);
                terminals.push(terminal);
            }
            Err(e) => {
                // The record went down with the task; a fresh one takes its
                // place so the snapshot keeps one entry per identifier.
                warn!(id = %id, error = %e, "pipeline run died, isolating");
                records.insert(id.clone(), EntityRecord::new(id.clone()));
                terminals.push(Event::failure(StageKind::Pipeline, id));
            }
        }
    }

    let mut rows = Vec::new();
    for terminal in &terminals {
        if terminal.stage != StageKind::GetValue || !terminal.success {
            continue;
        }
        if let Some(raw) = terminal.payload.as_ref().and_then(|payload| payload.get(1)) {
            rows.push(ResultRow {
                esupid: terminal.id.clone(),
                date: EsupDate::decode(raw).datetime(),
            });
        }
    }

    for record in records.values_mut() {
        record.clear_transient();
    }
    store.persist(&records)?;

    let processed = batch_ids.len();
    if let Some(sink) = &sink {
        sink.handle(
            &Event::success(StageKind::Batch, "fin").with_payload(serde_json::json!(processed)),
        );
    }

    let elapsed = start.elapsed();
    info!(
        processed,
        rows = rows.len(),
        elapsed_ms = elapsed.as_millis(),
        "batch complete"
    );

    Ok(BatchOutcome {
        processed,
        rows,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use extruder_shared::AppConfig;

    use super::*;

    async fn client_for(server: &MockServer) -> RemoteClient {
        let mut config = AppConfig::default();
        config.remote.base_url = Some(server.uri());
        RemoteClient::connect(&config).await.unwrap()
    }

    fn batch_config(tag: &str) -> BatchConfig {
        let dir = std::env::temp_dir().join(format!("extruder-core-{}-{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        BatchConfig {
            task_name: "Ready for site works".into(),
            field_name: "Site-ready date".into(),
            concurrency: 8,
            snapshot_path: dir.join("cache.bin"),
        }
    }

    fn task_page() -> String {
        let item = json!({
            "Parameters": [{"Name": "Site-ready date", "Value": "/Date(1640995200000)/"}],
        });
        format!("<html><script>kendo.observable({{ Item : {item}}});</script></html>")
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Event>>);

    impl EventSink for CollectingSink {
        fn handle(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn scenario_one_id_resolves_one_fails() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Activities/FindByActivityId"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"TemplateId": 7, "ViewId": "view-3"})),
            )
            .mount(&server)
            .await;

        // 111 has the task; 222's grid has no matching name
        Mock::given(method("POST"))
            .and(path("/Activities/Grid_Read"))
            .and(body_string_contains(r#""value":"111""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Data": [{"TaskList_0": {"Name": "Ready for site works", "ID": "task-9"}}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Activities/Grid_Read"))
            .and(body_string_contains(r#""value":"222""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Data": [{"TaskList_0": {"Name": "Different task", "ID": "task-1"}}],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/EsupTask"))
            .and(query_param("taskId", "task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_string(task_page()))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let config = batch_config("scenario");

        let outcome = run_batch(&ids(&["111", "222"]), &config, &client, None)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].esupid, "111");
        assert_eq!(
            outcome.rows[0].date,
            chrono::DateTime::from_timestamp_millis(1_640_995_200_000).unwrap()
        );

        // The snapshot now remembers what each identifier resolved to
        let persisted = SnapshotStore::new(&config.snapshot_path).load();
        assert_eq!(persisted["111"].task_ref.as_deref(), Some("task-9"));
        assert!(persisted["222"].task_ref.is_none());
        assert_eq!(persisted["222"].template_ref.as_deref(), Some("7"));
        assert!(persisted.values().all(|r| r.document.is_none()));
    }

    #[tokio::test]
    async fn warm_snapshot_skips_resolved_stages() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Activities/FindByActivityId"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Activities/Grid_Read"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/EsupTask"))
            .and(query_param("taskId", "task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_string(task_page()))
            .expect(1)
            .mount(&server)
            .await;

        let config = batch_config("warm");

        // Prior run left 111 fully resolved in the snapshot
        let mut record = EntityRecord::new("111");
        record.template_ref = Some("7".into());
        record.view_ref = Some("view-3".into());
        record.task_ref = Some("task-9".into());
        let mut records = BTreeMap::new();
        records.insert("111".to_string(), record);
        SnapshotStore::new(&config.snapshot_path)
            .persist(&records)
            .unwrap();

        let client = client_for(&server).await;
        let outcome = run_batch(&ids(&["111"]), &config, &client, None)
            .await
            .unwrap();

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].esupid, "111");
    }

    #[tokio::test]
    async fn duplicates_collapse_onto_one_run() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Activities/FindByActivityId"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"TemplateId": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let config = batch_config("dupes");

        let outcome = run_batch(&ids(&["111", "111", "111"]), &config, &client, None)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 1);
        assert!(outcome.rows.is_empty());
    }

    #[tokio::test]
    async fn supplied_sink_gets_the_batch_event_last() {
        let server = MockServer::start().await;

        // Template resolution fails outright; the chain stops there
        Mock::given(method("POST"))
            .and(path("/Activities/FindByActivityId"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let config = batch_config("sink");
        let sink = Arc::new(CollectingSink::default());
        let sink_dyn: Arc<dyn EventSink> = sink.clone();

        let outcome = run_batch(&ids(&["111", "222"]), &config, &client, Some(sink_dyn))
            .await
            .unwrap();

        assert_eq!(outcome.processed, 2);
        assert!(outcome.rows.is_empty());

        let seen = sink.0.lock().unwrap();
        // Two stage failures plus the closing batch event
        assert_eq!(seen.len(), 3);
        let last = seen.last().unwrap();
        assert_eq!(last.stage, StageKind::Batch);
        assert!(last.success);
        assert_eq!(last.id, "fin");
        assert_eq!(last.payload, Some(json!(2)));
    }

    #[tokio::test]
    async fn empty_batch_still_persists_and_counts_zero() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let config = batch_config("empty");

        let outcome = run_batch(&[], &config, &client, None).await.unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(outcome.rows.is_empty());
        assert!(config.snapshot_path.exists());
    }

    #[tokio::test]
    async fn snapshot_write_failure_surfaces() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let mut config = batch_config("badpath");
        // A directory cannot be written as a file
        config.snapshot_path = std::env::temp_dir();

        let result = run_batch(&[], &config, &client, None).await;
        assert!(matches!(
            result,
            Err(extruder_shared::ExtruderError::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn batch_time_scales_with_chain_not_batch_size() {
        let server = MockServer::start().await;
        let delay = Duration::from_millis(200);

        Mock::given(method("POST"))
            .and(path("/Activities/FindByActivityId"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"TemplateId": 7, "ViewId": "view-3"}))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Activities/Grid_Read"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "Data": [{"TaskList_0": {"Name": "Ready for site works", "ID": "task-9"}}],
                    }))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/EsupTask"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(task_page())
                    .set_delay(delay),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut config = batch_config("timing");
        config.concurrency = 12;

        let batch: Vec<String> = (0..12).map(|i| format!("{}", 9000 + i)).collect();
        let outcome = run_batch(&batch, &config, &client, None).await.unwrap();

        assert_eq!(outcome.rows.len(), 12);
        // Serial would be 12 ids × 3 calls × 200ms = 7.2s; concurrent runs
        // take roughly one chain (600ms). Generous bound for slow machines.
        assert!(
            outcome.elapsed < Duration::from_secs(4),
            "batch took {:?}",
            outcome.elapsed
        );
    }
}
