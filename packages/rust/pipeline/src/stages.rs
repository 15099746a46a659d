//! The five stage handlers.
//!
//! Each handler takes the record and produces exactly one [`Event`],
//! delivered to the record's sinks before it is returned. A stage whose
//! precondition is already satisfied succeeds immediately without touching
//! the network; a stage whose dependency is missing fails without touching
//! the network. Transport and shape problems become failure events, never
//! `Err`.

use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use extruder_shared::{EntityRecord, Event, StageKind, TaskDocument};

use crate::client::RemoteClient;

/// Resolve the template/view pair for the record's identifier.
pub async fn resolve_template(record: &mut EntityRecord, client: &RemoteClient) -> Event {
    let id = record.id.clone();

    if record.template_ref.is_some() && record.view_ref.is_some() {
        return record.emit(Event::success(StageKind::ResolveTemplate, id));
    }

    let body = json!({ "activityId": id });
    let response = match client.post_json("/Activities/FindByActivityId", body).await {
        Ok(response) => response,
        Err(e) => {
            warn!(id = %id, error = %e, "template resolution request failed");
            return record.emit(Event::failure(StageKind::ResolveTemplate, id));
        }
    };

    if response.is_failure() {
        warn!(id = %id, status = response.status, "template resolution rejected");
        return record.emit(Event::failure(StageKind::ResolveTemplate, id));
    }

    let parsed: Value = match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(e) => {
            warn!(id = %id, error = %e, "template resolution body was not JSON");
            return record.emit(Event::failure(StageKind::ResolveTemplate, id));
        }
    };

    match (
        opaque_ref(parsed.get("TemplateId")),
        opaque_ref(parsed.get("ViewId")),
    ) {
        (Some(template_ref), Some(view_ref)) => {
            record.template_ref = Some(template_ref);
            record.view_ref = Some(view_ref);
            record.emit(Event::success(StageKind::ResolveTemplate, id))
        }
        _ => record.emit(Event::failure(StageKind::ResolveTemplate, id)),
    }
}

/// Find the task whose `Name` equals `task_name` in the record's task list.
pub async fn find_task(record: &mut EntityRecord, client: &RemoteClient, task_name: &str) -> Event {
    let id = record.id.clone();

    if record.task_ref.is_some() {
        return record.emit(Event::success(StageKind::FindTask, id));
    }

    let (Some(template_ref), Some(view_ref)) =
        (record.template_ref.clone(), record.view_ref.clone())
    else {
        debug!(id = %id, "task search before template/view resolution");
        return record.emit(Event::failure(StageKind::FindTask, id));
    };

    let body = grid_read_query(&id, &view_ref, &template_ref);
    let response = match client.post_form("/Activities/Grid_Read", body).await {
        Ok(response) => response,
        Err(e) => {
            warn!(id = %id, error = %e, "task grid request failed");
            return record.emit(Event::failure(StageKind::FindTask, id));
        }
    };

    if response.is_failure() {
        warn!(id = %id, status = response.status, "task grid rejected");
        return record.emit(Event::failure(StageKind::FindTask, id));
    }

    let parsed: Value = match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(e) => {
            warn!(id = %id, error = %e, "task grid body was not JSON");
            return record.emit(Event::failure(StageKind::FindTask, id));
        }
    };

    let Some(first) = parsed
        .get("Data")
        .and_then(|data| data.get(0))
        .and_then(Value::as_object)
    else {
        debug!(id = %id, "task grid returned no data rows");
        return record.emit(Event::failure(StageKind::FindTask, id));
    };

    for (key, entry) in first {
        if !key.starts_with("TaskList") {
            continue;
        }
        if entry.get("Name").and_then(Value::as_str) == Some(task_name) {
            if let Some(task_ref) = opaque_ref(entry.get("ID")) {
                record.task_ref = Some(task_ref);
                return record.emit(Event::success(StageKind::FindTask, id));
            }
        }
    }

    record.emit(Event::failure(StageKind::FindTask, id))
}

/// Fetch the rendered task page and extract the embedded document.
pub async fn fetch_document(record: &mut EntityRecord, client: &RemoteClient) -> Event {
    let id = record.id.clone();

    let Some(task_ref) = record.task_ref.clone() else {
        debug!(id = %id, "document fetch before task resolution");
        return record.emit(Event::failure(StageKind::FetchDocument, id));
    };

    let response = match client.get(&format!("/EsupTask?taskId={task_ref}")).await {
        Ok(response) => response,
        Err(e) => {
            warn!(id = %id, error = %e, "task page request failed");
            return record.emit(Event::failure(StageKind::FetchDocument, id));
        }
    };

    if response.is_failure() {
        warn!(id = %id, status = response.status, "task page rejected");
        return record.emit(Event::failure(StageKind::FetchDocument, id));
    }

    match extract_document(&response.body) {
        Some(document) => {
            record.document = Some(document);
            record.emit(Event::success(StageKind::FetchDocument, id))
        }
        None => {
            warn!(id = %id, "no embedded document in task page");
            record.emit(Event::failure(StageKind::FetchDocument, id))
        }
    }
}

/// Read a field from the loaded document. Success payload is `[id, value]`.
pub fn get_value(record: &EntityRecord, field: &str) -> Event {
    let id = record.id.clone();

    let Some(document) = &record.document else {
        return record.emit(Event::failure(StageKind::GetValue, id));
    };

    match document.value_of(field) {
        Some(value) => {
            let payload = json!([record.id, value]);
            record.emit(Event::success(StageKind::GetValue, id).with_payload(payload))
        }
        None => record.emit(Event::failure(StageKind::GetValue, id)),
    }
}

/// Write a field into the loaded document.
///
/// The reported status is always failure, applied write or not; callers
/// must not branch on it.
pub fn set_value(record: &mut EntityRecord, field: &str, value: &Value) -> Event {
    let id = record.id.clone();

    if let Some(document) = record.document.as_mut() {
        document.assign(field, value);
    }

    record.emit(Event::failure(StageKind::SetValue, id))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Opaque identifiers arrive as JSON strings or numbers; store them as
/// strings either way.
fn opaque_ref(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The form-encoded grid query, byte-for-byte the shape the endpoint
/// expects.
fn grid_read_query(id: &str, view_ref: &str, template_ref: &str) -> String {
    let filter = format!(
        r#"{{"attributeType":"LookUp","mode":0,"value":[{{"operator":"IsContainedIn","value":"{id}"}}]}}"#
    );
    format!(
        "sort=&page=1&pageSize=1&group=&filter=ID~gt~'{filter}'\
         &viewId={view_ref}&myViewId=&templateId={template_ref}&workObjectId="
    )
}

/// Pull the JSON object embedded in the rendered task page.
fn extract_document(html: &str) -> Option<TaskDocument> {
    let pattern =
        Regex::new(r"kendo\.observable\(\{ *Item *: *(\{.*\})\}\);").expect("document pattern");
    let caps = pattern.captures(html)?;
    serde_json::from_str(caps.get(1)?.as_str()).ok()
}
