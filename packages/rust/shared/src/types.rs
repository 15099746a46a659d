//! Core domain types: the entity record and the fetched task document.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Event, EventSink};

// ---------------------------------------------------------------------------
// TaskDocument
// ---------------------------------------------------------------------------

/// One `{Name, Value}` pair from the document's `Parameters` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParameter {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

/// The field/value container fetched for a task.
///
/// The remote shape is a flat JSON object whose `Parameters` key holds a
/// list of named parameters; every other top-level key lands in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default, rename = "Parameters")]
    pub parameters: Vec<TaskParameter>,

    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl TaskDocument {
    /// Look up a field: top-level key first, then the `Parameters` list by
    /// `Name`.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            self.parameters
                .iter()
                .find(|p| p.name == name)
                .map(|p| &p.value)
        })
    }

    /// Write a field: updates the top-level key if present, and every
    /// `Parameters` entry whose `Name` matches.
    ///
    /// Returns whether anything was written.
    pub fn assign(&mut self, name: &str, value: &Value) -> bool {
        let mut written = false;

        if let Some(slot) = self.fields.get_mut(name) {
            *slot = value.clone();
            written = true;
        }

        for param in self.parameters.iter_mut().filter(|p| p.name == name) {
            param.value = value.clone();
            written = true;
        }

        written
    }
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// The unit of state for one identifier.
///
/// The three `*_ref` fields are opaque identifiers, each populated by
/// exactly one stage and never cleared within a run. `document` and the
/// attached sinks are transient run state, stripped before persistence.
pub struct EntityRecord {
    pub id: String,
    pub template_ref: Option<String>,
    pub view_ref: Option<String>,
    pub task_ref: Option<String>,
    pub document: Option<TaskDocument>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EntityRecord {
    /// Fresh record with no resolved references.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template_ref: None,
            view_ref: None,
            task_ref: None,
            document: None,
            sinks: Vec::new(),
        }
    }

    /// Attach a sink for the current run.
    ///
    /// Attaching replaces any sink from a previous attach — last attach
    /// wins, even though the storage is list-shaped.
    pub fn attach_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.clear();
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver an event to every attached sink, then hand it back.
    pub fn emit(&self, event: Event) -> Event {
        for sink in &self.sinks {
            sink.handle(&event);
        }
        event
    }

    /// Strip run-specific state before the record goes into the snapshot.
    pub fn clear_transient(&mut self) {
        self.document = None;
        self.sinks.clear();
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("template_ref", &self.template_ref)
            .field("view_ref", &self.view_ref)
            .field("task_ref", &self.task_ref)
            .field("document", &self.document.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ResultRow
// ---------------------------------------------------------------------------

/// One row of the final result table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub esupid: String,
    pub date: DateTime<Utc>,
}
