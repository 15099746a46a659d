//! Stage events and the sinks that observe them.
//!
//! Every stage execution produces exactly one [`Event`], which is delivered
//! to the sinks attached to the owning record and also returned to the
//! pipeline runner as the stage result. Failure is an ordinary event with
//! `success: false`, never an `Err`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExtruderError;

// ---------------------------------------------------------------------------
// StageKind / StageCall
// ---------------------------------------------------------------------------

/// The named operations a record can go through.
///
/// `Pipeline` and `Batch` are synthetic kinds: `Pipeline` labels the
/// runner's own failure for an empty stage list, `Batch` labels the
/// end-of-batch notification the orchestrator sends to a caller-supplied
/// sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    #[serde(rename = "resolveTemplate")]
    ResolveTemplate,
    #[serde(rename = "findTask")]
    FindTask,
    #[serde(rename = "fetchDocument")]
    FetchDocument,
    #[serde(rename = "getValue")]
    GetValue,
    #[serde(rename = "setValue")]
    SetValue,
    #[serde(rename = "pipeline")]
    Pipeline,
    #[serde(rename = "batch")]
    Batch,
}

impl StageKind {
    /// The wire/display name of the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResolveTemplate => "resolveTemplate",
            Self::FindTask => "findTask",
            Self::FetchDocument => "fetchDocument",
            Self::GetValue => "getValue",
            Self::SetValue => "setValue",
            Self::Pipeline => "pipeline",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = ExtruderError;

    /// Parse a stage name as written in a stage-list template.
    /// Only the five real stages are nameable from the outside.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolveTemplate" => Ok(Self::ResolveTemplate),
            "findTask" => Ok(Self::FindTask),
            "fetchDocument" => Ok(Self::FetchDocument),
            "getValue" => Ok(Self::GetValue),
            "setValue" => Ok(Self::SetValue),
            other => Err(ExtruderError::UnknownStage(other.to_string())),
        }
    }
}

/// One stage invocation with its argument, as listed in a stage template.
///
/// Dispatch is closed over this enum — there is no runtime name lookup, so
/// an unknown stage cannot reach the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum StageCall {
    ResolveTemplate,
    FindTask { task_name: String },
    FetchDocument,
    GetValue { field: String },
    SetValue { field: String, value: serde_json::Value },
}

impl StageCall {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::ResolveTemplate => StageKind::ResolveTemplate,
            Self::FindTask { .. } => StageKind::FindTask,
            Self::FetchDocument => StageKind::FetchDocument,
            Self::GetValue { .. } => StageKind::GetValue,
            Self::SetValue { .. } => StageKind::SetValue,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// The outcome record of one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Which stage produced this event.
    pub stage: StageKind,
    /// Whether the stage reported success.
    pub success: bool,
    /// Identifier of the owning record.
    pub id: String,
    /// Stage-specific payload (`[id, value]` for a successful `getValue`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn success(stage: StageKind, id: impl Into<String>) -> Self {
        Self {
            stage,
            success: true,
            id: id.into(),
            payload: None,
        }
    }

    pub fn failure(stage: StageKind, id: impl Into<String>) -> Self {
        Self {
            stage,
            success: false,
            id: id.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// A subscriber that accepts stage events.
///
/// Delivery is synchronous and in stage order for any one record.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &Event);
}

/// Sink that prints every event to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn handle(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(_) => println!("{} {} ok={}", event.stage, event.id, event.success),
        }
    }
}

/// No-op sink for headless/test usage.
#[derive(Debug, Default)]
pub struct SilentSink;

impl EventSink for SilentSink {
    fn handle(&self, _event: &Event) {}
}
