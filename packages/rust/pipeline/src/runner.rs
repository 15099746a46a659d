//! Sequential stage execution against one record.

use extruder_shared::{EntityRecord, Event, StageCall, StageKind};

use crate::client::RemoteClient;
use crate::stages;

/// Run an ordered stage list against one record.
///
/// Stages run strictly in order; stage *n+1* never starts before stage
/// *n*'s event has been delivered to the record's sinks. The first failure
/// event stops the run and becomes the terminal event — no cleanup, no
/// rollback. When every stage succeeds the final stage's event is returned.
/// An empty stage list is itself a failure.
pub async fn run_pipeline(
    record: &mut EntityRecord,
    client: &RemoteClient,
    calls: &[StageCall],
) -> Event {
    if calls.is_empty() {
        return record.emit(Event::failure(StageKind::Pipeline, record.id.clone()));
    }

    let mut last = Event::failure(StageKind::Pipeline, record.id.clone());

    for call in calls {
        let event = match call {
            StageCall::ResolveTemplate => stages::resolve_template(record, client).await,
            StageCall::FindTask { task_name } => {
                stages::find_task(record, client, task_name).await
            }
            StageCall::FetchDocument => stages::fetch_document(record, client).await,
            StageCall::GetValue { field } => stages::get_value(record, field),
            StageCall::SetValue { field, value } => stages::set_value(record, field, value),
        };

        if !event.success {
            return event;
        }
        last = event;
    }

    last
}
