// ABOUTME: API module containing the HTTP handlers and the JSON shapes they exchange.
// ABOUTME: Request bodies, path parsing, and run/step/outcome views shared by the handlers live here.

pub mod chat;
pub mod entities;
pub mod error;
pub mod flows;
pub mod sessions;
pub mod stream;

use agentdeck_agent::RunOutcome;
use agentdeck_core::{EntityKind, PauseToken, Run, StepRecord};
use serde::Deserialize;
use serde_json::{Value, json};
use ulid::Ulid;

use self::error::ApiError;

/// Body of chat and stream requests.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "topic", alias = "input")]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Body of every respond request.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub workflow_id: String,
    pub response: String,
}

pub(crate) fn parse_kind(raw: &str) -> Result<EntityKind, ApiError> {
    raw.parse::<EntityKind>()
        .map_err(|e| ApiError::not_found(e.to_string()))
}

pub(crate) fn parse_run_id(raw: &str) -> Result<Ulid, ApiError> {
    raw.parse::<Ulid>()
        .map_err(|_| ApiError::bad_request(format!("invalid run id: {raw}")))
}

pub(crate) fn require_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    Ok(())
}

/// Text of an agent result; teams carry it under `response`.
fn response_text(result: &Value) -> Value {
    match result {
        Value::String(_) => result.clone(),
        other => other.get("response").cloned().unwrap_or_else(|| other.clone()),
    }
}

/// Body returned when a run finishes, shaped by entity kind.
pub fn completed_body(run: &Run) -> Value {
    let result = run.result.clone().unwrap_or(Value::Null);
    let mut body = json!({
        "status": "completed",
        "session_id": run.session_id,
        "run_id": run.run_id.to_string(),
    });

    match run.entity_kind {
        EntityKind::Agent => {
            body["response"] = response_text(&result);
            body["agent_name"] = json!(run.entity_id);
        }
        EntityKind::Team => {
            body["response"] = response_text(&result);
            body["responding_agents"] = result
                .get("responding_agents")
                .cloned()
                .unwrap_or_else(|| json!([]));
        }
        EntityKind::Flow => body["result"] = result,
    }
    body
}

/// Body returned when a run pauses for input.
pub fn paused_body(token: &PauseToken) -> Value {
    let mut body = json!({
        "status": "pending_input",
        "workflow_id": token.workflow_id.to_string(),
        "prompt": token.prompt,
        "session_id": token.session_id,
    });
    if let Some(agent) = &token.active_agent {
        body["active_agent"] = json!(agent);
    }
    body
}

/// Response body for a driven run; a failed run becomes a server error.
pub fn outcome_body(outcome: &RunOutcome) -> Result<Value, ApiError> {
    match outcome {
        RunOutcome::Completed(run) => Ok(completed_body(run)),
        RunOutcome::Paused(_, token) => Ok(paused_body(token)),
        RunOutcome::Failed(run) => Err(ApiError::internal(
            run.error.clone().unwrap_or_else(|| "run failed".to_string()),
        )),
    }
}

pub fn step_view(step: &StepRecord) -> Value {
    json!({
        "id": step.step_id.to_string(),
        "step_name": step.step_name,
        "step_index": step.step_index,
        "status": step.status,
        "event_type": step.event_type,
        "event_data": step.event_data,
        "started_at": step.started_at,
        "completed_at": step.completed_at,
        "duration_ms": step.duration_ms,
    })
}

/// The polling view of a run.
pub fn run_view(run: &Run, steps: Option<&[StepRecord]>) -> Value {
    let mut body = json!({
        "run_id": run.run_id.to_string(),
        "flow_id": run.entity_id,
        "status": run.status,
        "input_data": run.input,
        "result": run.result,
        "error": run.error,
        "pending_prompt": run.pending_prompt,
        "started_at": run.created_at,
        "completed_at": run.completed_at,
        "metadata": run.metadata,
    });
    if let Some(steps) = steps {
        body["steps"] = steps.iter().map(step_view).collect();
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_core::{NewRun, RunUpdate};
    use chrono::Utc;

    fn completed(kind: EntityKind, id: &str, result: Value) -> Run {
        let new = NewRun::new(kind, id, json!("hi")).with_session(Some("s-1".to_string()));
        let mut run = Run::new(new);
        run.apply(RunUpdate::Running, Utc::now());
        run.apply(RunUpdate::Completed { result }, Utc::now());
        run
    }

    #[test]
    fn completed_bodies_follow_entity_kind() {
        let agent =
            completed_body(&completed(EntityKind::Agent, "math", json!("The answer is 5.")));
        assert_eq!(agent["response"], "The answer is 5.");
        assert_eq!(agent["agent_name"], "math");
        assert_eq!(agent["session_id"], "s-1");

        let team = completed_body(&completed(
            EntityKind::Team,
            "market_research_team",
            json!({"response": "done", "responding_agents": ["research"], "state": {}}),
        ));
        assert_eq!(team["response"], "done");
        assert_eq!(team["responding_agents"], json!(["research"]));

        let flow = completed_body(&completed(EntityKind::Flow, "story_flow", json!("# Article")));
        assert_eq!(flow["result"], "# Article");
        assert!(flow.get("response").is_none());
    }

    #[test]
    fn paused_body_omits_missing_agent() {
        let token = PauseToken {
            workflow_id: Ulid::new(),
            prompt: "Proceed? (yes/no)".to_string(),
            active_agent: None,
            session_id: None,
        };
        let body = paused_body(&token);
        assert_eq!(body["status"], "pending_input");
        assert!(body.get("active_agent").is_none());
    }
}
