// ABOUTME: Conversational handlers for agents, teams, and flows: sync chat, SSE chat, and respond.
// ABOUTME: Every start or resume goes through the HITL controller; this layer only shapes responses.

use agentdeck_agent::{HitlError, RunExecution, StartRequest};
use agentdeck_core::{EntityKind, RunStatus};
use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::{Value, json};
use ulid::Ulid;

use super::error::ApiError;
use super::stream::sse_response;
use super::{ChatRequest, RespondRequest, outcome_body, parse_kind, parse_run_id, require_message};
use crate::app_state::SharedState;

fn start(
    state: &SharedState,
    kind: EntityKind,
    id: &str,
    req: ChatRequest,
) -> Result<RunExecution, ApiError> {
    require_message(&req.message)?;
    let session_id = req.session_id.unwrap_or_else(|| Ulid::new().to_string());
    tracing::info!(kind = %kind, entity = %id, session = %session_id, "chat request");
    let request = StartRequest::new(kind, id, req.message).with_session(Some(session_id));
    Ok(state.controller.start(request)?)
}

fn resume(
    state: &SharedState,
    kind: EntityKind,
    id: &str,
    req: &RespondRequest,
) -> Result<RunExecution, ApiError> {
    let run_id = parse_run_id(&req.workflow_id)?;
    tracing::info!(kind = %kind, entity = %id, run_id = %run_id, "respond request");
    Ok(state.controller.respond(Some((kind, id)), run_id, &req.response)?)
}

/// POST /entities/{kind}/{id}/chat - Run to completion or pause and return JSON.
pub async fn chat(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let outcome = start(&state, kind, &id, req)?.finish_detached().await?;
    Ok(Json(outcome_body(&outcome)?))
}

/// POST /entities/{kind}/{id}/chat/stream - Stream the run as SSE frames.
pub async fn chat_stream(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let execution = start(&state, kind, &id, req)?;
    Ok(sse_response(execution, kind))
}

/// POST /entities/{kind}/{id}/chat/respond - Resume a paused run and return JSON.
pub async fn chat_respond(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let outcome = resume(&state, kind, &id, &req)?.finish_detached().await?;
    Ok(Json(outcome_body(&outcome)?))
}

/// POST /entities/{kind}/{id}/chat/stream/respond - Resume a paused run as SSE.
pub async fn stream_respond(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<RespondRequest>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let execution = resume(&state, kind, &id, &req)?;
    Ok(sse_response(execution, kind))
}

/// GET /entities/{kind}/{id}/chat/status/{workflow_id} - Pause status of a run.
pub async fn chat_status(
    State(state): State<SharedState>,
    Path((kind, id, workflow_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let run_id = parse_run_id(&workflow_id)?;
    let run = state.controller.poll(run_id, false)?.run;
    if run.entity_kind != kind || run.entity_id != id {
        return Err(HitlError::RunNotFound(run_id).into());
    }

    let mut body = json!({
        "workflow_id": workflow_id,
        "session_id": run.session_id,
    });
    match run.status {
        RunStatus::PausedForInput => {
            body["status"] = json!("pending_input");
            body["prompt"] = json!(run.pending_prompt);
            body["active_agent"] = json!(run.active_agent);
        }
        RunStatus::Completed => {
            body["status"] = json!("completed");
            body["result"] = run.result.unwrap_or(Value::Null);
        }
        RunStatus::Failed => {
            body["status"] = json!("failed");
            body["error"] = json!(run.error);
        }
        RunStatus::Pending | RunStatus::Running => body["status"] = json!("running"),
    }
    Ok(Json(body))
}
