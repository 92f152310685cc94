// ABOUTME: Polling-mode handlers for flows: detached start, poll, step listing, and respond.
// ABOUTME: Runs started here keep going on a background task whether or not anyone polls.

use agentdeck_agent::{HitlError, StartRequest};
use agentdeck_core::{EntityKind, Run, StepRecord};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use ulid::Ulid;

use super::error::ApiError;
use super::{
    ChatRequest, RespondRequest, outcome_body, parse_kind, parse_run_id, require_message,
    run_view, step_view,
};
use crate::app_state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct PollParams {
    #[serde(default)]
    pub include_steps: bool,
}

fn require_flow(kind: &str) -> Result<(), ApiError> {
    match parse_kind(kind)? {
        EntityKind::Flow => Ok(()),
        other => Err(ApiError::not_found(format!(
            "run endpoints are only available for flows, not {other}"
        ))),
    }
}

/// Load a run and make sure it belongs to the flow in the path.
fn flow_run(
    state: &SharedState,
    flow_id: &str,
    run_id: Ulid,
    steps: bool,
) -> Result<(Run, Option<Vec<StepRecord>>), ApiError> {
    let view = state.controller.poll(run_id, steps)?;
    if view.run.entity_kind != EntityKind::Flow || view.run.entity_id != flow_id {
        return Err(HitlError::RunNotFound(run_id).into());
    }
    Ok((view.run, view.steps))
}

/// POST /entities/flow/{id}/run/async - Start a flow in the background.
pub async fn run_async(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<ChatRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_flow(&kind)?;
    require_message(&req.message)?;

    let request = StartRequest::new(EntityKind::Flow, &id, req.message)
        .with_session(req.session_id)
        .with_metadata(json!({ "mode": "polling" }));
    let run = state.controller.start_detached(request)?;
    tracing::info!(flow = %id, run_id = %run.run_id, "flow started in background");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run.run_id.to_string(), "status": run.status })),
    ))
}

/// GET /entities/flow/{id}/run/{run_id}?include_steps=bool
pub async fn poll_run(
    State(state): State<SharedState>,
    Path((kind, id, run_id)): Path<(String, String, String)>,
    Query(params): Query<PollParams>,
) -> Result<Json<Value>, ApiError> {
    require_flow(&kind)?;
    let run_id = parse_run_id(&run_id)?;
    let (run, steps) = flow_run(&state, &id, run_id, params.include_steps)?;
    Ok(Json(run_view(&run, steps.as_deref())))
}

/// GET /entities/flow/{id}/run/{run_id}/steps
pub async fn list_steps(
    State(state): State<SharedState>,
    Path((kind, id, run_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_flow(&kind)?;
    let run_id = parse_run_id(&run_id)?;
    let (_, steps) = flow_run(&state, &id, run_id, true)?;
    let steps: Vec<Value> = steps.unwrap_or_default().iter().map(step_view).collect();
    Ok(Json(Value::Array(steps)))
}

/// POST /entities/flow/{id}/run/respond - Resume a paused flow and drive it
/// to its next pause or its end.
pub async fn respond_run(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<Value>, ApiError> {
    require_flow(&kind)?;
    let run_id = parse_run_id(&req.workflow_id)?;
    tracing::info!(flow = %id, run_id = %run_id, "flow respond request");

    let outcome = state
        .controller
        .respond(Some((EntityKind::Flow, &id)), run_id, &req.response)?
        .finish_detached()
        .await?;
    Ok(Json(outcome_body(&outcome)?))
}
