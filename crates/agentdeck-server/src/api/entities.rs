// ABOUTME: Entity listing handler for agents, teams, and flows.
// ABOUTME: Accepts singular or plural kind segments and returns descriptors sorted by id.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::Value;

use super::error::ApiError;
use super::parse_kind;
use crate::app_state::SharedState;

/// GET /entities/{kind} - List the registered entities of one kind.
pub async fn list_entities(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let entities = state.controller.list(kind);
    let body = serde_json::to_value(&entities).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(body))
}
