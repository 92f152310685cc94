// ABOUTME: Session management handler: clears the stored conversation history for one entity.
// ABOUTME: Returns 404 when the session held nothing.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use super::error::ApiError;
use super::parse_kind;
use crate::app_state::SharedState;

/// DELETE /entities/{kind}/{id}/session/{session_id}
pub async fn clear_session(
    State(state): State<SharedState>,
    Path((kind, id, session_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    parse_kind(&kind)?;
    if !state.controller.clear_session(&id, &session_id)? {
        return Err(ApiError::not_found(format!(
            "session '{session_id}' not found for '{id}'"
        )));
    }
    Ok(Json(json!({ "status": "cleared", "session_id": session_id })))
}
