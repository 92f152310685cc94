// ABOUTME: Route definitions for the agentdeck HTTP API.
// ABOUTME: Assembles every handler into one Axum Router with auth, tracing, and CORS layers.

use axum::Router;
use axum::extract::State;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::SharedState;
use crate::auth::AuthLayer;

/// Build the complete Axum router with all routes and shared state.
pub fn create_router(state: SharedState) -> Router {
    let auth_token = state.config.auth_token.clone();

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/entities/{kind}", get(api::entities::list_entities))
        .route("/entities/{kind}/{id}/chat", post(api::chat::chat))
        .route("/entities/{kind}/{id}/chat/respond", post(api::chat::chat_respond))
        .route("/entities/{kind}/{id}/chat/stream", post(api::chat::chat_stream))
        .route(
            "/entities/{kind}/{id}/chat/stream/respond",
            post(api::chat::stream_respond),
        )
        .route(
            "/entities/{kind}/{id}/chat/status/{workflow_id}",
            get(api::chat::chat_status),
        )
        .route("/entities/{kind}/{id}/run/async", post(api::flows::run_async))
        .route("/entities/{kind}/{id}/run/respond", post(api::flows::respond_run))
        .route("/entities/{kind}/{id}/run/{run_id}", get(api::flows::poll_run))
        .route(
            "/entities/{kind}/{id}/run/{run_id}/steps",
            get(api::flows::list_steps),
        )
        .route(
            "/entities/{kind}/{id}/session/{session_id}",
            delete(api::sessions::clear_session),
        )
        .with_state(state);

    if let Some(token) = auth_token {
        router = router.layer(AuthLayer::new(token));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check handler. Reports the configured model label.
async fn health(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "model": state.config.default_model,
    }))
}
