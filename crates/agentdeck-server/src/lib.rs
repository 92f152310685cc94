// ABOUTME: HTTP server for agentdeck: entity listing, chat, SSE streaming, and flow polling.
// ABOUTME: Uses Axum with the HITL controller as shared state.

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod routes;

pub use app_state::{AppState, SharedState};
pub use config::{ConfigError, ServerConfig};
pub use routes::create_router;
