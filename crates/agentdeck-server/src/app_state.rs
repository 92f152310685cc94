// ABOUTME: Shared application state for the agentdeck HTTP server.
// ABOUTME: Holds the HITL controller and the loaded configuration for every handler.

use std::sync::Arc;

use agentdeck_agent::HitlController;

use crate::config::ServerConfig;

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub controller: HitlController,
    pub config: ServerConfig,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(controller: HitlController, config: ServerConfig) -> Self {
        Self { controller, config }
    }

    pub fn shared(controller: HitlController, config: ServerConfig) -> SharedState {
        Arc::new(Self::new(controller, config))
    }
}
