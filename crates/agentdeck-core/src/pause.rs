// ABOUTME: The pause token handed to a client when a run suspends for human input.
// ABOUTME: The workflow_id is the run id the client passes back on respond.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Handshake value returned when a run pauses. The run registry remains the
/// source of truth; the client only holds this until it responds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseToken {
    pub workflow_id: Ulid,
    pub prompt: String,
    pub active_agent: Option<String>,
    pub session_id: Option<String>,
}
