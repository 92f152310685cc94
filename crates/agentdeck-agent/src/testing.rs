// ABOUTME: Deterministic engines for tests: ConfirmRunnable pauses once for a yes/no answer.
// ABOUTME: Used by controller, server, and end-to-end tests that need a predictable pause.

use agentdeck_core::{EntityDescriptor, EntityKind};
use serde_json::json;

use crate::context::EngineContext;
use crate::engine::{
    EngineError, EngineEvent, EventStream, Outcome, Runnable, Suspension, spawn_engine,
};
use crate::memory::SessionMemory;
use crate::tools::is_confirmation;

pub const CONFIRM_PROMPT: &str = "Proceed? (yes/no)";

/// An agent that always asks for confirmation before completing.
pub struct ConfirmRunnable {
    id: String,
}

impl ConfirmRunnable {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Runnable for ConfirmRunnable {
    fn kind(&self) -> EntityKind {
        EntityKind::Agent
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> EntityDescriptor {
        EntityDescriptor::new(EntityKind::Agent, &self.id, "Asks for confirmation once")
    }

    fn start(&self, input: String, _memory: SessionMemory) -> EventStream {
        let id = self.id.clone();
        spawn_engine(move |sink| async move {
            sink.emit(EngineEvent::Token {
                delta: "Checking... ".to_string(),
            })
            .await?;
            Ok(Outcome::Suspended(Suspension {
                prompt: CONFIRM_PROMPT.to_string(),
                active_agent: Some(id.clone()),
                context: EngineContext::Generic {
                    entity_id: id,
                    state: json!({ "input": input }),
                },
            }))
        })
    }

    fn resume(
        &self,
        context: EngineContext,
        human_input: String,
        _memory: SessionMemory,
    ) -> EventStream {
        let id = self.id.clone();
        spawn_engine(move |sink| async move {
            let EngineContext::Generic { entity_id, state } = context else {
                return Err(EngineError::InvalidContext("expected a generic context".to_string()));
            };
            if entity_id != id {
                return Err(EngineError::InvalidContext(format!(
                    "context belongs to {entity_id}"
                )));
            }

            let input = state["input"].as_str().unwrap_or_default();
            let reply = if is_confirmation(&human_input) {
                format!("Confirmed: {input}")
            } else {
                format!("Cancelled: {input}")
            };
            sink.stream_text(&reply).await?;
            Ok(Outcome::Completed(json!(reply)))
        })
    }
}
