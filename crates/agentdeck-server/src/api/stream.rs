// ABOUTME: SSE gateway that turns a run's event stream into named server-sent frames.
// ABOUTME: Ends every connection with [DONE], or [HITL_PAUSE] when the run waits for input.

use std::convert::Infallible;
use std::time::Instant;

use agentdeck_agent::{EngineEvent, RunEvent, RunExecution};
use agentdeck_core::{EntityKind, STREAM_FIELD_LIMIT, truncate_strings};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{Value, json};
use ulid::Ulid;

use super::{completed_body, paused_body};

pub const DONE: &str = "[DONE]";
pub const HITL_PAUSE: &str = "[HITL_PAUSE]";

/// One server-sent frame before it is encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl Frame {
    fn named(event: &'static str, data: &Value) -> Self {
        Self {
            event: Some(event),
            data: data.to_string(),
        }
    }

    fn text(event: &'static str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            data: data.into(),
        }
    }

    fn sentinel(data: &str) -> Self {
        Self {
            event: None,
            data: data.to_string(),
        }
    }

    fn into_sse(self) -> SseEvent {
        let event = match self.event {
            Some(name) => SseEvent::default().event(name),
            None => SseEvent::default(),
        };
        event.data(self.data)
    }
}

/// Per-connection bookkeeping for step numbering and timing.
struct Gateway {
    run_id: Ulid,
    kind: EntityKind,
    started: Instant,
    steps: u64,
}

impl Gateway {
    fn new(run_id: Ulid, kind: EntityKind) -> Self {
        Self {
            run_id,
            kind,
            started: Instant::now(),
            steps: 0,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn frames(&mut self, event: RunEvent) -> Vec<Frame> {
        match event {
            RunEvent::Started { run } => match run.entity_kind {
                EntityKind::Agent => vec![Frame::named(
                    "agent",
                    &json!({ "agent_name": run.entity_id }),
                )],
                _ => Vec::new(),
            },
            RunEvent::Engine { event, .. } => self.engine_frame(event).into_iter().collect(),
            RunEvent::Paused { token, .. } => vec![
                Frame::named("hitl", &paused_body(&token)),
                Frame::sentinel(HITL_PAUSE),
            ],
            RunEvent::Completed { run } => {
                let mut body = completed_body(&run);
                if self.kind == EntityKind::Flow {
                    body["_run_id"] = json!(self.run_id.to_string());
                    body["_total_steps"] = json!(self.steps);
                    body["_total_ms"] = json!(self.elapsed_ms());
                }
                vec![Frame::named("result", &body), Frame::sentinel(DONE)]
            }
            RunEvent::Failed { run_id, run, error } => {
                let message = run
                    .and_then(|r| r.error)
                    .unwrap_or_else(|| error.to_string());
                tracing::warn!(run_id = %run_id, error = %message, "streamed run failed");
                vec![
                    Frame::named(
                        "error",
                        &json!({ "error": message, "run_id": run_id.to_string() }),
                    ),
                    Frame::sentinel(DONE),
                ]
            }
        }
    }

    fn engine_frame(&mut self, event: EngineEvent) -> Option<Frame> {
        match event {
            EngineEvent::AgentChanged { agent_name } => Some(Frame::named(
                "agent",
                &json!({ "agent_name": agent_name }),
            )),
            EngineEvent::Token { delta } => Some(Frame::text("token", delta)),
            EngineEvent::ToolCall {
                agent_name,
                tool_name,
                arguments,
                output,
                ..
            } => Some(Frame::named(
                "tool_call",
                &truncate_strings(
                    &json!({
                        "agent_name": agent_name,
                        "tool_name": tool_name,
                        "arguments": arguments,
                        "output": output,
                    }),
                    STREAM_FIELD_LIMIT,
                ),
            )),
            step @ (EngineEvent::StepStarted { .. } | EngineEvent::StepFinished { .. }) => {
                let mut data = serde_json::to_value(&step).ok()?;
                data = truncate_strings(&data, STREAM_FIELD_LIMIT);
                self.steps += 1;
                data["_step"] = json!(self.steps);
                data["_run_id"] = json!(self.run_id.to_string());
                data["_elapsed_ms"] = json!(self.elapsed_ms());
                data["_timestamp"] = json!(Utc::now().to_rfc3339());
                Some(Frame::named("step", &data))
            }
        }
    }
}

/// Convert a run's events into frames, in order.
pub fn frame_stream(execution: RunExecution, kind: EntityKind) -> impl Stream<Item = Frame> {
    let mut gateway = Gateway::new(execution.run_id(), kind);
    execution
        .into_stream()
        .flat_map(move |event| stream::iter(gateway.frames(event)))
}

/// Serve a run as an SSE response. Dropping the connection drops the
/// execution, which stops the engine at its next event.
pub fn sse_response(execution: RunExecution, kind: EntityKind) -> Response {
    let events = frame_stream(execution, kind).map(|frame| Ok::<_, Infallible>(frame.into_sse()));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_agent::{HitlController, StartRequest};
    use agentdeck_agent::testing::{CONFIRM_PROMPT, ConfirmRunnable};
    use agentdeck_agent::{EntityRegistry, OfflineSearch};
    use agentdeck_store::{MemoryRunRegistry, MemorySessionStore};
    use std::sync::Arc;

    fn controller() -> HitlController {
        let builtin = EntityRegistry::builtin(Arc::new(OfflineSearch));
        let mut builder = EntityRegistry::builder().register(ConfirmRunnable::new("confirm"));
        for (kind, id) in [(EntityKind::Agent, "math"), (EntityKind::Flow, "story_flow")] {
            if let Some(runnable) = builtin.get(kind, id) {
                builder = builder.register_arc(runnable);
            }
        }
        HitlController::new(
            Arc::new(builder.build()),
            Arc::new(MemoryRunRegistry::new()),
            Arc::new(MemorySessionStore::new()),
        )
    }

    async fn collect(kind: EntityKind, id: &str, input: &str) -> Vec<Frame> {
        let execution = controller()
            .start(StartRequest::new(kind, id, input))
            .unwrap();
        frame_stream(execution, kind).collect().await
    }

    #[tokio::test]
    async fn agent_stream_ends_with_result_then_done() {
        let frames = collect(EntityKind::Agent, "math", "What is 2+3?").await;

        assert_eq!(frames[0].event, Some("agent"));
        assert!(frames.iter().any(|f| f.event == Some("tool_call")));
        assert!(frames.iter().any(|f| f.event == Some("token")));

        let n = frames.len();
        assert_eq!(frames[n - 2].event, Some("result"));
        let result: Value = serde_json::from_str(&frames[n - 2].data).unwrap();
        assert!(result["response"].as_str().unwrap().contains('5'));
        assert_eq!(frames[n - 1], Frame::sentinel(DONE));
    }

    #[tokio::test]
    async fn paused_stream_ends_with_hitl_sentinel() {
        let frames = collect(EntityKind::Agent, "confirm", "ship it").await;

        let n = frames.len();
        assert_eq!(frames[n - 2].event, Some("hitl"));
        let hitl: Value = serde_json::from_str(&frames[n - 2].data).unwrap();
        assert_eq!(hitl["prompt"], CONFIRM_PROMPT);
        assert!(hitl["workflow_id"].is_string());
        assert_eq!(frames[n - 1], Frame::sentinel(HITL_PAUSE));
        assert!(!frames.iter().any(|f| f.data == DONE));
    }

    #[tokio::test]
    async fn flow_stream_numbers_steps_and_totals_them() {
        let frames = collect(EntityKind::Flow, "story_flow", "rust").await;

        let steps: Vec<Value> = frames
            .iter()
            .filter(|f| f.event == Some("step"))
            .map(|f| serde_json::from_str(&f.data).unwrap())
            .collect();
        assert!(!steps.is_empty());
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step["_step"], json!(i as u64 + 1));
            assert!(step["_run_id"].is_string());
            assert!(step["_timestamp"].is_string());
        }

        let result = frames
            .iter()
            .find(|f| f.event == Some("result"))
            .map(|f| serde_json::from_str::<Value>(&f.data).unwrap())
            .unwrap();
        assert_eq!(result["_total_steps"], json!(steps.len() as u64));
        assert!(result["result"].is_string());
        assert_eq!(frames.last().unwrap().data, DONE);
    }
}
