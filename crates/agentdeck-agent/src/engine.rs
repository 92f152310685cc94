// ABOUTME: The execution engine boundary: the Runnable trait and the event stream it produces.
// ABOUTME: Engines run as tasks feeding a bounded channel; a dropped consumer stops them at the next event.

use std::future::Future;
use std::pin::Pin;

use agentdeck_core::{EntityDescriptor, EntityKind, StepStatus};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::context::EngineContext;
use crate::memory::SessionMemory;

/// How many events an engine may run ahead of its consumer.
const EVENT_BUFFER: usize = 32;

/// Progress reported by an engine while it runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A different member agent now holds control.
    AgentChanged { agent_name: String },

    /// A fragment of the response text.
    Token { delta: String },

    /// A tool finished running.
    ToolCall {
        agent_name: String,
        tool_name: String,
        arguments: Value,
        output: Value,
        started_at: DateTime<Utc>,
    },

    /// A flow step began.
    StepStarted {
        step_name: String,
        details: String,
        started_at: DateTime<Utc>,
    },

    /// A flow step reached a terminal status.
    StepFinished {
        step_name: String,
        status: StepStatus,
        data: Value,
        started_at: DateTime<Utc>,
    },
}

/// A request for human input, carrying everything needed to resume later.
#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub prompt: String,
    pub active_agent: Option<String>,
    pub context: EngineContext,
}

/// One element of an engine's event sequence. The last element is always
/// `Completed` or `Suspended`, unless the engine reports an error instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineItem {
    Event(EngineEvent),
    Completed(Value),
    Suspended(Suspension),
}

/// How an engine body ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Value),
    Suspended(Suspension),
}

/// Errors an engine can report. The message becomes the run's error verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),

    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("cannot resume: {0}")]
    InvalidContext(String),

    #[error("event consumer went away")]
    Cancelled,
}

/// A lazy, finite, non-restartable sequence of engine items.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EngineItem, EngineError>> + Send>>;

/// Where an engine body writes its progress events.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Result<EngineItem, EngineError>>,
}

impl EventSink {
    /// Forward one event. Fails with `EngineError::Cancelled` once the
    /// consumer has dropped the stream, which ends the engine body via `?`.
    pub async fn emit(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.tx
            .send(Ok(EngineItem::Event(event)))
            .await
            .map_err(|_| EngineError::Cancelled)
    }

    /// Emit `text` as a series of token events, one word at a time.
    pub async fn stream_text(&self, text: &str) -> Result<(), EngineError> {
        for piece in text.split_inclusive(' ') {
            self.emit(EngineEvent::Token {
                delta: piece.to_string(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn agent_changed(&self, agent_name: &str) -> Result<(), EngineError> {
        self.emit(EngineEvent::AgentChanged {
            agent_name: agent_name.to_string(),
        })
        .await
    }
}

/// Run an engine body on its own task and expose its output as an
/// [`EventStream`]. The final item is derived from the body's result.
pub fn spawn_engine<F, Fut>(body: F) -> EventStream
where
    F: FnOnce(EventSink) -> Fut,
    Fut: Future<Output = Result<Outcome, EngineError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let fut = body(EventSink { tx: tx.clone() });

    tokio::spawn(async move {
        let last = match fut.await {
            Ok(Outcome::Completed(value)) => Ok(EngineItem::Completed(value)),
            Ok(Outcome::Suspended(suspension)) => Ok(EngineItem::Suspended(suspension)),
            Err(EngineError::Cancelled) => {
                tracing::debug!("engine stopped after consumer disconnected");
                return;
            }
            Err(e) => Err(e),
        };
        // A consumer that left before the last item needs nothing more.
        let _ = tx.send(last).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// A registered agent, team, or flow. Implementations are immutable and
/// shared across requests; per-run state lives only in the stream and in
/// the [`EngineContext`] handed back on suspension.
pub trait Runnable: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn id(&self) -> &str;

    fn describe(&self) -> EntityDescriptor;

    /// Begin a fresh execution.
    fn start(&self, input: String, memory: SessionMemory) -> EventStream;

    /// Continue a suspended execution with the human's answer.
    fn resume(&self, context: EngineContext, human_input: String, memory: SessionMemory)
    -> EventStream;
}
