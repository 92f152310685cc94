// ABOUTME: The HITL controller: drives runs from start to pause or completion and back again on respond.
// ABOUTME: Every status change is a compare-and-swap in the run registry; engine events become step records.

use std::pin::Pin;
use std::sync::Arc;

use agentdeck_core::{
    EntityDescriptor, EntityKind, MessageRole, NewRun, NewStep, PauseToken, Run, RunStatus,
    RunUpdate, STORED_FIELD_LIMIT, SessionKey, SessionMessage, StepRecord, StepStatus, capture,
    restore, truncate_strings,
};
use agentdeck_store::{RunRegistry, SessionStore, StoreError};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use ulid::Ulid;

use crate::context::EngineContext;
use crate::engine::{EngineEvent, EngineItem, EventStream, Runnable, Suspension};
use crate::memory::SessionMemory;
use crate::registry::EntityRegistry;

/// Default approximate token budget of history handed to an engine.
pub const DEFAULT_MEMORY_TOKEN_LIMIT: usize = 40_000;

/// Failures of controller operations.
#[derive(Debug, Error)]
pub enum HitlError {
    #[error("{kind} '{id}' not found")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("run not found: {0}")]
    RunNotFound(Ulid),

    #[error("run {run_id} is {status} and not waiting for input")]
    RunNotPending { run_id: Ulid, status: RunStatus },

    #[error("run {0} was already resumed by another request")]
    AlreadyResumed(Ulid),

    #[error("run {run_id} belongs to {actual}, not {expected}")]
    EntityMismatch {
        run_id: Ulid,
        expected: String,
        actual: String,
    },

    #[error("execution context cannot be captured: {0}")]
    UnserializableState(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{0}")]
    Engine(String),
}

impl From<StoreError> for HitlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(run_id) => HitlError::RunNotFound(run_id),
            StoreError::Conflict { run_id, actual, .. } => HitlError::RunNotPending {
                run_id,
                status: actual,
            },
            StoreError::InvalidRun { run_id, status } => {
                HitlError::RunNotPending { run_id, status }
            }
            StoreError::InvalidTransition { .. } => HitlError::Engine(err.to_string()),
            StoreError::Unavailable(_) | StoreError::Poisoned | StoreError::Corrupt(_) => {
                HitlError::StorageUnavailable(err.to_string())
            }
        }
    }
}

/// What a caller asks the controller to run.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub kind: EntityKind,
    pub entity_id: String,
    pub input: String,
    pub session_id: Option<String>,
    pub metadata: Value,
}

impl StartRequest {
    pub fn new(kind: EntityKind, entity_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            input: input.into(),
            session_id: None,
            metadata: json!({}),
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Progress of one start or respond call, in the order it happened.
#[derive(Debug)]
pub enum RunEvent {
    /// The run is now `running`.
    Started { run: Run },

    /// An engine event, with the step record it produced if any.
    Engine {
        event: EngineEvent,
        step: Option<StepRecord>,
    },

    Paused { run: Run, token: PauseToken },

    Completed { run: Run },

    /// `run` is the failed run, or None when storage could not record the failure.
    Failed {
        run_id: Ulid,
        run: Option<Run>,
        error: HitlError,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Paused { .. } | RunEvent::Completed { .. } | RunEvent::Failed { .. }
        )
    }
}

/// Where a driven run ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Run),
    Paused(Run, PauseToken),
    Failed(Run),
}

impl RunOutcome {
    pub fn run(&self) -> &Run {
        match self {
            RunOutcome::Completed(run)
            | RunOutcome::Paused(run, _)
            | RunOutcome::Failed(run) => run,
        }
    }
}

/// A run record, optionally with its step log.
#[derive(Debug, Clone, PartialEq)]
pub struct RunView {
    pub run: Run,
    pub steps: Option<Vec<StepRecord>>,
}

pub type RunEventStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// A started or resumed run whose engine events have not been consumed yet.
/// Dropping it stops the engine at its next event; the run keeps whatever
/// the registry recorded so far.
pub struct RunExecution {
    run_id: Ulid,
    events: RunEventStream,
}

impl RunExecution {
    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    pub fn into_stream(self) -> RunEventStream {
        self.events
    }

    /// Drive the run to its pause or terminal state.
    pub async fn finish(mut self) -> Result<RunOutcome, HitlError> {
        while let Some(event) = self.events.next().await {
            match event {
                RunEvent::Completed { run } => return Ok(RunOutcome::Completed(run)),
                RunEvent::Paused { run, token } => return Ok(RunOutcome::Paused(run, token)),
                RunEvent::Failed { run: Some(run), .. } => return Ok(RunOutcome::Failed(run)),
                RunEvent::Failed { error, .. } => return Err(error),
                RunEvent::Started { .. } | RunEvent::Engine { .. } => {}
            }
        }
        Err(HitlError::Engine(format!(
            "run {} ended without an outcome",
            self.run_id
        )))
    }

    /// Drive the run on its own task and wait for the outcome. The task is
    /// spawned before this returns, so dropping the returned future only
    /// loses the outcome; the run still settles in the registry.
    pub fn finish_detached(self) -> impl Future<Output = Result<RunOutcome, HitlError>> + Send {
        let run_id = self.run_id;
        let task = tokio::spawn(self.finish());
        async move {
            task.await
                .map_err(|e| HitlError::Engine(format!("run {run_id} task failed: {e}")))?
        }
    }
}

/// Drives runs through the pause/resume state machine.
#[derive(Clone)]
pub struct HitlController {
    registry: Arc<EntityRegistry>,
    runs: Arc<dyn RunRegistry>,
    sessions: Arc<dyn SessionStore>,
    memory_token_limit: usize,
}

impl HitlController {
    pub fn new(
        registry: Arc<EntityRegistry>,
        runs: Arc<dyn RunRegistry>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            registry,
            runs,
            sessions,
            memory_token_limit: DEFAULT_MEMORY_TOKEN_LIMIT,
        }
    }

    pub fn with_memory_token_limit(mut self, limit: usize) -> Self {
        self.memory_token_limit = limit;
        self
    }

    pub fn list(&self, kind: EntityKind) -> Vec<EntityDescriptor> {
        self.registry.list(kind)
    }

    fn runnable(&self, kind: EntityKind, id: &str) -> Result<Arc<dyn Runnable>, HitlError> {
        self.registry
            .get(kind, id)
            .ok_or_else(|| HitlError::EntityNotFound {
                kind,
                id: id.to_string(),
            })
    }

    /// Create a pending run without starting it.
    pub fn prepare(&self, request: StartRequest) -> Result<(Arc<dyn Runnable>, Run), HitlError> {
        let runnable = self.runnable(request.kind, &request.entity_id)?;
        let run = self.runs.create_run(
            NewRun::new(request.kind, request.entity_id, Value::String(request.input))
                .with_session(request.session_id)
                .with_metadata(request.metadata),
        )?;
        tracing::info!(
            run_id = %run.run_id,
            entity = %run.entity_id,
            kind = %run.entity_kind,
            "run created"
        );
        Ok((runnable, run))
    }

    /// Move a pending run to running and start its engine.
    pub fn launch(&self, runnable: Arc<dyn Runnable>, run: Run) -> Result<RunExecution, HitlError> {
        let input = run.input.as_str().unwrap_or_default().to_string();
        let run = self
            .runs
            .transition(run.run_id, RunStatus::Pending, RunUpdate::Running)?;
        tracing::info!(run_id = %run.run_id, "run started");

        let memory = match self.remember(&run, &input) {
            Ok(memory) => memory,
            Err(err) => {
                self.fail_quietly(run.run_id, &err);
                return Err(err);
            }
        };

        let engine = runnable.start(input, memory);
        Ok(self.execute(run, engine))
    }

    /// Create and start a run; the caller consumes its events.
    pub fn start(&self, request: StartRequest) -> Result<RunExecution, HitlError> {
        let (runnable, run) = self.prepare(request)?;
        self.launch(runnable, run)
    }

    /// Create a run and drive it on a background task not tied to the
    /// caller. Returns the pending run immediately.
    pub fn start_detached(&self, request: StartRequest) -> Result<Run, HitlError> {
        let (runnable, run) = self.prepare(request)?;
        let controller = self.clone();
        let pending = run.clone();

        tokio::spawn(async move {
            let run_id = run.run_id;
            let outcome = match controller.launch(runnable, run) {
                Ok(execution) => execution.finish().await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(outcome) => {
                    tracing::info!(
                        run_id = %run_id,
                        status = %outcome.run().status,
                        "detached run settled"
                    )
                }
                Err(err) => tracing::error!(run_id = %run_id, error = %err, "detached run failed"),
            }
        });

        Ok(pending)
    }

    /// Resume a paused run with a human answer. `target` is the entity the
    /// caller addressed; a run belonging to another entity is rejected.
    pub fn respond(
        &self,
        target: Option<(EntityKind, &str)>,
        run_id: Ulid,
        human_input: &str,
    ) -> Result<RunExecution, HitlError> {
        let run = self.runs.get_run(run_id)?;

        if let Some((kind, id)) = target {
            if run.entity_kind != kind || run.entity_id != id {
                tracing::warn!(
                    run_id = %run_id,
                    expected = %id,
                    actual = %run.entity_id,
                    "respond to wrong entity"
                );
                return Err(HitlError::EntityMismatch {
                    run_id,
                    expected: format!("{kind}/{id}"),
                    actual: format!("{}/{}", run.entity_kind, run.entity_id),
                });
            }
        }

        if run.status != RunStatus::PausedForInput {
            tracing::warn!(
                run_id = %run_id,
                status = %run.status,
                "respond to run that is not paused"
            );
            return Err(self.not_pending(&run)?);
        }

        let runnable = self.runnable(run.entity_kind, &run.entity_id)?;
        let context: EngineContext = match restore(&run.snapshot) {
            Ok(context) => context,
            Err(err) => {
                let message = err.to_string();
                tracing::error!(run_id = %run_id, error = %message, "snapshot cannot be restored");
                if let Err(store_err) = self.runs.transition(
                    run_id,
                    RunStatus::PausedForInput,
                    RunUpdate::Failed {
                        error: message.clone(),
                    },
                ) {
                    tracing::error!(
                        run_id = %run_id,
                        error = %store_err,
                        "could not record failure"
                    );
                }
                return Err(HitlError::UnserializableState(message));
            }
        };

        let resumed = match self
            .runs
            .transition(run_id, RunStatus::PausedForInput, RunUpdate::Running)
        {
            Ok(run) => run,
            Err(StoreError::Conflict { actual, .. }) => {
                tracing::warn!(run_id = %run_id, status = %actual, "lost resume race");
                return Err(HitlError::AlreadyResumed(run_id));
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(run_id = %run_id, entity = %resumed.entity_id, "run resumed");

        let recorded = self
            .runs
            .append_step(
                run_id,
                NewStep::finished(
                    "hitl_response",
                    StepStatus::Completed,
                    "hitl_response",
                    json!({ "prompt": run.pending_prompt, "response": human_input }),
                    Utc::now(),
                ),
            )
            .map_err(HitlError::from)
            .and_then(|_| self.remember(&resumed, human_input));
        let memory = match recorded {
            Ok(memory) => memory,
            Err(err) => {
                self.fail_quietly(run_id, &err);
                return Err(err);
            }
        };

        let engine = runnable.resume(context, human_input.to_string(), memory);
        Ok(self.execute(resumed, engine))
    }

    /// Classify a respond against a run that is not paused. A running run
    /// that has paused before was resumed by someone else.
    fn not_pending(&self, run: &Run) -> Result<HitlError, HitlError> {
        if run.status == RunStatus::Running {
            let steps = self.runs.list_steps(run.run_id)?;
            let was_paused = steps
                .iter()
                .any(|s| s.event_type.as_deref() == Some("hitl_request"));
            if was_paused {
                return Ok(HitlError::AlreadyResumed(run.run_id));
            }
        }
        Ok(HitlError::RunNotPending {
            run_id: run.run_id,
            status: run.status,
        })
    }

    /// Current state of a run. Has no side effects.
    pub fn poll(&self, run_id: Ulid, include_steps: bool) -> Result<RunView, HitlError> {
        let run = self.runs.get_run(run_id)?;
        let steps = if include_steps {
            Some(self.runs.list_steps(run_id)?)
        } else {
            None
        };
        Ok(RunView { run, steps })
    }

    pub fn steps(&self, run_id: Ulid) -> Result<Vec<StepRecord>, HitlError> {
        self.runs.get_run(run_id)?;
        Ok(self.runs.list_steps(run_id)?)
    }

    /// Remove a session's history. Returns false if nothing was stored.
    pub fn clear_session(&self, entity_id: &str, session_id: &str) -> Result<bool, HitlError> {
        let cleared = self
            .sessions
            .clear(&SessionKey::new(entity_id, session_id))?;
        tracing::info!(entity = %entity_id, session = %session_id, cleared, "session cleared");
        Ok(cleared)
    }

    /// Append the user's message to the run's session and load its history.
    fn remember(&self, run: &Run, message: &str) -> Result<SessionMemory, HitlError> {
        let Some(session_id) = &run.session_id else {
            return Ok(SessionMemory::empty());
        };
        let key = SessionKey::new(run.entity_id.clone(), session_id.clone());
        self.sessions
            .append(&key, SessionMessage::new(MessageRole::User, message))?;
        Ok(SessionMemory::load(
            self.sessions.as_ref(),
            &key,
            self.memory_token_limit,
        )?)
    }

    /// Best-effort move of a running run to failed after a setup error.
    fn fail_quietly(&self, run_id: Ulid, err: &HitlError) {
        let update = RunUpdate::Failed {
            error: err.to_string(),
        };
        if let Err(store_err) = self.runs.transition(run_id, RunStatus::Running, update) {
            tracing::error!(run_id = %run_id, error = %store_err, "could not record failure");
        }
    }

    fn execute(&self, run: Run, engine: EventStream) -> RunExecution {
        let run_id = run.run_id;
        let driver = Driver {
            controller: self.clone(),
            started: Some(run.clone()),
            run,
            engine,
        };

        let events = futures::stream::unfold(Some(driver), |state| async move {
            let Some(mut driver) = state else {
                return None;
            };
            let event = driver.next_event().await;
            let next = if event.is_terminal() { None } else { Some(driver) };
            Some((event, next))
        });

        RunExecution {
            run_id,
            events: Box::pin(events),
        }
    }
}

/// Consumes one engine stream and mirrors it into the registry.
struct Driver {
    controller: HitlController,
    started: Option<Run>,
    run: Run,
    engine: EventStream,
}

impl Driver {
    async fn next_event(&mut self) -> RunEvent {
        if let Some(run) = self.started.take() {
            return RunEvent::Started { run };
        }

        match self.engine.next().await {
            Some(Ok(EngineItem::Event(event))) => match self.record(&event) {
                Ok(step) => RunEvent::Engine { event, step },
                Err(err) => {
                    tracing::error!(
                        run_id = %self.run.run_id,
                        error = %err,
                        "could not record step"
                    );
                    RunEvent::Failed {
                        run_id: self.run.run_id,
                        run: None,
                        error: err.into(),
                    }
                }
            },
            Some(Ok(EngineItem::Completed(result))) => self.complete(result),
            Some(Ok(EngineItem::Suspended(suspension))) => self.suspend(suspension),
            Some(Err(err)) => self.fail(HitlError::Engine(err.to_string())),
            None => self.fail(HitlError::Engine(
                "engine ended without a result".to_string(),
            )),
        }
    }

    fn runs(&self) -> &dyn RunRegistry {
        self.controller.runs.as_ref()
    }

    /// Persist the step record an engine event implies, if any.
    fn record(&self, event: &EngineEvent) -> Result<Option<StepRecord>, StoreError> {
        let step = match event {
            EngineEvent::ToolCall {
                agent_name,
                tool_name,
                arguments,
                output,
                started_at,
            } => NewStep::finished(
                tool_name.clone(),
                StepStatus::Completed,
                "tool_call",
                truncate_strings(
                    &json!({ "agent_name": agent_name, "arguments": arguments, "output": output }),
                    STORED_FIELD_LIMIT,
                ),
                *started_at,
            ),
            EngineEvent::StepFinished {
                step_name,
                status,
                data,
                started_at,
            } => NewStep::finished(
                step_name.clone(),
                *status,
                "step_complete",
                truncate_strings(data, STORED_FIELD_LIMIT),
                *started_at,
            ),
            EngineEvent::AgentChanged { .. }
            | EngineEvent::Token { .. }
            | EngineEvent::StepStarted { .. } => return Ok(None),
        };

        let record = self.runs().append_step(self.run.run_id, step)?;
        tracing::debug!(
            run_id = %self.run.run_id,
            step_index = record.step_index,
            step = %record.step_name,
            "step recorded"
        );
        Ok(Some(record))
    }

    fn complete(&mut self, result: Value) -> RunEvent {
        let reply = reply_text(&result);
        match self.runs().transition(
            self.run.run_id,
            RunStatus::Running,
            RunUpdate::Completed { result },
        ) {
            Ok(run) => {
                tracing::info!(run_id = %run.run_id, "run completed");
                if let Some(session_id) = &run.session_id {
                    let key = SessionKey::new(run.entity_id.clone(), session_id.clone());
                    let message = SessionMessage::new(MessageRole::Assistant, reply);
                    if let Err(err) = self.controller.sessions.append(&key, message) {
                        tracing::error!(
                            run_id = %run.run_id,
                            error = %err,
                            "could not store reply in session"
                        );
                    }
                }
                self.run = run.clone();
                RunEvent::Completed { run }
            }
            Err(err) => self.storage_failure(err),
        }
    }

    fn suspend(&mut self, suspension: Suspension) -> RunEvent {
        let Suspension {
            prompt,
            active_agent,
            context,
        } = suspension;

        let snapshot = match capture(&context) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(
                    run_id = %self.run.run_id,
                    error = %err,
                    "engine context not capturable"
                );
                return self.fail(HitlError::UnserializableState(err.to_string()));
            }
        };

        let request = NewStep::finished(
            "hitl_request",
            StepStatus::Completed,
            "hitl_request",
            json!({ "prompt": prompt, "active_agent": active_agent, "context": context.label() }),
            Utc::now(),
        );
        if let Err(err) = self.runs().append_step(self.run.run_id, request) {
            return self.storage_failure(err);
        }

        match self.runs().transition(
            self.run.run_id,
            RunStatus::Running,
            RunUpdate::Paused {
                snapshot,
                prompt,
                active_agent,
            },
        ) {
            Ok(run) => {
                tracing::info!(
                    run_id = %run.run_id,
                    prompt = ?run.pending_prompt,
                    "run paused for input"
                );
                self.run = run.clone();
                match run.pause_token() {
                    Some(token) => RunEvent::Paused { run, token },
                    None => RunEvent::Failed {
                        run_id: run.run_id,
                        run: Some(run),
                        error: HitlError::Engine("paused run has no pause token".to_string()),
                    },
                }
            }
            Err(err) => self.storage_failure(err),
        }
    }

    /// Record an engine or capture failure on the run.
    fn fail(&mut self, error: HitlError) -> RunEvent {
        let update = RunUpdate::Failed {
            error: error.to_string(),
        };
        match self
            .runs()
            .transition(self.run.run_id, RunStatus::Running, update)
        {
            Ok(run) => {
                tracing::info!(run_id = %run.run_id, error = %error, "run failed");
                self.run = run.clone();
                RunEvent::Failed {
                    run_id: run.run_id,
                    run: Some(run),
                    error,
                }
            }
            Err(err) => self.storage_failure(err),
        }
    }

    fn storage_failure(&self, err: StoreError) -> RunEvent {
        tracing::error!(run_id = %self.run.run_id, error = %err, "run state not recorded");
        RunEvent::Failed {
            run_id: self.run.run_id,
            run: None,
            error: err.into(),
        }
    }
}

/// Text of a result as it is stored in session history.
fn reply_text(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other
            .get("response")
            .or_else(|| other.get("article"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
