// ABOUTME: The Run record and its status state machine for one agent, team, or flow execution.
// ABOUTME: RunUpdate values carry exactly the fields each target status owns, keeping rows consistent.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::entity::EntityKind;
use crate::pause::PauseToken;
use crate::snapshot::Snapshot;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    PausedForInput,
    Completed,
    Failed,
}

impl RunStatus {
    /// Return the snake_case label stored in the registry and sent to clients.
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::PausedForInput => "paused_for_input",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Completed and failed runs accept no further operations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, PausedForInput)
                | (Running, Completed)
                | (Running, Failed)
                | (PausedForInput, Running)
                | (PausedForInput, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "paused_for_input" => Ok(RunStatus::PausedForInput),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Parameters for registering a new run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub session_id: Option<String>,
    pub input: Value,
    pub metadata: Value,
}

impl NewRun {
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>, input: Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_kind,
            session_id: None,
            input,
            metadata: Value::Null,
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

/// The field changes that accompany a status transition. Each variant names
/// its target status and sets every status-dependent field, so a paused run
/// can never carry a result and a completed run never keeps a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum RunUpdate {
    Running,
    Paused {
        snapshot: Snapshot,
        prompt: String,
        active_agent: Option<String>,
    },
    Completed {
        result: Value,
    },
    Failed {
        error: String,
    },
}

impl RunUpdate {
    /// The status a run holds after this update is applied.
    pub fn target_status(&self) -> RunStatus {
        match self {
            RunUpdate::Running => RunStatus::Running,
            RunUpdate::Paused { .. } => RunStatus::PausedForInput,
            RunUpdate::Completed { .. } => RunStatus::Completed,
            RunUpdate::Failed { .. } => RunStatus::Failed,
        }
    }

    /// Expand into the full set of status-dependent columns.
    pub fn into_fields(self, now: DateTime<Utc>) -> RunFields {
        let mut fields = RunFields {
            status: self.target_status(),
            snapshot: Snapshot::None,
            pending_prompt: None,
            active_agent: None,
            result: None,
            error: None,
            completed_at: None,
        };

        match self {
            RunUpdate::Running => {}
            RunUpdate::Paused {
                snapshot,
                prompt,
                active_agent,
            } => {
                fields.snapshot = snapshot;
                fields.pending_prompt = Some(prompt);
                fields.active_agent = active_agent;
            }
            RunUpdate::Completed { result } => {
                fields.result = Some(result);
                fields.completed_at = Some(now);
            }
            RunUpdate::Failed { error } => {
                fields.error = Some(error);
                fields.completed_at = Some(now);
            }
        }
        fields
    }
}

/// Every run column whose value depends on status.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFields {
    pub status: RunStatus,
    pub snapshot: Snapshot,
    pub pending_prompt: Option<String>,
    pub active_agent: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One execution attempt of an agent, team, or flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Ulid,
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub session_id: Option<String>,
    pub status: RunStatus,
    pub input: Value,
    pub snapshot: Snapshot,
    pub pending_prompt: Option<String>,
    pub active_agent: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a pending run with a fresh id.
    pub fn new(new: NewRun) -> Self {
        let now = Utc::now();
        Self {
            run_id: Ulid::new(),
            entity_id: new.entity_id,
            entity_kind: new.entity_kind,
            session_id: new.session_id,
            status: RunStatus::Pending,
            input: new.input,
            snapshot: Snapshot::None,
            pending_prompt: None,
            active_agent: None,
            result: None,
            error: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply an update's fields and status. Callers check the transition
    /// edge and the expected status before calling this.
    pub fn apply(&mut self, update: RunUpdate, now: DateTime<Utc>) {
        let fields = update.into_fields(now);
        self.status = fields.status;
        self.snapshot = fields.snapshot;
        self.pending_prompt = fields.pending_prompt;
        self.active_agent = fields.active_agent;
        self.result = fields.result;
        self.error = fields.error;
        self.completed_at = fields.completed_at;
        self.updated_at = now;
    }

    /// The handshake token for a paused run, or None if the run is not paused.
    pub fn pause_token(&self) -> Option<PauseToken> {
        if self.status != RunStatus::PausedForInput {
            return None;
        }
        Some(PauseToken {
            workflow_id: self.run_id,
            prompt: self.pending_prompt.clone().unwrap_or_default(),
            active_agent: self.active_agent.clone(),
            session_id: self.session_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::capture;
    use serde_json::json;

    fn pending_run() -> Run {
        Run::new(NewRun::new(EntityKind::Agent, "math", json!("What is 2+3?")))
    }

    #[test]
    fn new_run_is_pending_and_empty() {
        let run = pending_run();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.snapshot, Snapshot::None);
        assert!(run.result.is_none());
        assert!(run.error.is_none());
        assert!(run.pause_token().is_none());
    }

    #[test]
    fn transition_edges_match_state_machine() {
        use RunStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(PausedForInput));
        assert!(PausedForInput.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!PausedForInput.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn paused_then_completed_clears_snapshot() {
        let mut run = pending_run();
        run.apply(RunUpdate::Running, Utc::now());

        let snapshot = capture(&json!({"step": "confirm"})).unwrap();
        run.apply(
            RunUpdate::Paused {
                snapshot,
                prompt: "Proceed? (yes/no)".to_string(),
                active_agent: Some("market".to_string()),
            },
            Utc::now(),
        );
        assert_eq!(run.status, RunStatus::PausedForInput);
        assert!(run.snapshot.is_present());
        assert!(run.result.is_none());

        let token = run.pause_token().unwrap();
        assert_eq!(token.workflow_id, run.run_id);
        assert_eq!(token.prompt, "Proceed? (yes/no)");
        assert_eq!(token.active_agent.as_deref(), Some("market"));

        run.apply(RunUpdate::Running, Utc::now());
        assert!(!run.snapshot.is_present());
        assert!(run.pending_prompt.is_none());

        run.apply(RunUpdate::Completed { result: json!("done") }, Utc::now());
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result, Some(json!("done")));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::PausedForInput,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(status.label().parse::<RunStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<RunStatus>().is_err());
    }
}
