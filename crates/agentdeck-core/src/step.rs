// ABOUTME: Step records: the append-only, ordered log of engine progress within a run.
// ABOUTME: NewStep is what callers append; StepRecord is what the registry hands back with its index.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Status of a single step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Rejected,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Rejected => "rejected",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "rejected" => Ok(StepStatus::Rejected),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// A step to be appended. The registry assigns its id and index.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub step_name: String,
    pub status: StepStatus,
    pub event_type: Option<String>,
    pub event_data: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewStep {
    /// A finished step that started at `started_at` and ends now.
    pub fn finished(
        step_name: impl Into<String>,
        status: StepStatus,
        event_type: &str,
        event_data: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            status,
            event_type: Some(event_type.to_string()),
            event_data,
            started_at,
            completed_at: Some(Utc::now()),
        }
    }

    /// Milliseconds between start and completion, if the step completed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds().max(0))
    }
}

/// A persisted step with its position in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: Ulid,
    pub run_id: Ulid,
    pub step_index: u32,
    pub step_name: String,
    pub status: StepStatus,
    pub event_type: Option<String>,
    pub event_data: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl StepRecord {
    /// Materialize a record from an appended step at the given index.
    pub fn from_new(run_id: Ulid, step_index: u32, step: NewStep) -> Self {
        let duration_ms = step.duration_ms();
        Self {
            step_id: Ulid::new(),
            run_id,
            step_index,
            step_name: step.step_name,
            status: step.status,
            event_type: step.event_type,
            event_data: step.event_data,
            started_at: step.started_at,
            completed_at: step.completed_at,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Rejected.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
    }

    #[test]
    fn duration_is_measured_from_start() {
        let started = Utc::now() - Duration::milliseconds(250);
        let step = NewStep::finished(
            "research",
            StepStatus::Completed,
            "step_complete",
            serde_json::json!({}),
            started,
        );
        let duration = step.duration_ms().unwrap();
        assert!(duration >= 250, "duration was {duration}");

        let record = StepRecord::from_new(Ulid::new(), 4, step);
        assert_eq!(record.step_index, 4);
        assert_eq!(record.duration_ms, Some(duration));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&StepStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
        assert_eq!("skipped".parse::<StepStatus>().unwrap(), StepStatus::Skipped);
    }
}
