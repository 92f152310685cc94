// ABOUTME: The RunRegistry and SessionStore traits that every storage backend implements.
// ABOUTME: Transitions are compare-and-swap on run status so only one resumer can win.

use agentdeck_core::{
    NewRun, NewStep, Run, RunStatus, RunUpdate, SessionKey, SessionMessage, StepRecord,
};
use ulid::Ulid;

use crate::error::StoreError;

/// Durable storage for runs and their step records.
///
/// Each method is a single atomic operation: callers never observe a
/// half-applied transition or a step without its index.
pub trait RunRegistry: Send + Sync {
    /// Insert a new run with status `pending`.
    fn create_run(&self, new: NewRun) -> Result<Run, StoreError>;

    /// Apply `update` only if the run is currently in `expected` status.
    /// Returns the updated run, or `StoreError::Conflict` with the status
    /// actually found.
    fn transition(
        &self,
        run_id: Ulid,
        expected: RunStatus,
        update: RunUpdate,
    ) -> Result<Run, StoreError>;

    fn get_run(&self, run_id: Ulid) -> Result<Run, StoreError>;

    /// Append a step at the next index. Fails with `StoreError::InvalidRun`
    /// once the run is terminal.
    fn append_step(&self, run_id: Ulid, step: NewStep) -> Result<StepRecord, StoreError>;

    /// All steps of a run ordered by `step_index`.
    fn list_steps(&self, run_id: Ulid) -> Result<Vec<StepRecord>, StoreError>;
}

/// Per-conversation message history.
pub trait SessionStore: Send + Sync {
    fn append(&self, key: &SessionKey, message: SessionMessage) -> Result<(), StoreError>;

    /// Messages in arrival order. An unknown session has an empty history.
    fn history(&self, key: &SessionKey) -> Result<Vec<SessionMessage>, StoreError>;

    /// Remove a session's history. Returns false if nothing was stored.
    fn clear(&self, key: &SessionKey) -> Result<bool, StoreError>;
}

/// Check the state machine edge before touching storage.
pub(crate) fn check_edge(expected: RunStatus, update: &RunUpdate) -> Result<(), StoreError> {
    let to = update.target_status();
    if expected.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from: expected, to })
    }
}
