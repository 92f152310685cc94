// ABOUTME: Error type shared by the run registry and session store backends.
// ABOUTME: Separates caller mistakes (not found, conflicts) from storage being unavailable.

use agentdeck_core::RunStatus;
use thiserror::Error;
use ulid::Ulid;

/// Errors that can occur during registry and session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(Ulid),

    #[error("run {run_id} is {actual}, expected {expected}")]
    Conflict {
        run_id: Ulid,
        expected: RunStatus,
        actual: RunStatus,
    },

    #[error("run {run_id} is {status} and accepts no further steps")]
    InvalidRun { run_id: Ulid, status: RunStatus },

    #[error("no transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}
