// ABOUTME: In-memory run registry and session store used when no database path is configured.
// ABOUTME: Each run has its own lock; sessions share one map lock so appends and clears serialize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use agentdeck_core::{
    NewRun, NewStep, Run, RunStatus, RunUpdate, SessionKey, SessionMessage, StepRecord,
};
use chrono::Utc;
use ulid::Ulid;

use crate::error::StoreError;
use crate::registry::{RunRegistry, SessionStore, check_edge};

struct RunEntry {
    run: Run,
    steps: Vec<StepRecord>,
}

/// Process-local run registry. State is lost on restart.
#[derive(Default)]
pub struct MemoryRunRegistry {
    runs: RwLock<HashMap<Ulid, Arc<Mutex<RunEntry>>>>,
}

impl MemoryRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, run_id: Ulid) -> Result<Arc<Mutex<RunEntry>>, StoreError> {
        self.runs
            .read()?
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }
}

impl RunRegistry for MemoryRunRegistry {
    fn create_run(&self, new: NewRun) -> Result<Run, StoreError> {
        let run = Run::new(new);
        let entry = RunEntry {
            run: run.clone(),
            steps: Vec::new(),
        };
        self.runs
            .write()?
            .insert(run.run_id, Arc::new(Mutex::new(entry)));
        Ok(run)
    }

    fn transition(
        &self,
        run_id: Ulid,
        expected: RunStatus,
        update: RunUpdate,
    ) -> Result<Run, StoreError> {
        check_edge(expected, &update)?;

        let entry = self.entry(run_id)?;
        let mut entry = entry.lock()?;
        if entry.run.status != expected {
            return Err(StoreError::Conflict {
                run_id,
                expected,
                actual: entry.run.status,
            });
        }

        entry.run.apply(update, Utc::now());
        Ok(entry.run.clone())
    }

    fn get_run(&self, run_id: Ulid) -> Result<Run, StoreError> {
        let entry = self.entry(run_id)?;
        let entry = entry.lock()?;
        Ok(entry.run.clone())
    }

    fn append_step(&self, run_id: Ulid, step: NewStep) -> Result<StepRecord, StoreError> {
        let entry = self.entry(run_id)?;
        let mut entry = entry.lock()?;
        if entry.run.status.is_terminal() {
            return Err(StoreError::InvalidRun {
                run_id,
                status: entry.run.status,
            });
        }

        let index = entry.steps.len() as u32;
        let record = StepRecord::from_new(run_id, index, step);
        entry.steps.push(record.clone());
        Ok(record)
    }

    fn list_steps(&self, run_id: Ulid) -> Result<Vec<StepRecord>, StoreError> {
        let entry = self.entry(run_id)?;
        let entry = entry.lock()?;
        Ok(entry.steps.clone())
    }
}

/// Process-local session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Vec<SessionMessage>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn append(&self, key: &SessionKey, message: SessionMessage) -> Result<(), StoreError> {
        self.sessions
            .lock()?
            .entry(key.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    fn history(&self, key: &SessionKey) -> Result<Vec<SessionMessage>, StoreError> {
        Ok(self.sessions.lock()?.get(key).cloned().unwrap_or_default())
    }

    fn clear(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let removed = self.sessions.lock()?.remove(key);
        Ok(removed.is_some_and(|messages| !messages.is_empty()))
    }
}
