// ABOUTME: SQLite-backed run registry and session store sharing one database file.
// ABOUTME: Status transitions are conditional UPDATEs inside IMMEDIATE transactions.

use std::path::Path;
use std::sync::Mutex;

use agentdeck_core::{
    EntityKind, MessageRole, NewRun, NewStep, Run, RunStatus, RunUpdate, SessionKey,
    SessionMessage, Snapshot, StepRecord, StepStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use ulid::Ulid;

use crate::error::StoreError;
use crate::registry::{RunRegistry, SessionStore, check_edge};

const RUN_COLUMNS: &str = "run_id, entity_id, entity_kind, session_id, status, input, snapshot,
    pending_prompt, active_agent, result, error, metadata, created_at, updated_at, completed_at";

const STEP_COLUMNS: &str = "step_id, run_id, step_index, step_name, status, event_type, event_data,
    started_at, completed_at, duration_ms";

/// A SQLite database holding runs, step records, and session messages.
/// The connection is locked only for the duration of one statement or
/// transaction, never while an engine is executing.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                session_id TEXT,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                snapshot TEXT,
                pending_prompt TEXT,
                active_agent TEXT,
                result TEXT,
                error TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_entity ON runs(entity_kind, entity_id);

            CREATE TABLE IF NOT EXISTS steps (
                step_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                step_name TEXT NOT NULL,
                status TEXT NOT NULL,
                event_type TEXT,
                event_data TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER,
                UNIQUE (run_id, step_index),
                FOREIGN KEY (run_id) REFERENCES runs(run_id)
            );

            CREATE TABLE IF NOT EXISTS session_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_session_messages_key
                ON session_messages(entity_id, session_id, id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Raw run columns as stored, converted to a Run after the query.
struct RunRow {
    run_id: String,
    entity_id: String,
    entity_kind: String,
    session_id: Option<String>,
    status: String,
    input: String,
    snapshot: Option<String>,
    pending_prompt: Option<String>,
    active_agent: Option<String>,
    result: Option<String>,
    error: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            entity_id: row.get(1)?,
            entity_kind: row.get(2)?,
            session_id: row.get(3)?,
            status: row.get(4)?,
            input: row.get(5)?,
            snapshot: row.get(6)?,
            pending_prompt: row.get(7)?,
            active_agent: row.get(8)?,
            result: row.get(9)?,
            error: row.get(10)?,
            metadata: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            completed_at: row.get(14)?,
        })
    }

    fn into_run(self) -> Result<Run, StoreError> {
        Ok(Run {
            run_id: parse_ulid(&self.run_id)?,
            entity_id: self.entity_id,
            entity_kind: self
                .entity_kind
                .parse::<EntityKind>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            session_id: self.session_id,
            status: self.status.parse::<RunStatus>().map_err(StoreError::Corrupt)?,
            input: parse_json(&self.input)?,
            snapshot: Snapshot::from_text(self.snapshot.as_deref())
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            pending_prompt: self.pending_prompt,
            active_agent: self.active_agent,
            result: self.result.as_deref().map(parse_json).transpose()?,
            error: self.error,
            metadata: parse_json(&self.metadata)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

/// Raw step columns as stored.
struct StepRow {
    step_id: String,
    run_id: String,
    step_index: u32,
    step_name: String,
    status: String,
    event_type: Option<String>,
    event_data: String,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
}

impl StepRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            step_id: row.get(0)?,
            run_id: row.get(1)?,
            step_index: row.get(2)?,
            step_name: row.get(3)?,
            status: row.get(4)?,
            event_type: row.get(5)?,
            event_data: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            duration_ms: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<StepRecord, StoreError> {
        Ok(StepRecord {
            step_id: parse_ulid(&self.step_id)?,
            run_id: parse_ulid(&self.run_id)?,
            step_index: self.step_index,
            step_name: self.step_name,
            status: self.status.parse::<StepStatus>().map_err(StoreError::Corrupt)?,
            event_type: self.event_type,
            event_data: parse_json(&self.event_data)?,
            started_at: parse_time(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            duration_ms: self.duration_ms,
        })
    }
}

fn parse_ulid(s: &str) -> Result<Ulid, StoreError> {
    s.parse::<Ulid>()
        .map_err(|e| StoreError::Corrupt(format!("bad id {s}: {e}")))
}

fn parse_json(s: &str) -> Result<Value, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s}: {e}")))
}

fn to_json(value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn load_run(conn: &Connection, run_id: Ulid) -> Result<Run, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"),
            params![run_id.to_string()],
            RunRow::from_row,
        )
        .optional()?;

    match row {
        Some(row) => row.into_run(),
        None => Err(StoreError::RunNotFound(run_id)),
    }
}

fn load_status(conn: &Connection, run_id: Ulid) -> Result<Option<RunStatus>, StoreError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM runs WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    status
        .map(|s| s.parse::<RunStatus>().map_err(StoreError::Corrupt))
        .transpose()
}

impl RunRegistry for SqliteStore {
    fn create_run(&self, new: NewRun) -> Result<Run, StoreError> {
        let run = Run::new(new);
        let conn = self.conn.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO runs ({RUN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, NULL, NULL, ?7, ?8, ?9, NULL)"
            ),
            params![
                run.run_id.to_string(),
                run.entity_id,
                run.entity_kind.label(),
                run.session_id,
                run.status.label(),
                to_json(&run.input)?,
                to_json(&run.metadata)?,
                run.created_at.to_rfc3339(),
                run.updated_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(run_id = %run.run_id, entity = %run.entity_id, "run created");
        Ok(run)
    }

    fn transition(
        &self,
        run_id: Ulid,
        expected: RunStatus,
        update: RunUpdate,
    ) -> Result<Run, StoreError> {
        check_edge(expected, &update)?;

        let now = Utc::now();
        let fields = update.into_fields(now);
        let snapshot = fields
            .snapshot
            .to_text()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let result = fields.result.as_ref().map(to_json).transpose()?;

        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE runs SET
                status = ?1,
                snapshot = ?2,
                pending_prompt = ?3,
                active_agent = ?4,
                result = ?5,
                error = ?6,
                updated_at = ?7,
                completed_at = ?8
             WHERE run_id = ?9 AND status = ?10",
            params![
                fields.status.label(),
                snapshot,
                fields.pending_prompt,
                fields.active_agent,
                result,
                fields.error,
                now.to_rfc3339(),
                fields.completed_at.map(|t| t.to_rfc3339()),
                run_id.to_string(),
                expected.label(),
            ],
        )?;

        if changed == 0 {
            let actual = load_status(&tx, run_id)?;
            return match actual {
                None => Err(StoreError::RunNotFound(run_id)),
                Some(actual) => Err(StoreError::Conflict {
                    run_id,
                    expected,
                    actual,
                }),
            };
        }

        let run = load_run(&tx, run_id)?;
        tx.commit()?;

        tracing::debug!(
            run_id = %run_id,
            from = %expected,
            to = %run.status,
            "run transitioned"
        );
        Ok(run)
    }

    fn get_run(&self, run_id: Ulid) -> Result<Run, StoreError> {
        let conn = self.conn.lock()?;
        load_run(&conn, run_id)
    }

    fn append_step(&self, run_id: Ulid, step: NewStep) -> Result<StepRecord, StoreError> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status = load_status(&tx, run_id)?.ok_or(StoreError::RunNotFound(run_id))?;
        if status.is_terminal() {
            return Err(StoreError::InvalidRun { run_id, status });
        }

        let next_index: u32 = tx.query_row(
            "SELECT COALESCE(MAX(step_index) + 1, 0) FROM steps WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )?;

        let record = StepRecord::from_new(run_id, next_index, step);
        tx.execute(
            &format!(
                "INSERT INTO steps ({STEP_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                record.step_id.to_string(),
                run_id.to_string(),
                record.step_index,
                record.step_name,
                record.status.label(),
                record.event_type,
                to_json(&record.event_data)?,
                record.started_at.to_rfc3339(),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.duration_ms,
            ],
        )?;
        tx.commit()?;

        Ok(record)
    }

    fn list_steps(&self, run_id: Ulid) -> Result<Vec<StepRecord>, StoreError> {
        let conn = self.conn.lock()?;
        if load_status(&conn, run_id)?.is_none() {
            return Err(StoreError::RunNotFound(run_id));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 ORDER BY step_index ASC"
        ))?;
        let rows = stmt.query_map(params![run_id.to_string()], StepRow::from_row)?;

        let mut steps = Vec::new();
        for row in rows {
            steps.push(row?.into_record()?);
        }
        Ok(steps)
    }
}

impl SessionStore for SqliteStore {
    fn append(&self, key: &SessionKey, message: SessionMessage) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO session_messages (entity_id, session_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.entity_id,
                key.session_id,
                message.role.label(),
                message.content,
                message.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn history(&self, key: &SessionKey) -> Result<Vec<SessionMessage>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp FROM session_messages
             WHERE entity_id = ?1 AND session_id = ?2 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![key.entity_id, key.session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, timestamp) = row?;
            let role = MessageRole::parse(&role)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role {role}")))?;
            messages.push(SessionMessage {
                role,
                content,
                timestamp: parse_time(&timestamp)?,
            });
        }
        Ok(messages)
    }

    fn clear(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        let removed = conn.execute(
            "DELETE FROM session_messages WHERE entity_id = ?1 AND session_id = ?2",
            params![key.entity_id, key.session_id],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::conformance;
    use agentdeck_core::capture;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("agentdeck.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_get() {
        let (_dir, store) = temp_store();
        conformance::create_and_get(&store);
    }

    #[test]
    fn transitions_follow_expected_status() {
        let (_dir, store) = temp_store();
        conformance::transitions_follow_expected_status(&store);
    }

    #[test]
    fn steps_are_indexed_and_closed_on_terminal() {
        let (_dir, store) = temp_store();
        conformance::steps_are_indexed_and_closed_on_terminal(&store);
    }

    #[test]
    fn only_one_resumer_wins() {
        let (_dir, store) = temp_store();
        conformance::only_one_resumer_wins(Arc::new(store));
    }

    #[test]
    fn sessions_append_and_clear() {
        let (_dir, store) = temp_store();
        conformance::sessions_append_and_clear(&store);
    }

    #[test]
    fn in_memory_database_behaves_the_same() {
        let store = SqliteStore::open_in_memory().unwrap();
        conformance::create_and_get(&store);
        conformance::steps_are_indexed_and_closed_on_terminal(&store);
    }

    #[test]
    fn paused_run_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agentdeck.db");

        let run_id = {
            let store = SqliteStore::open(&path).unwrap();
            let run = store
                .create_run(NewRun::new(EntityKind::Agent, "market", json!("update NASDAQ")))
                .unwrap();
            store
                .transition(run.run_id, RunStatus::Pending, RunUpdate::Running)
                .unwrap();
            store
                .transition(
                    run.run_id,
                    RunStatus::Running,
                    RunUpdate::Paused {
                        snapshot: capture(&json!({"pending_tool": "push_index"})).unwrap(),
                        prompt: "Proceed? (yes/no)".to_string(),
                        active_agent: Some("market".to_string()),
                    },
                )
                .unwrap();
            run.run_id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let run = reopened.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::PausedForInput);
        assert_eq!(run.active_agent.as_deref(), Some("market"));
        let state: Value = agentdeck_core::restore(&run.snapshot).unwrap();
        assert_eq!(state["pending_tool"], "push_index");
    }

    #[test]
    fn failed_conflict_leaves_row_untouched() {
        let (_dir, store) = temp_store();
        let run = store
            .create_run(NewRun::new(EntityKind::Flow, "story_flow", json!({})))
            .unwrap();
        store
            .transition(run.run_id, RunStatus::Pending, RunUpdate::Running)
            .unwrap();
        store
            .transition(
                run.run_id,
                RunStatus::Running,
                RunUpdate::Completed { result: json!({"article": "done"}) },
            )
            .unwrap();
        let before = store.get_run(run.run_id).unwrap();

        let err = store
            .transition(run.run_id, RunStatus::PausedForInput, RunUpdate::Running)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get_run(run.run_id).unwrap(), before);
    }
}
