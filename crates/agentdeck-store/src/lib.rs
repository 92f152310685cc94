// ABOUTME: Persistence layer for agentdeck, storing runs, step records, and session history.
// ABOUTME: Provides the RunRegistry and SessionStore traits with SQLite and in-memory backends.

pub mod error;
pub mod memory;
pub mod registry;
pub mod sqlite;

pub use error::StoreError;
pub use memory::{MemoryRunRegistry, MemorySessionStore};
pub use registry::{RunRegistry, SessionStore};
pub use sqlite::SqliteStore;
