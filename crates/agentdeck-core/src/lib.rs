// ABOUTME: Core library for agentdeck, containing the domain types shared by every crate.
// ABOUTME: Defines runs, step records, snapshots, sessions, entity descriptors, and pause tokens.

pub mod entity;
pub mod event_data;
pub mod pause;
pub mod run;
pub mod session;
pub mod snapshot;
pub mod step;

pub use entity::{EntityDescriptor, EntityKind, TeamMember, UnknownEntityKind, display_name};
pub use event_data::{STORED_FIELD_LIMIT, STREAM_FIELD_LIMIT, truncate_strings};
pub use pause::PauseToken;
pub use run::{NewRun, Run, RunFields, RunStatus, RunUpdate};
pub use session::{MessageRole, SessionKey, SessionMessage};
pub use snapshot::{SNAPSHOT_FORMAT, Snapshot, SnapshotBlob, SnapshotError, capture, restore};
pub use step::{NewStep, StepRecord, StepStatus};
