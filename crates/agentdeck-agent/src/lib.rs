// ABOUTME: Execution engines and the HITL controller that drives them through pause and resume.
// ABOUTME: Contains the built-in agents, teams, and flows plus the immutable entity registry.

pub mod agents;
pub mod context;
pub mod controller;
pub mod engine;
pub mod flows;
pub mod memory;
pub mod registry;
pub mod search;
pub mod teams;
pub mod testing;
pub mod tools;

pub use context::EngineContext;
pub use controller::{
    HitlController, HitlError, RunEvent, RunEventStream, RunExecution, RunOutcome, RunView,
    StartRequest,
};
pub use engine::{EngineError, EngineEvent, EngineItem, EventStream, Runnable};
pub use memory::SessionMemory;
pub use registry::EntityRegistry;
pub use search::{OfflineSearch, PerplexitySearch, WebSearch};
