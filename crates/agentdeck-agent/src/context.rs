// ABOUTME: Serializable execution contexts captured when an agent, team, or flow suspends.
// ABOUTME: Holds only plain data (plans, partial results, shared state), never live handles.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agents::AgentRole;
use crate::flows::FlowStep;

/// A tool call an agent has decided to make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(tool: &str, arguments: Value) -> Self {
        Self {
            tool: tool.to_string(),
            arguments,
        }
    }

    /// Read a string argument, or an empty string when absent.
    pub fn str_arg(&self, name: &str) -> &str {
        self.arguments
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn f64_arg(&self, name: &str) -> f64 {
        self.arguments
            .get(name)
            .and_then(Value::as_f64)
            .unwrap_or_default()
    }
}

/// A finished tool call and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub arguments: Value,
    pub output: Value,
}

/// Where a single agent is within one conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent: AgentRole,
    pub input: String,
    /// Tool calls still to run, in order.
    pub plan: Vec<ToolInvocation>,
    pub results: Vec<ToolResult>,
    /// A tool call waiting on a human answer.
    pub pending: Option<ToolInvocation>,
}

impl AgentContext {
    pub fn new(agent: AgentRole, input: &str, plan: Vec<ToolInvocation>) -> Self {
        Self {
            agent,
            input: input.to_string(),
            plan,
            results: Vec::new(),
            pending: None,
        }
    }
}

/// A team's turn: which member holds control and what the team shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamContext {
    pub team_id: String,
    pub active: AgentContext,
    pub shared_state: Value,
    pub responding_agents: Vec<String>,
}

/// Variables of a step-based flow, plus the step to run next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub flow_id: String,
    pub topic: String,
    pub next_step: FlowStep,
    pub research: Option<String>,
    pub article: Option<String>,
    pub attempt: u32,
    pub feedback: Option<String>,
    pub score: Option<u32>,
    pub reviewer_response: Option<String>,
    /// When the step named by `next_step` started, if it already has.
    pub step_started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl FlowContext {
    pub fn new(flow_id: &str, topic: &str) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            topic: topic.to_string(),
            next_step: FlowStep::Research,
            research: None,
            article: None,
            attempt: 0,
            feedback: None,
            score: None,
            reviewer_response: None,
            step_started_at: None,
        }
    }
}

/// Everything an engine needs to continue after a suspension. Captured
/// into a snapshot by the controller and restored on respond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineContext {
    Agent(AgentContext),
    Team(TeamContext),
    Flow(FlowContext),
    /// Minimal context for engines that only need to remember the input.
    Generic { entity_id: String, state: Value },
}

impl EngineContext {
    pub fn label(&self) -> &'static str {
        match self {
            EngineContext::Agent(_) => "agent",
            EngineContext::Team(_) => "team",
            EngineContext::Flow(_) => "flow",
            EngineContext::Generic { .. } => "generic",
        }
    }
}

/// Team state shape for a team with the given keys, each starting as an
/// empty list.
pub fn empty_lists(keys: &[&str]) -> Value {
    let mut state = json!({});
    for key in keys {
        state[*key] = json!([]);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_core::{capture, restore};

    #[test]
    fn contexts_survive_snapshot_round_trip() {
        let mut agent = AgentContext::new(
            AgentRole::Market,
            "update NASDAQ to 17000",
            vec![],
        );
        agent.pending = Some(ToolInvocation::new(
            "push_index",
            json!({"index_name": "NASDAQ", "value": 17000.0}),
        ));

        let team = EngineContext::Team(TeamContext {
            team_id: "market_research_team".to_string(),
            active: agent,
            shared_state: empty_lists(&["research_notes", "updated_indices"]),
            responding_agents: vec!["research".to_string(), "market".to_string()],
        });

        let snapshot = capture(&team).unwrap();
        let restored: EngineContext = restore(&snapshot).unwrap();
        assert_eq!(restored, team);
        assert_eq!(restored.label(), "team");
    }

    #[test]
    fn flow_context_starts_at_research() {
        let ctx = FlowContext::new("story_flow", "rust");
        assert_eq!(ctx.next_step, FlowStep::Research);
        assert_eq!(ctx.attempt, 0);
    }

    #[test]
    fn invocation_argument_accessors() {
        let call = ToolInvocation::new("add", json!({"a": 2.0, "b": 3, "label": "x"}));
        assert_eq!(call.f64_arg("a"), 2.0);
        assert_eq!(call.f64_arg("b"), 3.0);
        assert_eq!(call.str_arg("label"), "x");
        assert_eq!(call.str_arg("missing"), "");
    }
}
