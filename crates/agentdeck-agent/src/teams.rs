// ABOUTME: Multi-agent teams: a handoff team (research <-> market) and an orchestrator that delegates.
// ABOUTME: The active member's turn plus the team's shared state are what a paused team snapshots.

use std::sync::Arc;

use agentdeck_core::{EntityDescriptor, EntityKind, TeamMember};
use chrono::Utc;
use serde_json::{Value, json};

use crate::agents::{AgentRole, ToolAgent, Turn, has_arithmetic};
use crate::context::{AgentContext, EngineContext, TeamContext, empty_lists};
use crate::engine::{
    EngineError, EngineEvent, EventSink, EventStream, Outcome, Runnable, Suspension, spawn_engine,
};
use crate::memory::SessionMemory;
use crate::search::WebSearch;
use crate::tools;

pub const MARKET_RESEARCH_TEAM: &str = "market_research_team";
pub const ORCHESTRATOR_TEAM: &str = "research_math_orchestrator_team";

/// Words that make the research agent pass control to the market agent.
const MARKET_WORDS: [&str; 4] = ["market", "index", "indices", "stock"];

fn member(role: AgentRole, can_handoff_to: &[AgentRole]) -> TeamMember {
    TeamMember {
        name: role.id().to_string(),
        description: role.description().to_string(),
        can_handoff_to: can_handoff_to.iter().map(|r| r.id().to_string()).collect(),
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

fn push_state(state: &mut Value, key: &str, item: Value) {
    if let Some(list) = state.get_mut(key).and_then(Value::as_array_mut) {
        list.push(item);
    }
}

/// Final payload of a team turn.
fn team_result(reply: &str, ctx: &TeamContext) -> Value {
    json!({
        "response": reply,
        "responding_agents": ctx.responding_agents,
        "state": ctx.shared_state,
    })
}

/// Research answers by default and hands off to market for index questions.
#[derive(Clone)]
pub struct HandoffTeam {
    research: ToolAgent,
    market: ToolAgent,
}

impl HandoffTeam {
    pub fn new(search: Arc<dyn WebSearch>) -> Self {
        Self {
            research: ToolAgent::new(AgentRole::Research, search.clone()),
            market: ToolAgent::new(AgentRole::Market, search),
        }
    }

    fn agent(&self, role: AgentRole) -> Result<&ToolAgent, EngineError> {
        match role {
            AgentRole::Research => Ok(&self.research),
            AgentRole::Market => Ok(&self.market),
            other => Err(EngineError::InvalidContext(format!(
                "{} is not a member of {MARKET_RESEARCH_TEAM}",
                other.id()
            ))),
        }
    }

    fn wants_market(input: &str) -> bool {
        let lower = input.to_lowercase();
        MARKET_WORDS.iter().any(|w| lower.contains(w))
            || input.split_whitespace().any(|w| tools::normalize_index(w).is_some())
    }

    async fn handoff(
        &self,
        ctx: &mut TeamContext,
        from: AgentRole,
        to: AgentRole,
        sink: &EventSink,
    ) -> Result<(), EngineError> {
        tracing::debug!(team = MARKET_RESEARCH_TEAM, from = from.id(), to = to.id(), "handoff");
        sink.emit(EngineEvent::ToolCall {
            agent_name: from.id().to_string(),
            tool_name: "handoff".to_string(),
            arguments: json!({ "to_agent": to.id(), "reason": "market data request" }),
            output: Value::String(format!("Transferred to {}", to.id())),
            started_at: Utc::now(),
        })
        .await?;
        sink.agent_changed(to.id()).await?;
        push_unique(&mut ctx.responding_agents, to.id());
        Ok(())
    }

    /// Record what the member that just replied contributed to shared state.
    fn update_state(ctx: &mut TeamContext) {
        let active = &ctx.active;
        for result in &active.results {
            match result.tool.as_str() {
                "web_search" => push_state(
                    &mut ctx.shared_state,
                    "research_notes",
                    json!(result.arguments["query"]),
                ),
                "push_index" => {
                    let confirmed = result
                        .output
                        .as_str()
                        .is_some_and(|o| o.starts_with("✅"));
                    if confirmed {
                        push_state(
                            &mut ctx.shared_state,
                            "updated_indices",
                            json!({
                                "index": result.arguments["index_name"],
                                "value": result.arguments["value"],
                            }),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    async fn finish(
        &self,
        mut ctx: TeamContext,
        turn: Turn,
        sink: &EventSink,
    ) -> Result<Outcome, EngineError> {
        match turn {
            Turn::Reply(reply) => {
                Self::update_state(&mut ctx);
                sink.stream_text(&reply).await?;
                Ok(Outcome::Completed(team_result(&reply, &ctx)))
            }
            Turn::NeedsInput { prompt } => Ok(Outcome::Suspended(Suspension {
                prompt,
                active_agent: Some(ctx.active.agent.id().to_string()),
                context: EngineContext::Team(ctx),
            })),
        }
    }
}

impl Runnable for HandoffTeam {
    fn kind(&self) -> EntityKind {
        EntityKind::Team
    }

    fn id(&self) -> &str {
        MARKET_RESEARCH_TEAM
    }

    fn describe(&self) -> EntityDescriptor {
        let mut desc = EntityDescriptor::new(
            EntityKind::Team,
            MARKET_RESEARCH_TEAM,
            "Research agent that hands market index questions to the market agent",
        );
        desc.root_agent = Some(AgentRole::Research.id().to_string());
        desc.agents = vec![
            member(AgentRole::Research, &[AgentRole::Market]),
            member(AgentRole::Market, &[AgentRole::Research]),
        ];
        desc
    }

    fn start(&self, input: String, memory: SessionMemory) -> EventStream {
        let team = self.clone();
        spawn_engine(move |sink| async move {
            sink.agent_changed(AgentRole::Research.id()).await?;
            let mut ctx = TeamContext {
                team_id: MARKET_RESEARCH_TEAM.to_string(),
                active: team.research.begin(&input, &memory),
                shared_state: empty_lists(&["research_notes", "updated_indices"]),
                responding_agents: vec![AgentRole::Research.id().to_string()],
            };

            if Self::wants_market(&input) {
                team.handoff(&mut ctx, AgentRole::Research, AgentRole::Market, &sink)
                    .await?;
                ctx.active = team.market.begin(&input, &memory);
            }

            let role = ctx.active.agent;
            let turn = team.agent(role)?.run_turn(&mut ctx.active, &sink).await?;
            team.finish(ctx, turn, &sink).await
        })
    }

    fn resume(
        &self,
        context: EngineContext,
        human_input: String,
        _memory: SessionMemory,
    ) -> EventStream {
        let team = self.clone();
        spawn_engine(move |sink| async move {
            let label = context.label();
            let EngineContext::Team(mut ctx) = context else {
                return Err(EngineError::InvalidContext(format!(
                    "expected a team context, got {label}"
                )));
            };
            if ctx.team_id != MARKET_RESEARCH_TEAM {
                return Err(EngineError::InvalidContext(format!(
                    "context belongs to {}",
                    ctx.team_id
                )));
            }

            let role = ctx.active.agent;
            sink.agent_changed(role.id()).await?;
            let turn = team
                .agent(role)?
                .resume_turn(&mut ctx.active, &human_input, &sink)
                .await?;
            team.finish(ctx, turn, &sink).await
        })
    }
}

/// Splits a request into sub-tasks and delegates each to math or research.
#[derive(Clone)]
pub struct OrchestratorTeam {
    research: ToolAgent,
    math: ToolAgent,
}

impl OrchestratorTeam {
    pub fn new(search: Arc<dyn WebSearch>) -> Self {
        Self {
            research: ToolAgent::new(AgentRole::Research, search.clone()),
            math: ToolAgent::new(AgentRole::Math, search),
        }
    }

    /// Break `input` into delegations. Without any arithmetic the whole
    /// request goes to research.
    pub fn delegations(input: &str) -> Vec<(AgentRole, String)> {
        let clauses: Vec<String> = input
            .split(['?', ';'])
            .flat_map(|part| part.split(" and "))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if !clauses.iter().any(|c| has_arithmetic(c)) {
            return vec![(AgentRole::Research, input.trim().to_string())];
        }
        clauses
            .into_iter()
            .map(|c| {
                let role = if has_arithmetic(&c) {
                    AgentRole::Math
                } else {
                    AgentRole::Research
                };
                (role, c)
            })
            .collect()
    }

    async fn delegate(
        &self,
        ctx: &mut TeamContext,
        role: AgentRole,
        task: &str,
        memory: &SessionMemory,
        sink: &EventSink,
    ) -> Result<String, EngineError> {
        let (agent, tool) = match role {
            AgentRole::Math => (&self.math, "call_math_agent"),
            _ => (&self.research, "call_research_agent"),
        };

        let started_at = Utc::now();
        let mut sub = agent.begin(task, memory);
        let reply = match agent.run_turn(&mut sub, sink).await? {
            Turn::Reply(reply) => reply,
            Turn::NeedsInput { .. } => {
                return Err(EngineError::Failed(format!(
                    "{} asked for input inside {ORCHESTRATOR_TEAM}",
                    role.id()
                )));
            }
        };

        sink.emit(EngineEvent::ToolCall {
            agent_name: AgentRole::Orchestrator.id().to_string(),
            tool_name: tool.to_string(),
            arguments: json!({ "task": task }),
            output: Value::String(reply.clone()),
            started_at,
        })
        .await?;

        push_state(
            &mut ctx.shared_state,
            "delegated_tasks",
            json!({ "agent": role.id(), "task": task }),
        );
        push_unique(&mut ctx.responding_agents, role.id());
        Ok(reply)
    }
}

impl Runnable for OrchestratorTeam {
    fn kind(&self) -> EntityKind {
        EntityKind::Team
    }

    fn id(&self) -> &str {
        ORCHESTRATOR_TEAM
    }

    fn describe(&self) -> EntityDescriptor {
        let mut desc = EntityDescriptor::new(
            EntityKind::Team,
            ORCHESTRATOR_TEAM,
            "Orchestrator that delegates research questions and arithmetic to specialist agents",
        );
        desc.root_agent = Some(AgentRole::Orchestrator.id().to_string());
        desc.agents = vec![
            member(AgentRole::Orchestrator, &[]),
            member(AgentRole::Research, &[]),
            member(AgentRole::Math, &[]),
        ];
        desc
    }

    fn start(&self, input: String, memory: SessionMemory) -> EventStream {
        let team = self.clone();
        spawn_engine(move |sink| async move {
            sink.agent_changed(AgentRole::Orchestrator.id()).await?;
            let mut ctx = TeamContext {
                team_id: ORCHESTRATOR_TEAM.to_string(),
                active: AgentContext::new(AgentRole::Orchestrator, &input, Vec::new()),
                shared_state: empty_lists(&["delegated_tasks"]),
                responding_agents: vec![AgentRole::Orchestrator.id().to_string()],
            };

            let mut replies = Vec::new();
            for (role, task) in Self::delegations(&input) {
                replies.push(team.delegate(&mut ctx, role, &task, &memory, &sink).await?);
            }

            let reply = replies.join("\n\n");
            sink.stream_text(&reply).await?;
            Ok(Outcome::Completed(team_result(&reply, &ctx)))
        })
    }

    fn resume(
        &self,
        _context: EngineContext,
        _human_input: String,
        _memory: SessionMemory,
    ) -> EventStream {
        spawn_engine(|_sink| async move {
            Err(EngineError::InvalidContext(format!(
                "{ORCHESTRATOR_TEAM} never waits for input"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineItem;
    use crate::search::OfflineSearch;
    use futures::StreamExt;

    async fn collect(mut stream: EventStream) -> (Vec<EngineEvent>, EngineItem) {
        let mut events = Vec::new();
        let mut last = None;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                EngineItem::Event(event) => events.push(event),
                other => last = Some(other),
            }
        }
        (events, last.unwrap())
    }

    #[tokio::test]
    async fn handoff_team_pauses_with_market_active() {
        let team = HandoffTeam::new(Arc::new(OfflineSearch));
        let input = "Please update the NASDAQ index to 17000".to_string();
        let (events, last) = collect(team.start(input, SessionMemory::empty())).await;

        assert!(events.contains(&EngineEvent::AgentChanged {
            agent_name: "market".to_string()
        }));
        let EngineItem::Suspended(suspension) = last else {
            panic!("expected a pause");
        };
        assert_eq!(suspension.active_agent.as_deref(), Some("market"));

        let (_, last) = collect(team.resume(
            suspension.context,
            "yes".to_string(),
            SessionMemory::empty(),
        ))
        .await;
        let EngineItem::Completed(result) = last else {
            panic!("expected completion");
        };
        assert_eq!(result["responding_agents"], json!(["research", "market"]));
        assert_eq!(result["state"]["updated_indices"][0]["index"], "NASDAQ");
    }

    #[tokio::test]
    async fn handoff_team_keeps_research_questions() {
        let team = HandoffTeam::new(Arc::new(OfflineSearch));
        let (_, last) =
            collect(team.start("history of the printing press".to_string(), SessionMemory::empty()))
                .await;

        let EngineItem::Completed(result) = last else {
            panic!("expected completion");
        };
        assert_eq!(result["responding_agents"], json!(["research"]));
        assert_eq!(
            result["state"]["research_notes"],
            json!(["history of the printing press"])
        );
    }

    #[test]
    fn orchestrator_splits_mixed_requests() {
        let plan = OrchestratorTeam::delegations("What is 4*5 and who invented the telephone?");
        assert_eq!(
            plan,
            vec![
                (AgentRole::Math, "What is 4*5".to_string()),
                (AgentRole::Research, "who invented the telephone".to_string()),
            ]
        );

        let plan = OrchestratorTeam::delegations("salt and pepper history");
        assert_eq!(plan, vec![(AgentRole::Research, "salt and pepper history".to_string())]);
    }

    #[tokio::test]
    async fn orchestrator_records_delegations() {
        let team = OrchestratorTeam::new(Arc::new(OfflineSearch));
        let (events, last) =
            collect(team.start("What is 2+3 and what is rust?".to_string(), SessionMemory::empty()))
                .await;

        let delegated: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::ToolCall {
                    agent_name,
                    tool_name,
                    ..
                } if agent_name == "orchestrator" => Some(tool_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(delegated, vec!["call_math_agent", "call_research_agent"]);

        let EngineItem::Completed(result) = last else {
            panic!("expected completion");
        };
        assert!(result["response"].as_str().unwrap().starts_with("The answer is 5."));
        assert_eq!(result["state"]["delegated_tasks"].as_array().unwrap().len(), 2);
    }
}
