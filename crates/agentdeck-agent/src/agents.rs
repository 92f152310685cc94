// ABOUTME: Single tool-using agents: math, research, market, writer, critic, and the team orchestrator role.
// ABOUTME: Each turn plans tool calls up front, runs them in order, and may pause on a guarded tool.

use std::sync::Arc;

use agentdeck_core::{EntityDescriptor, EntityKind};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::{AgentContext, EngineContext, ToolInvocation, ToolResult};
use crate::engine::{
    EngineError, EngineEvent, EventSink, EventStream, Outcome, Runnable, Suspension, spawn_engine,
};
use crate::memory::SessionMemory;
use crate::search::WebSearch;
use crate::tools;

/// Follow-up phrases that refer back to the previous research topic.
const FOLLOW_UPS: [&str; 6] = [
    "tell me more",
    "more",
    "go on",
    "continue",
    "elaborate",
    "more details",
];

const MARKET_GREETING: &str =
    "I track SP500, NASDAQ, DOW, NIFTY and SENSEX. Which index would you like?";

/// The built-in agent personalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Math,
    Research,
    Market,
    Writer,
    Critic,
    Orchestrator,
}

impl AgentRole {
    /// Roles registered as standalone agents.
    pub const STANDALONE: [AgentRole; 5] = [
        AgentRole::Math,
        AgentRole::Research,
        AgentRole::Market,
        AgentRole::Writer,
        AgentRole::Critic,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            AgentRole::Math => "math",
            AgentRole::Research => "research",
            AgentRole::Market => "market",
            AgentRole::Writer => "writer",
            AgentRole::Critic => "critic",
            AgentRole::Orchestrator => "orchestrator",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::Math => "Solves arithmetic using add and multiply tools",
            AgentRole::Research => "Searches the web and summarizes what it finds",
            AgentRole::Market => {
                "Reads market index values and updates them after human confirmation"
            }
            AgentRole::Writer => "Writes short articles from a topic and research notes",
            AgentRole::Critic => "Reviews articles and scores them for publication",
            AgentRole::Orchestrator => "Delegates sub-tasks to the research and math agents",
        }
    }

    /// Tool names this role may call.
    pub fn tools(&self) -> &'static [&'static str] {
        match self {
            AgentRole::Math => &["add", "multiply"],
            AgentRole::Research => &["web_search"],
            AgentRole::Market => &["get_index", "push_index"],
            AgentRole::Writer | AgentRole::Critic => &[],
            AgentRole::Orchestrator => &["call_research_agent", "call_math_agent"],
        }
    }
}

/// How one agent turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Reply(String),
    /// A guarded tool call is waiting in `AgentContext::pending`.
    NeedsInput { prompt: String },
}

/// A critic's verdict on an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub approved: bool,
    pub score: u32,
    pub issues: Vec<String>,
    pub feedback: String,
}

/// A single agent backed by local tools and an optional web search backend.
#[derive(Clone)]
pub struct ToolAgent {
    role: AgentRole,
    search: Arc<dyn WebSearch>,
}

impl ToolAgent {
    pub fn new(role: AgentRole, search: Arc<dyn WebSearch>) -> Self {
        Self { role, search }
    }

    /// Decide which tool calls answer `input`.
    pub fn plan(&self, input: &str, memory: &SessionMemory) -> Vec<ToolInvocation> {
        match self.role {
            AgentRole::Math => plan_arithmetic(input),
            AgentRole::Research => {
                let query = research_topic(input, memory);
                vec![ToolInvocation::new("web_search", json!({ "query": query }))]
            }
            AgentRole::Market => plan_market(input),
            AgentRole::Writer | AgentRole::Critic | AgentRole::Orchestrator => Vec::new(),
        }
    }

    /// Start a turn for `input`.
    pub fn begin(&self, input: &str, memory: &SessionMemory) -> AgentContext {
        AgentContext::new(self.role, input, self.plan(input, memory))
    }

    /// Run the remaining plan. Stops early when a guarded tool needs a human.
    pub async fn run_turn(
        &self,
        ctx: &mut AgentContext,
        sink: &EventSink,
    ) -> Result<Turn, EngineError> {
        while !ctx.plan.is_empty() {
            let call = ctx.plan.remove(0);
            if call.tool == "push_index" {
                let prompt =
                    tools::push_index_prompt(call.str_arg("index_name"), call.f64_arg("value"));
                tracing::info!(
                    agent = self.role.id(),
                    tool = %call.tool,
                    "tool requires confirmation"
                );
                ctx.pending = Some(call);
                return Ok(Turn::NeedsInput { prompt });
            }

            let started_at = Utc::now();
            let output = self.execute(&call).await?;
            self.record(ctx, call, output, started_at, sink).await?;
        }

        Ok(Turn::Reply(self.compose_reply(ctx)))
    }

    /// Apply a human answer to the pending tool call, then finish the plan.
    pub async fn resume_turn(
        &self,
        ctx: &mut AgentContext,
        answer: &str,
        sink: &EventSink,
    ) -> Result<Turn, EngineError> {
        let call = ctx.pending.take().ok_or_else(|| {
            EngineError::InvalidContext(format!("{} has no pending tool call", self.role.id()))
        })?;

        let started_at = Utc::now();
        let (_, message) =
            tools::push_index_outcome(call.str_arg("index_name"), call.f64_arg("value"), answer);
        self.record(ctx, call, Value::String(message), started_at, sink)
            .await?;

        self.run_turn(ctx, sink).await
    }

    async fn record(
        &self,
        ctx: &mut AgentContext,
        call: ToolInvocation,
        output: Value,
        started_at: chrono::DateTime<Utc>,
        sink: &EventSink,
    ) -> Result<(), EngineError> {
        sink.emit(EngineEvent::ToolCall {
            agent_name: self.role.id().to_string(),
            tool_name: call.tool.clone(),
            arguments: call.arguments.clone(),
            output: output.clone(),
            started_at,
        })
        .await?;

        ctx.results.push(ToolResult {
            tool: call.tool,
            arguments: call.arguments,
            output,
        });
        Ok(())
    }

    async fn execute(&self, call: &ToolInvocation) -> Result<Value, EngineError> {
        tracing::debug!(agent = self.role.id(), tool = %call.tool, "running tool");
        let output = match call.tool.as_str() {
            "add" => json!(tools::add(call.f64_arg("a"), call.f64_arg("b"))),
            "multiply" => json!(tools::multiply(call.f64_arg("a"), call.f64_arg("b"))),
            "get_index" => tools::get_index(call.str_arg("index_name")),
            "web_search" => Value::String(self.search.search(call.str_arg("query")).await?),
            other => {
                return Err(EngineError::Tool {
                    tool: other.to_string(),
                    message: format!("not available to the {} agent", self.role.id()),
                });
            }
        };
        Ok(output)
    }

    fn compose_reply(&self, ctx: &AgentContext) -> String {
        match self.role {
            AgentRole::Math => match ctx.results.last().and_then(|r| r.output.as_f64()) {
                Some(answer) => format!("The answer is {}.", tools::format_number(answer)),
                None => "I can add and multiply numbers. Try something like 'What is 2+3?'"
                    .to_string(),
            },
            AgentRole::Research => {
                let summary = ctx
                    .results
                    .last()
                    .and_then(|r| r.output.as_str())
                    .unwrap_or_default();
                let topic = ctx
                    .results
                    .last()
                    .map(|r| r.arguments["query"].as_str().unwrap_or_default())
                    .unwrap_or(ctx.input.as_str());
                format!("Here is what I found about {topic}: {summary}")
            }
            AgentRole::Market => {
                if ctx.results.is_empty() {
                    return MARKET_GREETING.to_string();
                }
                ctx.results
                    .iter()
                    .map(describe_market_result)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            AgentRole::Writer => write_article(&ctx.input, None, None),
            AgentRole::Critic => {
                let review = critique(&ctx.input);
                serde_json::to_string(&review).unwrap_or_else(|_| review.feedback.clone())
            }
            AgentRole::Orchestrator => ctx.input.clone(),
        }
    }

    async fn finish(
        &self,
        ctx: AgentContext,
        turn: Turn,
        sink: &EventSink,
    ) -> Result<Outcome, EngineError> {
        match turn {
            Turn::Reply(reply) => {
                sink.stream_text(&reply).await?;
                Ok(Outcome::Completed(Value::String(reply)))
            }
            Turn::NeedsInput { prompt } => Ok(Outcome::Suspended(Suspension {
                prompt,
                active_agent: Some(self.role.id().to_string()),
                context: EngineContext::Agent(ctx),
            })),
        }
    }
}

impl Runnable for ToolAgent {
    fn kind(&self) -> EntityKind {
        EntityKind::Agent
    }

    fn id(&self) -> &str {
        self.role.id()
    }

    fn describe(&self) -> EntityDescriptor {
        EntityDescriptor::new(EntityKind::Agent, self.role.id(), self.role.description())
    }

    fn start(&self, input: String, memory: SessionMemory) -> EventStream {
        let agent = self.clone();
        spawn_engine(move |sink| async move {
            let mut ctx = agent.begin(&input, &memory);
            let turn = agent.run_turn(&mut ctx, &sink).await?;
            agent.finish(ctx, turn, &sink).await
        })
    }

    fn resume(
        &self,
        context: EngineContext,
        human_input: String,
        _memory: SessionMemory,
    ) -> EventStream {
        let agent = self.clone();
        spawn_engine(move |sink| async move {
            let label = context.label();
            let EngineContext::Agent(mut ctx) = context else {
                return Err(EngineError::InvalidContext(format!(
                    "expected an agent context, got {label}"
                )));
            };
            if ctx.agent != agent.role {
                return Err(EngineError::InvalidContext(format!(
                    "context belongs to {}, not {}",
                    ctx.agent.id(),
                    agent.role.id()
                )));
            }
            let turn = agent.resume_turn(&mut ctx, &human_input, &sink).await?;
            agent.finish(ctx, turn, &sink).await
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Add,
    Mul,
}

fn tokenize(input: &str) -> Vec<Option<Token>> {
    let spaced = input
        .replace('+', " + ")
        .replace('*', " * ")
        .replace('×', " * ");
    spaced
        .split_whitespace()
        .map(|word| {
            let word = word.trim_matches(|c: char| matches!(c, '?' | '!' | ',' | '(' | ')'));
            let word = word.strip_suffix('.').unwrap_or(word);
            match word.to_lowercase().as_str() {
                "+" | "plus" => Some(Token::Add),
                "*" | "x" | "times" => Some(Token::Mul),
                other => other.parse::<f64>().ok().map(Token::Num),
            }
        })
        .collect()
}

/// Parse the first `a op b (op c)*` expression into sum-of-products groups.
fn parse_arithmetic(input: &str) -> Option<Vec<Vec<f64>>> {
    let tokens = tokenize(input);
    for start in 0..tokens.len() {
        let Some(Token::Num(first)) = tokens[start] else {
            continue;
        };
        let mut groups = vec![vec![first]];
        let mut i = start + 1;
        while i + 1 < tokens.len() {
            match (tokens[i], tokens[i + 1]) {
                (Some(Token::Add), Some(Token::Num(n))) => groups.push(vec![n]),
                (Some(Token::Mul), Some(Token::Num(n))) => {
                    if let Some(group) = groups.last_mut() {
                        group.push(n);
                    }
                }
                _ => break,
            }
            i += 2;
        }
        let operands: usize = groups.iter().map(Vec::len).sum();
        if operands > 1 {
            return Some(groups);
        }
    }
    None
}

/// Whether `input` contains an expression the math agent can evaluate.
pub(crate) fn has_arithmetic(input: &str) -> bool {
    parse_arithmetic(input).is_some()
}

/// Plan add/multiply calls for arithmetic in `input`, multiplication first.
fn plan_arithmetic(input: &str) -> Vec<ToolInvocation> {
    let Some(groups) = parse_arithmetic(input) else {
        return Vec::new();
    };

    let mut plan = Vec::new();
    let mut sums = Vec::new();
    for group in groups {
        let mut product = group[0];
        for n in &group[1..] {
            plan.push(ToolInvocation::new("multiply", json!({ "a": product, "b": n })));
            product = tools::multiply(product, *n);
        }
        sums.push(product);
    }

    let mut total = sums[0];
    for n in &sums[1..] {
        plan.push(ToolInvocation::new("add", json!({ "a": total, "b": n })));
        total = tools::add(total, *n);
    }
    plan
}

fn is_follow_up(input: &str) -> bool {
    let normalized = input
        .trim()
        .trim_end_matches(['?', '.', '!'])
        .to_lowercase();
    FOLLOW_UPS.contains(&normalized.as_str())
}

/// The topic to search for. Follow-ups reuse the most recent real question.
fn research_topic(input: &str, memory: &SessionMemory) -> String {
    if !is_follow_up(input) {
        return input.trim().to_string();
    }
    // The current input is already the newest user message in memory.
    (1..)
        .map_while(|skip| memory.previous_user_message(skip))
        .find(|message| !is_follow_up(message))
        .map(|topic| topic.trim().to_string())
        .unwrap_or_else(|| input.trim().to_string())
}

fn plan_market(input: &str) -> Vec<ToolInvocation> {
    let lower = input.to_lowercase();
    let Some(index) = input
        .split_whitespace()
        .find_map(tools::normalize_index)
        .or_else(|| tools::normalize_index(input))
    else {
        return Vec::new();
    };

    let wants_update = ["update", "set", "push", "change"]
        .iter()
        .any(|verb| lower.contains(verb));
    let value = input
        .split_whitespace()
        .filter_map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_digit() && c != '.')
                .replace(',', "")
                .parse::<f64>()
                .ok()
        })
        .last();

    match (wants_update, value) {
        (true, Some(value)) => vec![ToolInvocation::new(
            "push_index",
            json!({ "index_name": index, "value": value }),
        )],
        _ => vec![ToolInvocation::new("get_index", json!({ "index_name": index }))],
    }
}

fn describe_market_result(result: &ToolResult) -> String {
    match &result.output {
        Value::String(message) => message.clone(),
        data if data.get("error").is_some() => {
            data["error"].as_str().unwrap_or_default().to_string()
        }
        data => format!(
            "{} is at {} ({}), volume {}.",
            data["index"].as_str().unwrap_or_default(),
            data["value"],
            data["change"].as_str().unwrap_or_default(),
            data["volume"].as_str().unwrap_or_default(),
        ),
    }
}

fn title_case(topic: &str) -> String {
    topic
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Draft an article. A revision with feedback adds a concrete example.
pub fn write_article(topic: &str, research: Option<&str>, feedback: Option<&str>) -> String {
    let topic = topic.trim().trim_end_matches(['?', '.', '!']);
    let title = title_case(topic);
    let mut article = format!(
        "# {title}\n\n{title} keeps coming up in conversations about how teams build and ship \
         software. This piece looks at where it came from and why it matters today."
    );

    if let Some(notes) = research.filter(|n| !n.trim().is_empty()) {
        article.push_str("\n\n## What the research says\n\n");
        article.push_str(notes.trim());
    }

    if feedback.is_some() {
        article.push_str(&format!(
            "\n\n## In practice\n\nFor example, a small team adopting {topic} usually starts with \
             one well understood use case, measures the result, and only then widens the rollout."
        ));
    }

    article.push_str(&format!(
        "\n\n## Takeaway\n\n{title} rewards careful, incremental adoption."
    ));
    article
}

/// Score an article. Approval needs a score of at least 8.
pub fn critique(article: &str) -> Review {
    let mut score = 6;
    let mut issues = Vec::new();

    if article.contains("For example") {
        score += 2;
    } else {
        issues.push("No concrete examples".to_string());
    }
    if article.chars().count() > 400 {
        score += 1;
    } else {
        issues.push("Article is too short".to_string());
    }

    let approved = score >= 8;
    let feedback = if approved {
        "Clear and well supported. Ready to publish.".to_string()
    } else {
        format!("Revise before publishing: {}.", issues.join("; "))
    };

    Review {
        approved,
        score,
        issues,
        feedback,
    }
}
