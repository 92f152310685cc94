// ABOUTME: Tool implementations and their JSON schema definitions for the built-in agents.
// ABOUTME: Math and market tools are pure; push_index needs a human confirmation before it acts.

use serde_json::{Value, json};

/// Mock market data: (index, value, change, volume).
const MARKET_DATA: [(&str, f64, &str, &str); 5] = [
    ("SP500", 5234.18, "+0.45%", "3.2B"),
    ("NASDAQ", 16742.39, "+0.67%", "4.1B"),
    ("DOW", 39872.99, "+0.23%", "2.8B"),
    ("NIFTY", 24680.50, "+0.32%", "1.8B"),
    ("SENSEX", 81205.75, "+0.28%", "1.5B"),
];

/// Answers that confirm a guarded operation.
const CONFIRMATIONS: [&str; 4] = ["yes", "y", "confirm", "approved"];

pub fn add(a: f64, b: f64) -> f64 {
    let result = a + b;
    tracing::debug!(a, b, result, "add");
    result
}

pub fn multiply(a: f64, b: f64) -> f64 {
    let result = a * b;
    tracing::debug!(a, b, result, "multiply");
    result
}

/// Render a number without a trailing ".0" when it is integral.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Map a free-form index name onto one of the tracked symbols.
pub fn normalize_index(name: &str) -> Option<&'static str> {
    let upper = name.to_uppercase();
    let compact: String = upper
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if compact.contains("NIFTY") {
        return Some("NIFTY");
    }
    if upper.contains("S&P") || compact.contains("SP500") {
        return Some("SP500");
    }
    MARKET_DATA
        .iter()
        .map(|(symbol, ..)| *symbol)
        .find(|symbol| compact.contains(symbol))
}

/// Current value of a market index, or an error object for unknown names.
pub fn get_index(name: &str) -> Value {
    let found = normalize_index(name).and_then(|symbol| {
        MARKET_DATA
            .iter()
            .find(|(s, ..)| *s == symbol)
    });

    match found {
        Some((symbol, value, change, volume)) => json!({
            "index": symbol,
            "value": value,
            "change": change,
            "volume": volume,
        }),
        None => json!({ "error": format!("Index '{name}' not found") }),
    }
}

/// The confirmation question asked before push_index changes anything.
pub fn push_index_prompt(index: &str, value: f64) -> String {
    format!(
        "⚠️ CONFIRM: Update '{index}' to {}? (yes/no) ",
        format_number(value)
    )
}

/// Whether a human answer approves a guarded operation.
pub fn is_confirmation(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    CONFIRMATIONS.contains(&answer.as_str())
}

/// Result of push_index once the operator has answered.
pub fn push_index_outcome(index: &str, value: f64, answer: &str) -> (bool, String) {
    if is_confirmation(answer) {
        let message = format!(
            "✅ SUCCESS: Index '{index}' updated to {}",
            format_number(value)
        );
        tracing::info!(index, value, "push_index confirmed");
        (true, message)
    } else {
        let message = format!(
            "❌ ABORTED: Update to '{index}' was cancelled by operator (response: '{answer}')"
        );
        tracing::info!(index, answer, "push_index aborted");
        (false, message)
    }
}

/// Provider-agnostic JSON schemas for every tool the built-in agents use.
pub fn all_tool_definitions() -> Vec<Value> {
    vec![
        binary_number_tool("add", "Add two numbers and return the sum."),
        binary_number_tool("multiply", "Multiply two numbers and return the product."),
        web_search(),
        get_index_tool(),
        push_index_tool(),
        delegate_tool("call_research_agent", "Delegate a research question to the research agent."),
        delegate_tool("call_math_agent", "Delegate an arithmetic question to the math agent."),
        handoff_tool(),
    ]
}

/// Look up one tool's schema by name.
pub fn tool_definition(name: &str) -> Option<Value> {
    all_tool_definitions()
        .into_iter()
        .find(|tool| tool["name"] == name)
}

fn binary_number_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "parameters": {
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First operand." },
                "b": { "type": "number", "description": "Second operand." }
            },
            "required": ["a", "b"]
        }
    })
}

fn web_search() -> Value {
    json!({
        "name": "web_search",
        "description": "Search the web for information and return a short summary.",
        "parameters": {
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for." }
            },
            "required": ["query"]
        }
    })
}

fn get_index_tool() -> Value {
    json!({
        "name": "get_index",
        "description": "Get the current value of a market index (SP500, NASDAQ, DOW, NIFTY, SENSEX).",
        "parameters": {
            "type": "object",
            "properties": {
                "index_name": { "type": "string", "description": "Name of the index." }
            },
            "required": ["index_name"]
        }
    })
}

fn push_index_tool() -> Value {
    json!({
        "name": "push_index",
        "description": "Update a market index value. Requires human confirmation before it runs.",
        "parameters": {
            "type": "object",
            "properties": {
                "index_name": { "type": "string", "description": "Name of the index to update." },
                "value": { "type": "number", "description": "New value to set." }
            },
            "required": ["index_name", "value"]
        }
    })
}

fn delegate_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "parameters": {
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "The task to delegate." }
            },
            "required": ["task"]
        }
    })
}

fn handoff_tool() -> Value {
    json!({
        "name": "handoff",
        "description": "Hand control of the conversation to another agent on the team.",
        "parameters": {
            "type": "object",
            "properties": {
                "to_agent": {
                    "type": "string",
                    "description": "Name of the agent to hand off to."
                },
                "reason": { "type": "string", "description": "Why the handoff is needed." }
            },
            "required": ["to_agent"]
        }
    })
}
