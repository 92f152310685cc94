// ABOUTME: Session message types for per-conversation history.
// ABOUTME: Sessions are keyed by entity and session id and outlive any single run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn label(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// A single message in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Identifies one conversation: the same session id used with two
/// different entities yields two independent histories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub entity_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(entity_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            session_id: session_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_labels_parse_back() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::parse(role.label()), Some(role));
        }
        assert_eq!(MessageRole::parse("tool"), None);
    }
}
