// ABOUTME: Session memory handed to engines: the recent message history of one conversation.
// ABOUTME: History is trimmed to an approximate token budget, keeping the newest messages.

use agentdeck_core::{MessageRole, SessionKey, SessionMessage};
use agentdeck_store::{SessionStore, StoreError};

/// Rough characters-per-token ratio used for budgeting history.
const CHARS_PER_TOKEN: usize = 4;

/// Read-only view of a session's history at the time an engine starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMemory {
    messages: Vec<SessionMessage>,
}

impl SessionMemory {
    /// Memory for a run with no session attached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a session's history, dropping the oldest messages until the
    /// remainder fits in `token_limit`.
    pub fn load(
        store: &dyn SessionStore,
        key: &SessionKey,
        token_limit: usize,
    ) -> Result<Self, StoreError> {
        let history = store.history(key)?;
        let budget = token_limit.saturating_mul(CHARS_PER_TOKEN);

        let mut used = 0usize;
        let mut keep = history.len();
        for message in history.iter().rev() {
            used += message.content.chars().count();
            if used > budget {
                break;
            }
            keep -= 1;
        }

        let messages = history.into_iter().skip(keep).collect();
        Ok(Self { messages })
    }

    pub fn from_messages(messages: Vec<SessionMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[SessionMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent user message, skipping `skip` of the newest ones.
    pub fn previous_user_message(&self, skip: usize) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::User)
            .nth(skip)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_store::MemorySessionStore;

    #[test]
    fn load_keeps_newest_messages_within_budget() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new("research", "s-1");
        for i in 0..10 {
            store
                .append(&key, SessionMessage::new(MessageRole::User, format!("{i:0>8}")))
                .unwrap();
        }

        // 3 tokens = 12 chars: only one 8-char message fits.
        let memory = SessionMemory::load(&store, &key, 3).unwrap();
        assert_eq!(memory.messages().len(), 1);
        assert_eq!(memory.messages()[0].content, "00000009");

        let memory = SessionMemory::load(&store, &key, 40_000).unwrap();
        assert_eq!(memory.messages().len(), 10);
    }

    #[test]
    fn previous_user_message_skips_assistant_replies() {
        let memory = SessionMemory::from_messages(vec![
            SessionMessage::new(MessageRole::User, "rust async"),
            SessionMessage::new(MessageRole::Assistant, "Here is what I found"),
            SessionMessage::new(MessageRole::User, "tell me more"),
        ]);

        assert_eq!(memory.previous_user_message(0), Some("tell me more"));
        assert_eq!(memory.previous_user_message(1), Some("rust async"));
        assert_eq!(memory.previous_user_message(2), None);
        assert!(SessionMemory::empty().is_empty());
    }
}
