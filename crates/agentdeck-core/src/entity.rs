// ABOUTME: Identifies the three kinds of runnable entities and how they are described to clients.
// ABOUTME: EntityKind parses route segments; EntityDescriptor is the listing shape for /entities/{kind}.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The variant of runnable an entity id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Agent,
    Team,
    Flow,
}

impl EntityKind {
    /// All kinds, in listing order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Agent, EntityKind::Team, EntityKind::Flow];

    /// Return the lowercase label used in routes and stored rows.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Agent => "agent",
            EntityKind::Team => "team",
            EntityKind::Flow => "flow",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a route segment or stored row names no known entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    /// Accepts singular and plural forms, so both `/entities/agent` and
    /// `/entities/agents` resolve.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" | "agents" => Ok(EntityKind::Agent),
            "team" | "teams" => Ok(EntityKind::Team),
            "flow" | "flows" => Ok(EntityKind::Flow),
            other => Err(UnknownEntityKind(other.to_string())),
        }
    }
}

/// One member agent of a team, with the agents it may hand control to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub description: String,
    pub can_handoff_to: Vec<String>,
}

/// How an entity is presented by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<TeamMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

impl EntityDescriptor {
    /// Describe an entity with the display name derived from its id.
    pub fn new(kind: EntityKind, id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: display_name(kind, id),
            description: description.to_string(),
            root_agent: None,
            agents: Vec::new(),
            steps: Vec::new(),
        }
    }
}

/// Build a display name from an entity id: underscores become spaces,
/// each word is title-cased, and agents get an " Agent" suffix.
pub fn display_name(kind: EntityKind, id: &str) -> String {
    let words: Vec<String> = id
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();

    let mut name = words.join(" ");
    if kind == EntityKind::Agent {
        name.push_str(" Agent");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_singular_and_plural() {
        assert_eq!("agent".parse::<EntityKind>().unwrap(), EntityKind::Agent);
        assert_eq!("teams".parse::<EntityKind>().unwrap(), EntityKind::Team);
        assert_eq!("Flow".parse::<EntityKind>().unwrap(), EntityKind::Flow);

        let err = "widget".parse::<EntityKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown entity kind: widget");
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&EntityKind::Team).unwrap();
        assert_eq!(json, "\"team\"");
        assert_eq!(EntityKind::Flow.to_string(), "flow");
    }

    #[test]
    fn display_names_follow_listing_convention() {
        assert_eq!(display_name(EntityKind::Agent, "math"), "Math Agent");
        assert_eq!(
            display_name(EntityKind::Team, "market_research_team"),
            "Market Research Team"
        );
        assert_eq!(display_name(EntityKind::Flow, "story_critic_flow"), "Story Critic Flow");
    }

    #[test]
    fn descriptor_omits_empty_team_fields() {
        let desc = EntityDescriptor::new(EntityKind::Agent, "math", "Adds and multiplies");
        let json = serde_json::to_value(&desc).unwrap();

        assert_eq!(json["name"], "Math Agent");
        assert!(json.get("root_agent").is_none());
        assert!(json.get("agents").is_none());
        assert!(json.get("steps").is_none());
    }
}
