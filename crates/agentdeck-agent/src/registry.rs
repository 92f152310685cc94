// ABOUTME: Immutable map of every runnable entity, built once at startup and shared read-only.
// ABOUTME: Lookups are by (kind, id); listing returns descriptors in id order.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentdeck_core::{EntityDescriptor, EntityKind};

use crate::agents::{AgentRole, ToolAgent};
use crate::engine::Runnable;
use crate::flows::{FlowKind, StepFlow};
use crate::search::WebSearch;
use crate::teams::{HandoffTeam, OrchestratorTeam};

/// Every entity the service can run.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    entries: BTreeMap<(EntityKind, String), Arc<dyn Runnable>>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    /// The built-in agents, teams, and flows, sharing one search backend.
    pub fn builtin(search: Arc<dyn WebSearch>) -> Self {
        let mut builder = Self::builder();
        for role in AgentRole::STANDALONE {
            builder = builder.register(ToolAgent::new(role, search.clone()));
        }
        builder = builder
            .register(HandoffTeam::new(search.clone()))
            .register(OrchestratorTeam::new(search.clone()));
        for kind in FlowKind::ALL {
            builder = builder.register(StepFlow::new(kind, search.clone()));
        }
        builder.build()
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Arc<dyn Runnable>> {
        self.entries.get(&(kind, id.to_string())).cloned()
    }

    pub fn list(&self, kind: EntityKind) -> Vec<EntityDescriptor> {
        self.entries
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, runnable)| runnable.describe())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects entities before the registry is frozen.
#[derive(Default)]
pub struct EntityRegistryBuilder {
    entries: BTreeMap<(EntityKind, String), Arc<dyn Runnable>>,
}

impl EntityRegistryBuilder {
    /// Add an entity. A later registration with the same kind and id replaces
    /// the earlier one.
    pub fn register<R: Runnable + 'static>(self, runnable: R) -> Self {
        self.register_arc(Arc::new(runnable))
    }

    pub fn register_arc(mut self, runnable: Arc<dyn Runnable>) -> Self {
        let key = (runnable.kind(), runnable.id().to_string());
        if self.entries.insert(key, runnable).is_some() {
            tracing::warn!("entity registered twice; keeping the later one");
        }
        self
    }

    pub fn build(self) -> EntityRegistry {
        tracing::debug!(entities = self.entries.len(), "entity registry built");
        EntityRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::OfflineSearch;
    use crate::testing::ConfirmRunnable;

    #[test]
    fn builtin_registry_lists_each_kind() {
        let registry = EntityRegistry::builtin(Arc::new(OfflineSearch));

        let agents: Vec<String> = registry
            .list(EntityKind::Agent)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(agents, vec!["critic", "market", "math", "research", "writer"]);

        let teams = registry.list(EntityKind::Team);
        assert_eq!(teams.len(), 2);
        assert!(teams.iter().all(|t| t.root_agent.is_some()));

        let flows = registry.list(EntityKind::Flow);
        assert_eq!(flows.len(), 3);
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn lookup_is_scoped_by_kind() {
        let registry = EntityRegistry::builtin(Arc::new(OfflineSearch));
        assert!(registry.get(EntityKind::Agent, "math").is_some());
        assert!(registry.get(EntityKind::Team, "math").is_none());
        assert!(registry.get(EntityKind::Flow, "nope").is_none());
    }

    #[test]
    fn builder_accepts_custom_runnables() {
        let registry = EntityRegistry::builder()
            .register(ConfirmRunnable::new("confirm"))
            .build();
        assert_eq!(registry.list(EntityKind::Agent)[0].id, "confirm");
        assert!(!registry.is_empty());
    }
}
