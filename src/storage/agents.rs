//! Write-through repository for agent records.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::audit::{self, AuditLog, ENTITY_AGENT};
use super::{StateCache, StateStore};
use crate::agent::{Agent, AgentKind, AgentRuntimeConfig, Capability};
use crate::error::{MindmuxError, Result};

/// Parameters for creating an agent.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub kind: AgentKind,
    pub capabilities: BTreeSet<Capability>,
    pub config: AgentRuntimeConfig,
}

/// The only writer of agent records. Validates, writes through to the
/// durable store, updates the cache, then mirrors into the audit log.
/// Mutations are serialized under one lock.
pub struct AgentStore {
    store: Arc<dyn StateStore>,
    cache: Arc<StateCache>,
    audit: Arc<AuditLog>,
    mutate_lock: parking_lot::Mutex<()>,
}

impl AgentStore {
    pub fn new(store: Arc<dyn StateStore>, cache: Arc<StateCache>, audit: Arc<AuditLog>) -> Self {
        Self {
            store,
            cache,
            audit,
            mutate_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Create and persist a new agent. Name uniqueness is enforced here.
    pub fn create(&self, params: NewAgent) -> Result<Agent> {
        let _guard = self.mutate_lock.lock();
        if self.cache.agent_by_name(&params.name).is_some() {
            return Err(MindmuxError::Validation(format!(
                "an agent named '{}' already exists",
                params.name
            )));
        }

        let agent = Agent::new(params.name, params.kind, params.capabilities, params.config)?;

        self.store.upsert_agent(&agent)?;
        self.cache.put_agent(agent.clone());
        self.audit.record(
            "agent:created",
            ENTITY_AGENT,
            &agent.id,
            None,
            Some(audit::snapshot(&agent)),
        );
        tracing::info!(agent_id = %agent.id, name = %agent.name, kind = %agent.kind, "agent created");
        Ok(agent)
    }

    /// Look up by id first, then by name.
    pub fn get(&self, id_or_name: &str) -> Result<Agent> {
        self.cache
            .agent(id_or_name)
            .or_else(|| self.cache.agent_by_name(id_or_name))
            .ok_or_else(|| MindmuxError::NotFound {
                kind: "agent",
                id: id_or_name.to_string(),
            })
    }

    pub fn list(&self) -> Vec<Agent> {
        self.cache.agents()
    }

    /// Apply a mutation to one agent under the write-through discipline.
    /// `event` names the audit entry, e.g. `agent:started`.
    pub fn update<F>(&self, id: &str, event: &str, mutate: F) -> Result<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let _guard = self.mutate_lock.lock();
        let before = self.cache.agent(id).ok_or_else(|| MindmuxError::NotFound {
            kind: "agent",
            id: id.to_string(),
        })?;

        let mut agent = before.clone();
        mutate(&mut agent);
        agent.touch();
        agent.check_invariants()?;

        self.store.upsert_agent(&agent)?;
        self.cache.put_agent(agent.clone());
        self.audit.record(
            event,
            ENTITY_AGENT,
            &agent.id,
            Some(audit::snapshot(&before)),
            Some(audit::snapshot(&agent)),
        );
        Ok(agent)
    }

    /// Delete by id or name. The caller is responsible for having stopped
    /// any live session first.
    pub fn delete(&self, id_or_name: &str) -> Result<Agent> {
        let _guard = self.mutate_lock.lock();
        let agent = self.get(id_or_name)?;

        self.store.delete_agent(&agent.id)?;
        self.cache.remove_agent(&agent.id);
        self.audit.record(
            "agent:deleted",
            ENTITY_AGENT,
            &agent.id,
            Some(audit::snapshot(&agent)),
            None,
        );
        tracing::info!(agent_id = %agent.id, name = %agent.name, "agent deleted");
        Ok(agent)
    }
}
