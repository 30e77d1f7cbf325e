//! In-memory authoritative read view.
//!
//! Rebuilt from the durable store at startup, updated after every
//! accepted write. Not a second source of truth: on divergence the store
//! wins, which is why writers only touch the cache after the store has
//! acknowledged. Compound updates (record + secondary indexes) happen
//! under one write lock so readers never observe a half-applied write.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::agent::Agent;
use crate::session::SessionRecord;
use crate::task::{Task, TaskStatus};

#[derive(Default)]
struct CacheInner {
    agents: HashMap<String, Agent>,
    agent_ids_by_name: HashMap<String, String>,

    tasks: HashMap<String, Task>,
    task_ids_by_status: HashMap<TaskStatus, BTreeSet<String>>,
    task_ids_by_agent: HashMap<String, BTreeSet<String>>,

    sessions: HashMap<String, SessionRecord>,
    agent_by_mux_session: HashMap<String, String>,
}

impl CacheInner {
    fn unindex_task(&mut self, task: &Task) {
        if let Some(set) = self.task_ids_by_status.get_mut(&task.status) {
            set.remove(&task.id);
        }
        if let Some(agent_id) = &task.assigned_agent_id {
            if let Some(set) = self.task_ids_by_agent.get_mut(agent_id) {
                set.remove(&task.id);
            }
        }
    }

    fn index_task(&mut self, task: &Task) {
        self.task_ids_by_status
            .entry(task.status)
            .or_default()
            .insert(task.id.clone());
        if let Some(agent_id) = &task.assigned_agent_id {
            self.task_ids_by_agent
                .entry(agent_id.clone())
                .or_default()
                .insert(task.id.clone());
        }
    }
}

/// Process-wide read view over agents, tasks and sessions.
#[derive(Default)]
pub struct StateCache {
    inner: RwLock<CacheInner>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view from freshly loaded rows. O(n); called once
    /// at startup before any façade method becomes callable.
    pub fn rebuild(&self, agents: Vec<Agent>, tasks: Vec<Task>, sessions: Vec<SessionRecord>) {
        let mut inner = self.inner.write();
        *inner = CacheInner::default();

        for agent in agents {
            inner
                .agent_ids_by_name
                .insert(agent.name.clone(), agent.id.clone());
            inner.agents.insert(agent.id.clone(), agent);
        }
        for task in tasks {
            inner.index_task(&task);
            inner.tasks.insert(task.id.clone(), task);
        }
        for session in sessions {
            if session.is_live() {
                inner
                    .agent_by_mux_session
                    .insert(session.multiplexer_session.clone(), session.agent_id.clone());
            }
            inner.sessions.insert(session.id.clone(), session);
        }
    }

    // -- agents ----------------------------------------------------------

    pub fn put_agent(&self, agent: Agent) {
        let mut inner = self.inner.write();
        let old_name = inner.agents.get(&agent.id).map(|old| old.name.clone());
        if let Some(old_name) = old_name {
            if old_name != agent.name {
                inner.agent_ids_by_name.remove(&old_name);
            }
        }
        inner
            .agent_ids_by_name
            .insert(agent.name.clone(), agent.id.clone());
        inner.agents.insert(agent.id.clone(), agent);
    }

    pub fn remove_agent(&self, id: &str) -> Option<Agent> {
        let mut inner = self.inner.write();
        let agent = inner.agents.remove(id)?;
        inner.agent_ids_by_name.remove(&agent.name);
        Some(agent)
    }

    pub fn agent(&self, id: &str) -> Option<Agent> {
        self.inner.read().agents.get(id).cloned()
    }

    pub fn agent_by_name(&self, name: &str) -> Option<Agent> {
        let inner = self.inner.read();
        let id = inner.agent_ids_by_name.get(name)?;
        inner.agents.get(id).cloned()
    }

    pub fn agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.inner.read().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        agents
    }

    // -- tasks -----------------------------------------------------------

    pub fn put_task(&self, task: Task) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.tasks.get(&task.id).cloned() {
            inner.unindex_task(&old);
        }
        inner.index_task(&task);
        inner.tasks.insert(task.id.clone(), task);
    }

    pub fn remove_task(&self, id: &str) -> Option<Task> {
        let mut inner = self.inner.write();
        let task = inner.tasks.remove(id)?;
        inner.unindex_task(&task);
        Some(task)
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.inner.read().tasks.get(id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.read().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Id-keyed map of every task; used by the dependency resolver.
    pub fn task_map(&self) -> HashMap<String, Task> {
        self.inner.read().tasks.clone()
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<Task> {
        let inner = self.inner.read();
        let mut tasks: Vec<Task> = inner
            .task_ids_by_status
            .get(&status)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub fn tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        let inner = self.inner.read();
        let mut tasks: Vec<Task> = inner
            .task_ids_by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Count of tasks per status, for queue statistics.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let inner = self.inner.read();
        inner
            .task_ids_by_status
            .iter()
            .map(|(status, ids)| (*status, ids.len()))
            .collect()
    }

    // -- sessions --------------------------------------------------------

    pub fn put_session(&self, session: SessionRecord) {
        let mut inner = self.inner.write();
        if session.is_live() {
            inner
                .agent_by_mux_session
                .insert(session.multiplexer_session.clone(), session.agent_id.clone());
        } else {
            inner
                .agent_by_mux_session
                .remove(&session.multiplexer_session);
        }
        inner.sessions.insert(session.id.clone(), session);
    }

    pub fn remove_session(&self, id: &str) -> Option<SessionRecord> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(id)?;
        inner
            .agent_by_mux_session
            .remove(&session.multiplexer_session);
        Some(session)
    }

    pub fn session(&self, id: &str) -> Option<SessionRecord> {
        self.inner.read().sessions.get(id).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> =
            self.inner.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    /// Live session record for a multiplexer session name.
    pub fn live_session_for(&self, mux_session: &str) -> Option<SessionRecord> {
        let inner = self.inner.read();
        inner
            .sessions
            .values()
            .find(|s| s.multiplexer_session == mux_session && s.is_live())
            .cloned()
    }

    /// Owner agent of a live multiplexer session, if any.
    pub fn session_owner(&self, mux_session: &str) -> Option<String> {
        self.inner.read().agent_by_mux_session.get(mux_session).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, AgentRuntimeConfig};
    use crate::task::CapabilitySelector;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn agent(name: &str) -> Agent {
        Agent::new(
            name.to_string(),
            AgentKind::Claude,
            BTreeSet::new(),
            AgentRuntimeConfig::default(),
        )
        .unwrap()
    }

    fn task(prompt: &str) -> Task {
        Task::new(
            prompt.to_string(),
            50,
            CapabilitySelector::Any,
            vec![],
            3,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[test]
    fn test_agent_name_index() {
        let cache = StateCache::new();
        let a = agent("dev-1");
        let id = a.id.clone();
        cache.put_agent(a);

        assert_eq!(cache.agent_by_name("dev-1").unwrap().id, id);
        assert!(cache.agent_by_name("dev-2").is_none());

        cache.remove_agent(&id);
        assert!(cache.agent_by_name("dev-1").is_none());
    }

    #[test]
    fn test_status_index_follows_updates() {
        let cache = StateCache::new();
        let mut t = task("job");
        let id = t.id.clone();
        cache.put_task(t.clone());

        assert_eq!(cache.tasks_with_status(TaskStatus::Pending).len(), 1);
        assert!(cache.tasks_with_status(TaskStatus::Queued).is_empty());

        t.status = TaskStatus::Queued;
        t.queued_at = Some(chrono::Utc::now());
        cache.put_task(t);

        assert!(cache.tasks_with_status(TaskStatus::Pending).is_empty());
        let queued = cache.tasks_with_status(TaskStatus::Queued);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, id);
    }

    #[test]
    fn test_agent_index_follows_assignment() {
        let cache = StateCache::new();
        let mut t = task("job");
        cache.put_task(t.clone());
        assert!(cache.tasks_for_agent("a1").is_empty());

        t.assigned_agent_id = Some("a1".to_string());
        t.status = TaskStatus::Assigned;
        t.assigned_at = Some(chrono::Utc::now());
        cache.put_task(t.clone());
        assert_eq!(cache.tasks_for_agent("a1").len(), 1);

        t.assigned_agent_id = None;
        t.status = TaskStatus::Queued;
        cache.put_task(t);
        assert!(cache.tasks_for_agent("a1").is_empty());
    }

    #[test]
    fn test_rebuild_replaces_everything() {
        let cache = StateCache::new();
        cache.put_agent(agent("old"));
        cache.put_task(task("old task"));

        let fresh = agent("fresh");
        cache.rebuild(vec![fresh.clone()], vec![], vec![]);

        assert!(cache.agent_by_name("old").is_none());
        assert!(cache.tasks().is_empty());
        assert_eq!(cache.agents().len(), 1);
        assert_eq!(cache.agent(&fresh.id).unwrap().name, "fresh");
    }

    #[test]
    fn test_session_owner_tracks_liveness() {
        let cache = StateCache::new();
        let mut session = SessionRecord::open("a1".to_string(), "mindmux-a1".to_string());
        cache.put_session(session.clone());
        assert_eq!(cache.session_owner("mindmux-a1").unwrap(), "a1");

        session.close();
        cache.put_session(session);
        assert!(cache.session_owner("mindmux-a1").is_none());
    }

    #[test]
    fn test_status_counts() {
        let cache = StateCache::new();
        cache.put_task(task("one"));
        cache.put_task(task("two"));
        let mut done = task("three");
        done.status = TaskStatus::Completed;
        done.result = Some("ok".to_string());
        cache.put_task(done);

        let counts = cache.status_counts();
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&2));
        assert_eq!(counts.get(&TaskStatus::Completed), Some(&1));
    }
}
