//! Legacy JSON fallback store.
//!
//! Used only when the SQLite store cannot be initialised. Entities are
//! mirrored into `agents.json`, `tasks.json`, `sessions.json` plus a
//! `metadata.json` carrying the schema version. Audit history is kept in
//! memory only; a deployment running on the fallback has durable primary
//! state but ephemeral history.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use super::{AuditEntry, NewAuditEntry, StateStore, SCHEMA_VERSION};
use crate::agent::Agent;
use crate::error::{MindmuxError, Result};
use crate::session::SessionRecord;
use crate::task::Task;

#[derive(Debug)]
pub struct JsonFallbackStore {
    dir: PathBuf,
    agents: Mutex<HashMap<String, Agent>>,
    tasks: Mutex<HashMap<String, Task>>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    audit: Mutex<Vec<AuditEntry>>,
    next_audit_id: AtomicI64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Metadata {
    schema_version: i64,
    saved_at: chrono::DateTime<Utc>,
}

impl JsonFallbackStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| MindmuxError::Store(format!("cannot create data dir: {}", e)))?;

        let agents: HashMap<String, Agent> = read_json(&dir.join("agents.json"))?;
        let tasks: HashMap<String, Task> = read_json(&dir.join("tasks.json"))?;
        let sessions: HashMap<String, SessionRecord> = read_json(&dir.join("sessions.json"))?;

        for agent in agents.values() {
            agent
                .check_invariants()
                .map_err(|e| MindmuxError::InvariantViolation {
                    path: dir.join("agents.json").display().to_string(),
                    detail: e.to_string(),
                })?;
        }
        for task in tasks.values() {
            task.check_invariants()
                .map_err(|e| MindmuxError::InvariantViolation {
                    path: dir.join("tasks.json").display().to_string(),
                    detail: e.to_string(),
                })?;
        }

        let store = Self {
            dir: dir.to_path_buf(),
            agents: Mutex::new(agents),
            tasks: Mutex::new(tasks),
            sessions: Mutex::new(sessions),
            audit: Mutex::new(Vec::new()),
            next_audit_id: AtomicI64::new(1),
        };
        store.write_metadata()?;
        Ok(store)
    }

    fn write_metadata(&self) -> Result<()> {
        write_json(
            &self.dir.join("metadata.json"),
            &Metadata {
                schema_version: SCHEMA_VERSION,
                saved_at: Utc::now(),
            },
        )
    }

    fn flush_agents(&self, agents: &HashMap<String, Agent>) -> Result<()> {
        write_json(&self.dir.join("agents.json"), agents)
    }

    fn flush_tasks(&self, tasks: &HashMap<String, Task>) -> Result<()> {
        write_json(&self.dir.join("tasks.json"), tasks)
    }

    fn flush_sessions(&self, sessions: &HashMap<String, SessionRecord>) -> Result<()> {
        write_json(&self.dir.join("sessions.json"), sessions)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| MindmuxError::Store(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| MindmuxError::InvariantViolation {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    // Write to a sibling temp file then rename, so a crash mid-write
    // cannot leave a truncated record behind.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw)
        .map_err(|e| MindmuxError::Store(format!("cannot write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| MindmuxError::Store(format!("cannot replace {}: {}", path.display(), e)))?;
    Ok(())
}

impl StateStore for JsonFallbackStore {
    fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        agent.check_invariants()?;
        let mut agents = self.agents.lock();
        agents.insert(agent.id.clone(), agent.clone());
        self.flush_agents(&agents)
    }

    fn delete_agent(&self, id: &str) -> Result<()> {
        let mut agents = self.agents.lock();
        agents.remove(id);
        self.flush_agents(&agents)
    }

    fn load_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.agents.lock().values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    fn upsert_task(&self, task: &Task) -> Result<()> {
        task.check_invariants()?;
        let mut tasks = self.tasks.lock();
        tasks.insert(task.id.clone(), task.clone());
        self.flush_tasks(&tasks)
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock();
        tasks.remove(id);
        self.flush_tasks(&tasks)
    }

    fn load_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    fn upsert_session(&self, session: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock();
        sessions.insert(session.id.clone(), session.clone());
        self.flush_sessions(&sessions)
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        sessions.remove(id);
        self.flush_sessions(&sessions)
    }

    fn load_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> =
            self.sessions.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64> {
        let id = self.next_audit_id.fetch_add(1, Ordering::SeqCst);
        self.audit.lock().push(AuditEntry {
            id,
            timestamp: entry.timestamp,
            event: entry.event.clone(),
            entity_kind: entry.entity_kind.clone(),
            entity_id: entry.entity_id.clone(),
            before: entry.before.clone(),
            after: entry.after.clone(),
            actor: entry.actor.clone(),
        });
        Ok(id)
    }

    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock();
        Ok(audit.iter().rev().take(limit).cloned().collect())
    }

    fn audit_for_entity(&self, entity_kind: &str, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock();
        Ok(audit
            .iter()
            .filter(|e| e.entity_kind == entity_kind && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    fn audit_for_event(&self, event: &str) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock();
        Ok(audit.iter().filter(|e| e.event == event).cloned().collect())
    }

    fn schema_version(&self) -> Result<i64> {
        Ok(SCHEMA_VERSION)
    }

    fn close(&self) -> Result<()> {
        self.write_metadata()
    }
}
