//! Durable state and the write-through repositories built on top of it.
//!
//! All reads are served from the in-memory [`cache::StateCache`]; all
//! writes go to the durable store first, then the cache, then the audit
//! log. If the durable write fails, nothing else happens: readers only
//! ever see what the store accepted.

pub mod agents;
pub mod audit;
pub mod cache;
pub mod fallback;
pub mod sessions;
pub mod tasks;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{MindmuxError, Result};
use crate::session::SessionRecord;
use crate::task::Task;

pub use agents::{AgentStore, NewAgent};
pub use audit::{AuditEntry, AuditLog, NewAuditEntry};
pub use cache::StateCache;
pub use fallback::JsonFallbackStore;
pub use sessions::SessionStore;
pub use tasks::TaskStore;

/// Current durable schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Contract for the durable store. Operations are synchronous and short;
/// callers in async contexts hold no other locks across them.
pub trait StateStore: Send + Sync {
    fn upsert_agent(&self, agent: &Agent) -> Result<()>;
    fn delete_agent(&self, id: &str) -> Result<()>;
    fn load_agents(&self) -> Result<Vec<Agent>>;

    fn upsert_task(&self, task: &Task) -> Result<()>;
    fn delete_task(&self, id: &str) -> Result<()>;
    fn load_tasks(&self) -> Result<Vec<Task>>;

    fn upsert_session(&self, session: &SessionRecord) -> Result<()>;
    fn delete_session(&self, id: &str) -> Result<()>;
    fn load_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Append one audit entry, returning the assigned monotonic id.
    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64>;
    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;
    fn audit_for_entity(&self, entity_kind: &str, entity_id: &str) -> Result<Vec<AuditEntry>>;
    fn audit_for_event(&self, event: &str) -> Result<Vec<AuditEntry>>;

    fn schema_version(&self) -> Result<i64>;

    /// Flush and release what can be released. Called once at shutdown.
    fn close(&self) -> Result<()>;
}

/// Open the durable store for a data directory: SQLite at
/// `<dataDir>/state.db`, falling back to the legacy JSON layout only
/// when SQLite cannot be initialised.
pub fn open_store(data_dir: &Path) -> Result<Arc<dyn StateStore>> {
    match SqliteStore::open(data_dir.join("state.db")) {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "durable store unavailable, falling back to JSON files"
            );
            Ok(Arc::new(JsonFallbackStore::open(data_dir)?))
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    capabilities TEXT NOT NULL,
    config TEXT NOT NULL,
    status TEXT NOT NULL,
    session_name TEXT,
    is_running INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agents_name ON agents(name);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    prompt TEXT NOT NULL,
    required_capabilities TEXT NOT NULL,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL,
    assigned_agent_id TEXT,
    depends_on TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    timeout_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    queued_at TEXT,
    assigned_at TEXT,
    started_at TEXT,
    completed_at TEXT,
    result TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_assigned_agent ON tasks(assigned_agent_id);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    multiplexer_session TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    process_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent_id);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_name TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    changes TEXT NOT NULL,
    actor TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_kind, entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// SQLite-backed durable store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MindmuxError::Store(format!("cannot create data dir: {}", e)))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
            path,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA_SQL)?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    params![SCHEMA_VERSION, Utc::now().to_rfc3339()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(MindmuxError::InvariantViolation {
                    path: self.path.display().to_string(),
                    detail: format!("schema version {} is not supported (expected {})", v, SCHEMA_VERSION),
                });
            }
        }
        Ok(())
    }

    fn invariant(&self, detail: String) -> MindmuxError {
        MindmuxError::InvariantViolation {
            path: self.path.display().to_string(),
            detail,
        }
    }
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

fn parse_opt_ts(raw: Option<String>) -> std::result::Result<Option<DateTime<Utc>>, String> {
    raw.map(|s| parse_ts(&s)).transpose()
}

impl StateStore for SqliteStore {
    fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        agent.check_invariants()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agents \
             (id, name, kind, capabilities, config, status, session_name, is_running, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
             name = ?2, kind = ?3, capabilities = ?4, config = ?5, status = ?6, \
             session_name = ?7, is_running = ?8, updated_at = ?10",
            params![
                agent.id,
                agent.name,
                agent.kind.as_str(),
                serde_json::to_string(&agent.capabilities)?,
                serde_json::to_string(&agent.config)?,
                agent.status.as_str(),
                agent.session_name,
                agent.is_running as i64,
                to_rfc3339(agent.created_at),
                to_rfc3339(agent.last_activity),
            ],
        )?;
        Ok(())
    }

    fn delete_agent(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn load_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, kind, capabilities, config, status, session_name, is_running, \
             created_at, updated_at FROM agents ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut agents = Vec::new();
        for row in rows {
            let (id, name, kind, caps, config, status, session_name, is_running, created, updated) =
                row?;
            let agent = Agent {
                id,
                name,
                kind: kind.parse().map_err(|e: MindmuxError| self.invariant(e.to_string()))?,
                capabilities: serde_json::from_str(&caps)
                    .map_err(|e| self.invariant(format!("bad capabilities column: {}", e)))?,
                config: serde_json::from_str(&config)
                    .map_err(|e| self.invariant(format!("bad config column: {}", e)))?,
                status: status
                    .parse()
                    .map_err(|e: MindmuxError| self.invariant(e.to_string()))?,
                session_name,
                is_running: is_running != 0,
                created_at: parse_ts(&created).map_err(|e| self.invariant(e))?,
                last_activity: parse_ts(&updated).map_err(|e| self.invariant(e))?,
            };
            agent
                .check_invariants()
                .map_err(|e| self.invariant(e.to_string()))?;
            agents.push(agent);
        }
        Ok(agents)
    }

    fn upsert_task(&self, task: &Task) -> Result<()> {
        task.check_invariants()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks \
             (id, prompt, required_capabilities, priority, status, assigned_agent_id, depends_on, \
              retry_count, max_retries, timeout_ms, created_at, queued_at, assigned_at, \
              started_at, completed_at, result, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
             ON CONFLICT(id) DO UPDATE SET \
             prompt = ?2, required_capabilities = ?3, priority = ?4, status = ?5, \
             assigned_agent_id = ?6, depends_on = ?7, retry_count = ?8, max_retries = ?9, \
             timeout_ms = ?10, queued_at = ?12, assigned_at = ?13, started_at = ?14, \
             completed_at = ?15, result = ?16, error_message = ?17",
            params![
                task.id,
                task.prompt,
                serde_json::to_string(&task.required_capabilities)?,
                task.priority as i64,
                task.status.as_str(),
                task.assigned_agent_id,
                serde_json::to_string(&task.depends_on)?,
                task.retry_count as i64,
                task.max_retries as i64,
                task.timeout.as_millis() as i64,
                to_rfc3339(task.created_at),
                task.queued_at.map(to_rfc3339),
                task.assigned_at.map(to_rfc3339),
                task.started_at.map(to_rfc3339),
                task.completed_at.map(to_rfc3339),
                task.result,
                task.error_message,
            ],
        )?;
        Ok(())
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn load_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, prompt, required_capabilities, priority, status, assigned_agent_id, \
             depends_on, retry_count, max_retries, timeout_ms, created_at, queued_at, \
             assigned_at, started_at, completed_at, result, error_message \
             FROM tasks ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Option<String>>(12)?,
                row.get::<_, Option<String>>(13)?,
                row.get::<_, Option<String>>(14)?,
                row.get::<_, Option<String>>(15)?,
                row.get::<_, Option<String>>(16)?,
            ))
        })?;

        let mut tasks = Vec::new();
        for row in rows {
            let (
                id,
                prompt,
                required,
                priority,
                status,
                assigned_agent_id,
                depends_on,
                retry_count,
                max_retries,
                timeout_ms,
                created_at,
                queued_at,
                assigned_at,
                started_at,
                completed_at,
                result,
                error_message,
            ) = row?;
            let task = Task {
                id,
                prompt,
                required_capabilities: serde_json::from_str(&required)
                    .map_err(|e| self.invariant(format!("bad requiredCapabilities column: {}", e)))?,
                priority: priority as u8,
                status: status
                    .parse()
                    .map_err(|e: MindmuxError| self.invariant(e.to_string()))?,
                assigned_agent_id,
                depends_on: serde_json::from_str(&depends_on)
                    .map_err(|e| self.invariant(format!("bad dependsOn column: {}", e)))?,
                retry_count: retry_count as u32,
                max_retries: max_retries as u32,
                timeout: std::time::Duration::from_millis(timeout_ms.max(0) as u64),
                created_at: parse_ts(&created_at).map_err(|e| self.invariant(e))?,
                queued_at: parse_opt_ts(queued_at).map_err(|e| self.invariant(e))?,
                assigned_at: parse_opt_ts(assigned_at).map_err(|e| self.invariant(e))?,
                started_at: parse_opt_ts(started_at).map_err(|e| self.invariant(e))?,
                completed_at: parse_opt_ts(completed_at).map_err(|e| self.invariant(e))?,
                result,
                error_message,
            };
            task.check_invariants()
                .map_err(|e| self.invariant(e.to_string()))?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    fn upsert_session(&self, session: &SessionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions \
             (id, agent_id, multiplexer_session, status, started_at, ended_at, process_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(id) DO UPDATE SET \
             agent_id = ?2, multiplexer_session = ?3, status = ?4, ended_at = ?6, process_id = ?7",
            params![
                session.id,
                session.agent_id,
                session.multiplexer_session,
                session.status.as_str(),
                to_rfc3339(session.started_at),
                session.ended_at.map(to_rfc3339),
                session.process_id.map(|p| p as i64),
            ],
        )?;
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn load_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, multiplexer_session, status, started_at, ended_at, process_id \
             FROM sessions ORDER BY started_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, agent_id, mux_session, status, started_at, ended_at, process_id) = row?;
            sessions.push(SessionRecord {
                id,
                agent_id,
                multiplexer_session: mux_session,
                status: status
                    .parse()
                    .map_err(|e: MindmuxError| self.invariant(e.to_string()))?,
                started_at: parse_ts(&started_at).map_err(|e| self.invariant(e))?,
                ended_at: parse_opt_ts(ended_at).map_err(|e| self.invariant(e))?,
                process_id: process_id.map(|p| p as u32),
            });
        }
        Ok(sessions)
    }

    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64> {
        let changes = serde_json::json!({
            "before": entry.before,
            "after": entry.after,
        });
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log (timestamp, event_name, entity_kind, entity_id, changes, actor) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                to_rfc3339(entry.timestamp),
                entry.event,
                entry.entity_kind,
                entry.entity_id,
                serde_json::to_string(&changes)?,
                entry.actor,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.query_audit(
            "SELECT id, timestamp, event_name, entity_kind, entity_id, changes, actor \
             FROM audit_log ORDER BY id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    fn audit_for_entity(&self, entity_kind: &str, entity_id: &str) -> Result<Vec<AuditEntry>> {
        self.query_audit(
            "SELECT id, timestamp, event_name, entity_kind, entity_id, changes, actor \
             FROM audit_log WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY id",
            params![entity_kind, entity_id],
        )
    }

    fn audit_for_event(&self, event: &str) -> Result<Vec<AuditEntry>> {
        self.query_audit(
            "SELECT id, timestamp, event_name, entity_kind, entity_id, changes, actor \
             FROM audit_log WHERE event_name = ?1 ORDER BY id",
            params![event],
        )
    }

    fn schema_version(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let version: i64 =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })?;
        Ok(version)
    }

    fn close(&self) -> Result<()> {
        let conn = self.conn.lock();
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        Ok(())
    }
}

impl SqliteStore {
    fn query_audit(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, timestamp, event, entity_kind, entity_id, changes, actor) = row?;
            let changes: serde_json::Value = serde_json::from_str(&changes)
                .map_err(|e| self.invariant(format!("bad audit changes column: {}", e)))?;
            let opt = |v: &serde_json::Value| {
                if v.is_null() {
                    None
                } else {
                    Some(v.clone())
                }
            };
            entries.push(AuditEntry {
                id,
                timestamp: parse_ts(&timestamp).map_err(|e| self.invariant(e))?,
                event,
                entity_kind,
                entity_id,
                before: changes.get("before").and_then(|v| opt(v)),
                after: changes.get("after").and_then(|v| opt(v)),
                actor,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, AgentRuntimeConfig, Capability};
    use crate::task::{CapabilitySelector, TaskStatus};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn sample_agent(name: &str) -> Agent {
        let mut caps = BTreeSet::new();
        caps.insert(Capability::CodeGeneration);
        Agent::new(
            name.to_string(),
            AgentKind::Claude,
            caps,
            AgentRuntimeConfig::default(),
        )
        .unwrap()
    }

    fn sample_task(prompt: &str) -> Task {
        Task::new(
            prompt.to_string(),
            60,
            CapabilitySelector::Any,
            vec![],
            3,
            Duration::from_secs(120),
        )
        .unwrap()
    }

    #[test]
    fn test_schema_version_recorded() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_agent_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut agent = sample_agent("dev-1");
        agent.session_name = Some("mindmux-x".to_string());
        agent.is_running = true;

        store.upsert_agent(&agent).unwrap();
        let loaded = store.load_agents().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "dev-1");
        assert_eq!(loaded[0].kind, AgentKind::Claude);
        assert!(loaded[0].is_running);
        assert_eq!(loaded[0].session_name.as_deref(), Some("mindmux-x"));
        assert!(loaded[0].capabilities.contains(&Capability::CodeGeneration));
    }

    #[test]
    fn test_agent_name_unique_at_store_level() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_agent(&sample_agent("dev-1")).unwrap();
        let err = store.upsert_agent(&sample_agent("dev-1")).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_task_round_trip_preserves_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let mut task = sample_task("do the thing");
        task.status = TaskStatus::Queued;
        task.queued_at = Some(Utc::now());

        store.upsert_task(&task).unwrap();
        let loaded = store.load_tasks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].prompt, "do the thing");
        assert_eq!(loaded[0].priority, 60);
        assert_eq!(loaded[0].status, TaskStatus::Queued);
        assert_eq!(loaded[0].timeout, Duration::from_secs(120));
        assert!(loaded[0].queued_at.is_some());
    }

    #[test]
    fn test_task_update_overwrites() {
        let store = SqliteStore::in_memory().unwrap();
        let mut task = sample_task("retry me");
        store.upsert_task(&task).unwrap();

        task.retry_count = 2;
        task.error_message = Some("Retry 2/3: flaky".to_string());
        store.upsert_task(&task).unwrap();

        let loaded = store.load_tasks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].retry_count, 2);
        assert_eq!(
            loaded[0].error_message.as_deref(),
            Some("Retry 2/3: flaky")
        );
    }

    #[test]
    fn test_session_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut session =
            SessionRecord::open("agent-1".to_string(), "mindmux-agent-1".to_string());
        store.upsert_session(&session).unwrap();

        session.close();
        store.upsert_session(&session).unwrap();

        let loaded = store.load_sessions().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].status,
            crate::session::SessionStatus::Terminated
        );
        assert!(loaded[0].ended_at.is_some());
    }

    #[test]
    fn test_delete_agent_and_task() {
        let store = SqliteStore::in_memory().unwrap();
        let agent = sample_agent("gone-soon");
        let task = sample_task("orphan");
        store.upsert_agent(&agent).unwrap();
        store.upsert_task(&task).unwrap();

        store.delete_agent(&agent.id).unwrap();
        store.delete_task(&task.id).unwrap();
        assert!(store.load_agents().unwrap().is_empty());
        assert!(store.load_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_open_store_prefers_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(dir.path()).unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(dir.path().join("state.db").exists());
    }
}
