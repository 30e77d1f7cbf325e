//! Agent lifecycle controller.
//!
//! Starts and stops agents by creating and killing their multiplexer
//! sessions, attaches the matching CLI adapter, watches health, and
//! reaps orphaned sessions at startup. It owns neither agents nor tasks;
//! every mutation goes through the stores.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{AdapterRegistry, SpawnOptions};
use crate::agent::{Agent, AgentStatus};
use crate::config::MindmuxConfig;
use crate::error::{MindmuxError, Result};
use crate::metrics::{incr, Counters};
use crate::mux::Multiplexer;
use crate::scheduler::PromptRunner;
use crate::storage::{AgentStore, SessionStore, TaskStore};
use crate::task::{CapabilitySelector, Task, TaskStatus};

/// Grace period between the adapter's quit token and the session kill.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// What an orphan sweep found and did.
#[derive(Debug, Default, Clone)]
pub struct OrphanSweep {
    /// Multiplexer sessions killed because no agent owns them.
    pub killed_sessions: Vec<String>,
    /// Agents whose running flag was cleared because their session is
    /// gone.
    pub cleared_agents: Vec<String>,
}

pub struct LifecycleController {
    agents: Arc<AgentStore>,
    tasks: Arc<TaskStore>,
    sessions: Arc<SessionStore>,
    mux: Arc<dyn Multiplexer>,
    adapters: Arc<AdapterRegistry>,
    metrics: Arc<Counters>,
    session_prefix: String,
    shell: String,
    capture_lines: u32,
    default_priority: u8,
    default_max_retries: u32,
}

impl LifecycleController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<AgentStore>,
        tasks: Arc<TaskStore>,
        sessions: Arc<SessionStore>,
        mux: Arc<dyn Multiplexer>,
        adapters: Arc<AdapterRegistry>,
        metrics: Arc<Counters>,
        config: &MindmuxConfig,
    ) -> Self {
        Self {
            agents,
            tasks,
            sessions,
            mux,
            adapters,
            metrics,
            session_prefix: config.session_prefix.clone(),
            shell: config.shell.clone(),
            capture_lines: config.capture_lines,
            default_priority: config.default_priority,
            default_max_retries: config.default_max_retries,
        }
    }

    /// Session naming convention: `<prefix>-<agentId>`. This is the
    /// coordination medium between lifecycle and recovery; ownership is
    /// recoverable from the name alone.
    pub fn session_name(&self, agent_id: &str) -> String {
        format!("{}-{}", self.session_prefix, agent_id)
    }

    /// Start an agent: create its session, flag it running, launch the
    /// vendor CLI, wait for readiness.
    pub async fn start_agent(&self, id_or_name: &str) -> Result<Agent> {
        let agent = self.agents.get(id_or_name)?;
        let session = self.session_name(&agent.id);

        if agent.is_running && self.mux.has_session(&session).await? {
            return Err(MindmuxError::Precondition(format!(
                "agent '{}' is already running",
                agent.name
            )));
        }

        self.mux.create_session(&session, &self.shell, None).await?;

        let patched = match self.agents.update(&agent.id, "agent:started", |a| {
            a.session_name = Some(session.clone());
            a.is_running = true;
            a.status = AgentStatus::Idle;
        }) {
            Ok(agent) => agent,
            Err(e) => {
                let _ = self.mux.kill_session(&session).await;
                return Err(e);
            }
        };

        // A crash can leave a live-looking record behind under the same
        // name; close it before opening the new one.
        let _ = self.sessions.close_by_mux_name(&session);
        if let Err(e) = self.sessions.open(&agent.id, &session) {
            self.teardown(&agent.id, &session).await;
            return Err(e);
        }

        let adapter = match self.adapters.for_kind(agent.kind) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.teardown(&agent.id, &session).await;
                return Err(e);
            }
        };

        let spawn_opts = SpawnOptions {
            work_dir: None,
            model: agent.config.model.clone(),
        };
        match adapter.spawn_process(&session, &spawn_opts).await {
            Ok(()) => {
                incr(&self.metrics.agents_started);
                tracing::info!(agent_id = %agent.id, session = %session, "agent started");
                Ok(patched)
            }
            Err(MindmuxError::Timeout(t)) => {
                // Readiness timed out. The session stays alive so an
                // operator can attach and look; the agent is flagged
                // unhealthy until someone intervenes.
                let _ = self.agents.update(&agent.id, "agent:unhealthy", |a| {
                    a.status = AgentStatus::Unhealthy;
                });
                tracing::warn!(agent_id = %agent.id, session = %session, "CLI never became ready");
                Err(MindmuxError::Timeout(t))
            }
            Err(e) => {
                self.teardown(&agent.id, &session).await;
                Err(e)
            }
        }
    }

    /// Best-effort unwind of a failed start.
    async fn teardown(&self, agent_id: &str, session: &str) {
        let _ = self.mux.kill_session(session).await;
        let _ = self.sessions.close_by_mux_name(session);
        let _ = self.agents.update(agent_id, "agent:stopped", |a| {
            a.is_running = false;
            a.session_name = None;
            a.status = AgentStatus::Idle;
        });
    }

    /// Stop an agent. Idempotent: stopping a stopped agent is a no-op
    /// success.
    pub async fn stop_agent(&self, id_or_name: &str) -> Result<()> {
        let agent = self.agents.get(id_or_name)?;
        if !agent.is_running {
            return Ok(());
        }

        let session = agent
            .session_name
            .clone()
            .unwrap_or_else(|| self.session_name(&agent.id));

        if let Ok(adapter) = self.adapters.for_kind(agent.kind) {
            if let Err(e) = adapter.terminate(&session).await {
                tracing::debug!(agent_id = %agent.id, error = %e, "graceful terminate failed");
            }
        }
        tokio::time::sleep(STOP_GRACE).await;

        self.mux.kill_session(&session).await?;
        self.sessions.close_by_mux_name(&session)?;
        self.agents.update(&agent.id, "agent:stopped", |a| {
            a.is_running = false;
            a.session_name = None;
            a.status = AgentStatus::Idle;
        })?;

        incr(&self.metrics.agents_stopped);
        tracing::info!(agent_id = %agent.id, session = %session, "agent stopped");
        Ok(())
    }

    /// Run one prompt directly on an agent, outside the queue. Records an
    /// ephemeral task for the attempt and propagates execution errors.
    pub async fn execute_task(&self, agent_id: &str, prompt: &str) -> Result<Task> {
        let agent = self.agents.get(agent_id)?;

        let mut task = Task::new(
            prompt.to_string(),
            self.default_priority,
            CapabilitySelector::Any,
            Vec::new(),
            self.default_max_retries,
            agent.config.task_timeout,
        )?;
        task.status = TaskStatus::Running;
        task.assigned_agent_id = Some(agent.id.clone());
        task.assigned_at = Some(chrono::Utc::now());
        task.started_at = Some(chrono::Utc::now());
        let task = self.tasks.insert(task)?;

        match self
            .drive_prompt(&agent, prompt, agent.config.task_timeout)
            .await
        {
            Ok(output) => {
                let completed = self.tasks.transition(
                    &task.id,
                    "task:completed",
                    &[TaskStatus::Running],
                    |t| {
                        t.status = TaskStatus::Completed;
                        t.result = Some(output.clone());
                        t.completed_at = Some(chrono::Utc::now());
                    },
                )?;
                completed.ok_or_else(|| {
                    MindmuxError::Internal(format!("task '{}' vanished mid-execution", task.id))
                })
            }
            Err(e) => {
                let _ = self.tasks.transition(
                    &task.id,
                    "task:failed",
                    &[TaskStatus::Running],
                    |t| {
                        t.status = TaskStatus::Failed;
                        t.error_message = Some(e.to_string());
                        t.completed_at = Some(chrono::Utc::now());
                    },
                );
                Err(e)
            }
        }
    }

    /// Busy/idle bracketing around one adapter prompt.
    async fn drive_prompt(
        &self,
        agent: &Agent,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String> {
        let session = agent.session_name.clone().ok_or_else(|| {
            MindmuxError::Precondition(format!("agent '{}' has no live session", agent.name))
        })?;
        let adapter = self.adapters.for_kind(agent.kind)?;

        let _ = self.agents.update(&agent.id, "agent:busy", |a| {
            if a.is_running {
                a.status = AgentStatus::Busy;
            }
        });

        let outcome = adapter.send_prompt(&session, prompt, Some(timeout)).await;

        let _ = self.agents.update(&agent.id, "agent:idle", |a| {
            if a.status == AgentStatus::Busy {
                a.status = AgentStatus::Idle;
            }
        });

        let outcome = outcome?;
        if outcome.success {
            Ok(outcome.output)
        } else if outcome.timed_out {
            Err(MindmuxError::Timeout(timeout))
        } else {
            Err(MindmuxError::Transient(outcome.error.unwrap_or_else(
                || "prompt execution failed".to_string(),
            )))
        }
    }

    /// Health probe: an agent flagged running whose session is gone gets
    /// marked unhealthy. Returns whether the agent looks healthy.
    pub async fn monitor_agent_health(&self, id_or_name: &str) -> Result<bool> {
        let agent = self.agents.get(id_or_name)?;
        if !agent.is_running {
            return Ok(agent.status != AgentStatus::Unhealthy);
        }

        let session = agent
            .session_name
            .clone()
            .unwrap_or_else(|| self.session_name(&agent.id));
        if self.mux.has_session(&session).await? {
            return Ok(true);
        }

        tracing::warn!(agent_id = %agent.id, session = %session, "session vanished, flagging unhealthy");
        self.agents.update(&agent.id, "agent:unhealthy", |a| {
            a.status = AgentStatus::Unhealthy;
            a.is_running = false;
            a.session_name = None;
        })?;
        self.sessions.close_by_mux_name(&session)?;
        Ok(false)
    }

    /// Reconcile declared state against live sessions: kill sessions no
    /// agent owns, clear running flags with no session behind them.
    pub async fn recover_orphaned_sessions(&self) -> Result<OrphanSweep> {
        let live_sessions = self.mux.list_sessions().await?;
        let prefix = format!("{}-", self.session_prefix);
        let mut sweep = OrphanSweep::default();

        for name in &live_sessions {
            let Some(agent_id) = name.strip_prefix(&prefix) else {
                continue;
            };
            if self.agents.get(agent_id).is_err() {
                tracing::warn!(session = %name, "killing orphaned session");
                if let Err(e) = self.mux.kill_session(name).await {
                    tracing::error!(session = %name, error = %e, "could not kill orphan");
                    continue;
                }
                self.sessions.close_by_mux_name(name)?;
                sweep.killed_sessions.push(name.clone());
            }
        }

        let alive: HashSet<&String> = live_sessions.iter().collect();
        for agent in self.agents.list() {
            if !agent.is_running {
                continue;
            }
            let expected = agent
                .session_name
                .clone()
                .unwrap_or_else(|| self.session_name(&agent.id));
            if !alive.contains(&expected) {
                tracing::warn!(agent_id = %agent.id, session = %expected, "clearing stale running flag");
                self.agents.update(&agent.id, "agent:recovered", |a| {
                    a.is_running = false;
                    a.session_name = None;
                    a.status = AgentStatus::Idle;
                })?;
                self.sessions.close_by_mux_name(&expected)?;
                sweep.cleared_agents.push(agent.id.clone());
            }
        }

        Ok(sweep)
    }

    /// Recent pane lines from an agent's session.
    pub async fn get_agent_logs(&self, id_or_name: &str, lines: u32) -> Result<String> {
        let agent = self.agents.get(id_or_name)?;
        let session = agent.session_name.ok_or_else(|| {
            MindmuxError::Precondition(format!("agent '{}' is not running", agent.name))
        })?;
        self.mux.capture_pane(&session, lines).await
    }

    pub fn list_running_agents(&self) -> Vec<Agent> {
        self.agents
            .list()
            .into_iter()
            .filter(|a| a.is_running)
            .collect()
    }

    /// Stop every running agent, continuing past individual failures.
    pub async fn stop_all_agents(&self) -> Result<()> {
        for agent in self.list_running_agents() {
            if let Err(e) = self.stop_agent(&agent.id).await {
                tracing::error!(agent_id = %agent.id, error = %e, "failed to stop agent");
            }
        }
        Ok(())
    }

    /// Default pane capture depth for log queries.
    pub fn capture_lines(&self) -> u32 {
        self.capture_lines
    }
}

#[async_trait]
impl PromptRunner for LifecycleController {
    async fn run_prompt(&self, agent: &Agent, prompt: &str, timeout: Duration) -> Result<String> {
        // Reload so the scheduler's possibly stale copy cannot point at a
        // dead session.
        let agent = self.agents.get(&agent.id)?;
        self.drive_prompt(&agent, prompt, timeout).await
    }
}
