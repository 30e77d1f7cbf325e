//! mindmux - orchestration of interactive AI CLI agents hosted in tmux
//!
//! The core coordinates a pool of long-running assistant CLIs, each
//! living in its own terminal-multiplexer session, and routes a
//! prioritized, capability-matched stream of prompts to them. Front-ends
//! (CLI, TUI) consume the [`scheduler::TaskScheduler`] and
//! [`lifecycle::LifecycleController`] façades exposed by
//! [`Orchestrator`].

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod mux;
pub mod recovery;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod task;
pub mod utils;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use agent::{Agent, AgentKind, AgentStatus, Capability};
pub use config::MindmuxConfig;
pub use error::{MindmuxError, Result};
pub use scheduler::{EnqueueOptions, QueueStats, TaskFilter, TaskScheduler};
pub use task::{CapabilitySelector, Task, TaskStatus};

use adapters::AdapterRegistry;
use lifecycle::LifecycleController;
use metrics::{CounterSnapshot, Counters};
use monitor::MonitorOptions;
use mux::{Multiplexer, TmuxDriver};
use recovery::{RecoveryCoordinator, RecoveryReport};
use scheduler::{PromptRunner, SchedulerDefaults, Strategy};
use storage::{AgentStore, AuditLog, NewAgent, SessionStore, StateCache, StateStore, TaskStore};

/// Fully wired orchestration core.
///
/// Construction order matters: store, cache rebuild, stores, lifecycle,
/// recovery, scheduler. No façade method is reachable before the cache
/// rebuild and recovery have finished.
pub struct Orchestrator {
    config: MindmuxConfig,
    store: Arc<dyn StateStore>,
    agents: Arc<AgentStore>,
    lifecycle: Arc<LifecycleController>,
    scheduler: TaskScheduler,
    audit: Arc<AuditLog>,
    metrics: Arc<Counters>,
    recovery_report: RecoveryReport,
}

impl Orchestrator {
    /// Build against a real tmux server.
    pub async fn new(config: MindmuxConfig) -> Result<Self> {
        let mux: Arc<dyn Multiplexer> =
            Arc::new(TmuxDriver::connect(config.session_prefix.clone()).await?);
        let monitor_opts = MonitorOptions {
            poll_interval: config.poll_interval(),
            idle_threshold: config.idle_threshold(),
            timeout: config.default_task_timeout(),
            capture_lines: config.capture_lines,
        };
        let adapters = Arc::new(AdapterRegistry::with_defaults(
            Arc::clone(&mux),
            monitor_opts,
        ));
        Self::assemble(config, mux, adapters).await
    }

    /// Build with a caller-provided multiplexer and adapter registry;
    /// used by tests and by embedders with their own session hosting.
    pub async fn with_multiplexer(
        config: MindmuxConfig,
        mux: Arc<dyn Multiplexer>,
        adapters: Arc<AdapterRegistry>,
    ) -> Result<Self> {
        Self::assemble(config, mux, adapters).await
    }

    async fn assemble(
        config: MindmuxConfig,
        mux: Arc<dyn Multiplexer>,
        adapters: Arc<AdapterRegistry>,
    ) -> Result<Self> {
        let store = storage::open_store(&config.data_dir)?;

        let cache = Arc::new(StateCache::new());
        cache.rebuild(
            store.load_agents()?,
            store.load_tasks()?,
            store.load_sessions()?,
        );

        let audit = Arc::new(AuditLog::new(Arc::clone(&store)));
        let agents = Arc::new(AgentStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));
        let tasks = Arc::new(TaskStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));

        let metrics = Arc::new(Counters::new());
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::clone(&agents),
            Arc::clone(&tasks),
            Arc::clone(&sessions),
            mux,
            adapters,
            Arc::clone(&metrics),
            &config,
        ));

        let recovery = RecoveryCoordinator::new(Arc::clone(&tasks), Arc::clone(&lifecycle));
        let recovery_report = recovery.run().await?;

        let runner: Arc<dyn PromptRunner> = Arc::clone(&lifecycle) as Arc<dyn PromptRunner>;
        let scheduler = TaskScheduler::new(
            tasks,
            Arc::clone(&agents),
            runner,
            Strategy::default(),
            SchedulerDefaults {
                priority: config.default_priority,
                max_retries: config.default_max_retries,
                timeout: config.default_task_timeout(),
            },
            Arc::clone(&audit),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            store,
            agents,
            lifecycle,
            scheduler,
            audit,
            metrics,
            recovery_report,
        })
    }

    pub fn config(&self) -> &MindmuxConfig {
        &self.config
    }

    /// Create a new agent record.
    pub fn create_agent(&self, params: NewAgent) -> Result<Agent> {
        self.agents.create(params)
    }

    pub fn get_agent(&self, id_or_name: &str) -> Result<Agent> {
        self.agents.get(id_or_name)
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.agents.list()
    }

    /// Delete an agent, terminating its live session first.
    pub async fn delete_agent(&self, id_or_name: &str) -> Result<Agent> {
        let agent = self.agents.get(id_or_name)?;
        self.lifecycle.stop_agent(&agent.id).await?;
        self.agents.delete(&agent.id)
    }

    /// Task queue façade.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Agent lifecycle façade.
    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Audit query façade.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn metrics(&self) -> CounterSnapshot {
        self.metrics.snapshot()
    }

    /// What startup recovery found and repaired.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    /// Shut down the core. In-flight transitions already committed stay
    /// committed; live multiplexer sessions are left running by design
    /// and reconciled on the next startup.
    pub async fn shutdown(&self) -> Result<()> {
        self.store.close()?;
        tracing::info!("orchestrator shut down");
        Ok(())
    }
}
