//! Startup reconciliation between declared state and the live world.
//!
//! Runs once, after the cache has been rebuilt and before the scheduler
//! façade becomes callable. A restart means no execution survived: tasks
//! the store still shows as assigned or running are pushed back to the
//! queue with their retry count bumped, orphaned multiplexer sessions
//! are reaped, and stale running flags are cleared.

use std::sync::Arc;

use crate::error::Result;
use crate::lifecycle::{LifecycleController, OrphanSweep};
use crate::storage::TaskStore;
use crate::task::TaskStatus;

/// Summary of what startup recovery did.
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    /// Incomplete tasks found in the store at startup.
    pub incomplete_tasks: usize,
    /// Tasks moved from assigned/running back to queued.
    pub requeued_tasks: Vec<String>,
    pub killed_sessions: Vec<String>,
    pub cleared_agents: Vec<String>,
}

pub struct RecoveryCoordinator {
    tasks: Arc<TaskStore>,
    lifecycle: Arc<LifecycleController>,
}

impl RecoveryCoordinator {
    pub fn new(tasks: Arc<TaskStore>, lifecycle: Arc<LifecycleController>) -> Self {
        Self { tasks, lifecycle }
    }

    pub async fn run(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let incomplete = self.tasks.incomplete();
        report.incomplete_tasks = incomplete.len();
        tracing::info!(count = incomplete.len(), "incomplete tasks found at startup");

        for task in incomplete {
            if !matches!(task.status, TaskStatus::Assigned | TaskStatus::Running) {
                // Pending and queued tasks need nothing; the first pass
                // picks them up.
                continue;
            }

            let requeued = self.tasks.transition(
                &task.id,
                "task:recovered",
                &[TaskStatus::Assigned, TaskStatus::Running],
                |t| {
                    t.status = TaskStatus::Queued;
                    t.assigned_agent_id = None;
                    t.retry_count = t.retry_count.saturating_add(1).min(t.max_retries);
                    t.error_message =
                        Some("interrupted by restart, requeued".to_string());
                    t.queued_at = Some(chrono::Utc::now());
                },
            )?;
            if requeued.is_some() {
                tracing::warn!(task_id = %task.id, "requeued task stranded by restart");
                report.requeued_tasks.push(task.id);
            }
        }

        let OrphanSweep {
            killed_sessions,
            cleared_agents,
        } = self.lifecycle.recover_orphaned_sessions().await?;
        report.killed_sessions = killed_sessions;
        report.cleared_agents = cleared_agents;

        tracing::info!(
            requeued = report.requeued_tasks.len(),
            killed_sessions = report.killed_sessions.len(),
            cleared_agents = report.cleared_agents.len(),
            "startup recovery finished"
        );
        Ok(report)
    }
}
