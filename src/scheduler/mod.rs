//! Task queue scheduler: the central coordinator.
//!
//! Owns the priority queue and the running index, promotes pending tasks
//! when their dependencies resolve, matches and dispatches queued tasks,
//! and supervises executions with a retry budget. Queue processing is
//! single-flight: concurrent kicks collapse into one pass, and a
//! trailing kick after every finished execution makes sure no work is
//! left behind. A pass never holds a lock across an await; it claims,
//! spawns, and returns.

pub mod balancer;
pub mod deps;
pub mod matcher;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::error::{MindmuxError, Result};
use crate::metrics::{incr, Counters};
use crate::storage::audit::ENTITY_TASK;
use crate::storage::{AgentStore, AuditLog, TaskStore};
use crate::task::{CapabilitySelector, Task, TaskStatus};

pub use balancer::{LoadBalancer, Strategy};

/// Execution seam between the scheduler and the lifecycle controller.
/// Production wires in the controller; tests wire in scripted fakes.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    /// Run one prompt on one agent, returning the extracted response
    /// text. Errors are judged by [`MindmuxError::is_retryable`].
    async fn run_prompt(&self, agent: &Agent, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Options accepted by [`TaskScheduler::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub prompt: String,
    pub priority: Option<u8>,
    pub required_capabilities: CapabilitySelector,
    pub depends_on: Vec<String>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            priority: None,
            required_capabilities: CapabilitySelector::Any,
            depends_on: Vec::new(),
            max_retries: None,
            timeout: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn requiring(mut self, selector: CapabilitySelector) -> Self {
        self.required_capabilities = selector;
        self
    }

    pub fn depends_on(mut self, ids: Vec<String>) -> Self {
        self.depends_on = ids;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Filter for [`TaskScheduler::list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub agent_id: Option<String>,
}

/// Counts by status, as exposed to front-ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub queued: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending
            + self.queued
            + self.assigned
            + self.running
            + self.completed
            + self.failed
            + self.cancelled
    }
}

/// Scheduler defaults inherited from configuration.
#[derive(Debug, Clone)]
pub struct SchedulerDefaults {
    pub priority: u8,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for SchedulerDefaults {
    fn default() -> Self {
        Self {
            priority: 50,
            max_retries: 3,
            timeout: Duration::from_secs(300),
        }
    }
}

struct SchedState {
    /// Task ids ordered by priority desc, enqueue time asc.
    queue: Vec<String>,
    /// agentId -> ids of tasks currently claimed on that agent.
    running: HashMap<String, Vec<String>>,
}

struct SchedulerCore {
    tasks: Arc<TaskStore>,
    agents: Arc<AgentStore>,
    runner: Arc<dyn PromptRunner>,
    balancer: LoadBalancer,
    audit: Arc<AuditLog>,
    metrics: Arc<Counters>,
    defaults: SchedulerDefaults,
    state: Mutex<SchedState>,
    processing: AtomicBool,
    rekick: AtomicBool,
}

/// Public handle; cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<TaskStore>,
        agents: Arc<AgentStore>,
        runner: Arc<dyn PromptRunner>,
        strategy: Strategy,
        defaults: SchedulerDefaults,
        audit: Arc<AuditLog>,
        metrics: Arc<Counters>,
    ) -> Self {
        // Rebuild the in-memory queue from whatever the store recorded as
        // queued; recovery has already run by the time we get here.
        let mut queued = tasks.with_status(TaskStatus::Queued);
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.queued_at.cmp(&b.queued_at))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        let queue: Vec<String> = queued.into_iter().map(|t| t.id).collect();

        Self {
            core: Arc::new(SchedulerCore {
                tasks,
                agents,
                runner,
                balancer: LoadBalancer::new(strategy),
                audit,
                metrics,
                defaults,
                state: Mutex::new(SchedState {
                    queue,
                    running: HashMap::new(),
                }),
                processing: AtomicBool::new(false),
                rekick: AtomicBool::new(false),
            }),
        }
    }

    /// Create, persist and (when dependencies allow) queue a task, then
    /// kick the processing loop.
    pub async fn enqueue(&self, options: EnqueueOptions) -> Result<Task> {
        let task = self.core.admit(options)?;
        kick(&self.core);
        Ok(task)
    }

    /// Run one processing pass. Safe to call concurrently; extra calls
    /// collapse into the running pass.
    pub async fn process_queue(&self) {
        Arc::clone(&self.core).process_queue().await;
    }

    /// Cancel a task. True iff it was still pending or queued.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        self.core.cancel(id)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.core.tasks.try_get(id)
    }

    pub fn list_tasks(&self, filter: TaskFilter) -> Vec<Task> {
        let base = match (&filter.status, &filter.agent_id) {
            (Some(status), _) => self.core.tasks.with_status(*status),
            (None, Some(agent_id)) => self.core.tasks.for_agent(agent_id),
            (None, None) => self.core.tasks.list(),
        };
        base.into_iter()
            .filter(|t| {
                filter
                    .agent_id
                    .as_ref()
                    .map_or(true, |id| t.assigned_agent_id.as_deref() == Some(id))
            })
            .collect()
    }

    pub fn queue_stats(&self) -> QueueStats {
        let counts = self.core.tasks.status_counts();
        let get = |s: TaskStatus| counts.get(&s).copied().unwrap_or(0);
        QueueStats {
            pending: get(TaskStatus::Pending),
            queued: get(TaskStatus::Queued),
            assigned: get(TaskStatus::Assigned),
            running: get(TaskStatus::Running),
            completed: get(TaskStatus::Completed),
            failed: get(TaskStatus::Failed),
            cancelled: get(TaskStatus::Cancelled),
        }
    }

    pub fn clear_finished_tasks(&self) -> Result<usize> {
        self.core.tasks.clear_finished()
    }

    /// Hint from the lifecycle controller that an agent can take work.
    pub fn on_agent_available(&self, agent_id: &str) {
        tracing::debug!(agent_id, "agent available, kicking queue");
        kick(&self.core);
    }

    /// Number of tasks currently claimed on one agent.
    pub fn running_count(&self, agent_id: &str) -> usize {
        self.core
            .state
            .lock()
            .running
            .get(agent_id)
            .map_or(0, |ids| ids.len())
    }
}

impl SchedulerCore {
    /// Validate and persist a new task; insert into the queue if its
    /// dependencies are already satisfied.
    fn admit(&self, options: EnqueueOptions) -> Result<Task> {
        let mut task = Task::new(
            options.prompt,
            options.priority.unwrap_or(self.defaults.priority),
            options.required_capabilities,
            options.depends_on,
            options.max_retries.unwrap_or(self.defaults.max_retries),
            options.timeout.unwrap_or(self.defaults.timeout),
        )?;

        let ready = deps::can_execute(&task, &self.tasks.map());
        if ready {
            task.status = TaskStatus::Queued;
            task.queued_at = Some(Utc::now());
        }

        let task = self.tasks.insert(task)?;
        incr(&self.metrics.tasks_enqueued);

        if ready {
            self.audit
                .record("task:queued", ENTITY_TASK, &task.id, None, None);
            let mut state = self.state.lock();
            self.insert_into_queue(&mut state, &task);
        }

        tracing::info!(
            task_id = %task.id,
            priority = task.priority,
            status = %task.status,
            "task enqueued"
        );
        Ok(task)
    }

    /// Stable priority insert: first position whose task has strictly
    /// lower priority, so FIFO order holds within a priority band.
    fn insert_into_queue(&self, state: &mut SchedState, task: &Task) {
        if state.queue.iter().any(|id| *id == task.id) {
            return;
        }
        let pos = state
            .queue
            .iter()
            .position(|id| {
                self.tasks
                    .try_get(id)
                    .map_or(true, |queued| queued.priority < task.priority)
            })
            .unwrap_or(state.queue.len());
        state.queue.insert(pos, task.id.clone());
    }

    /// Single-flight: at most one pass at a time; kicks arriving during a
    /// pass schedule exactly one follow-up pass.
    async fn process_queue(self: Arc<Self>) {
        if self.processing.swap(true, Ordering::SeqCst) {
            self.rekick.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            // One pass: promote pending tasks, then dispatch a snapshot
            // of the queue. Executions are issued asynchronously; the
            // pass never waits on them.
            self.promote_pending();
            dispatch_queued(&self);

            self.processing.store(false, Ordering::SeqCst);

            if self.rekick.swap(false, Ordering::SeqCst) {
                if self.processing.swap(true, Ordering::SeqCst) {
                    // another kick won the flag; it will run the pass
                    return;
                }
                continue;
            }
            return;
        }
    }

    fn promote_pending(&self) {
        let all = self.tasks.map();

        for task in self.tasks.with_status(TaskStatus::Pending) {
            if deps::has_dependency_failed(&task, &all) {
                let result = self.tasks.transition(
                    &task.id,
                    "task:failed",
                    &[TaskStatus::Pending],
                    |t| {
                        t.status = TaskStatus::Failed;
                        t.error_message = Some("dependency failed".to_string());
                        t.completed_at = Some(Utc::now());
                    },
                );
                match result {
                    Ok(Some(_)) => {
                        incr(&self.metrics.tasks_failed);
                        tracing::warn!(task_id = %task.id, "task failed: dependency failed");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(task_id = %task.id, error = %e, "could not fail poisoned task")
                    }
                }
            } else if deps::can_execute(&task, &all) {
                let result = self.tasks.transition(
                    &task.id,
                    "task:queued",
                    &[TaskStatus::Pending],
                    |t| {
                        t.status = TaskStatus::Queued;
                        t.queued_at = Some(Utc::now());
                    },
                );
                match result {
                    Ok(Some(queued)) => {
                        let mut state = self.state.lock();
                        self.insert_into_queue(&mut state, &queued);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(task_id = %task.id, error = %e, "could not promote task")
                    }
                }
            }
        }
    }

    /// Supervise one execution attempt: run, then complete, retry, or
    /// fail. Always releases the agent slot and re-kicks the queue.
    async fn execute_task(self: Arc<Self>, task: Task, agent: Agent) {
        let task_id = task.id.clone();

        let running = self.tasks.transition(
            &task_id,
            "task:started",
            &[TaskStatus::Assigned],
            |t| {
                t.status = TaskStatus::Running;
                t.started_at = Some(Utc::now());
            },
        );
        let task = match running {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.release(&agent.id, &task_id);
                return;
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "could not start task");
                self.release(&agent.id, &task_id);
                return;
            }
        };

        let outcome = self
            .runner
            .run_prompt(&agent, &task.prompt, task.timeout)
            .await;

        match outcome {
            Ok(output) => {
                let result = self.tasks.transition(
                    &task_id,
                    "task:completed",
                    &[TaskStatus::Running],
                    |t| {
                        t.status = TaskStatus::Completed;
                        t.result = Some(output.clone());
                        t.error_message = None;
                        t.completed_at = Some(Utc::now());
                    },
                );
                match result {
                    Ok(Some(_)) => {
                        incr(&self.metrics.tasks_completed);
                        tracing::info!(task_id = %task_id, agent_id = %agent.id, "task completed");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "could not record completion")
                    }
                }
            }
            Err(error) => {
                self.handle_failure(&task, &error);
            }
        }

        self.release(&agent.id, &task_id);
        kick(&self);
    }

    fn handle_failure(&self, task: &Task, error: &MindmuxError) {
        if task.retry_count < task.max_retries {
            let attempt = task.retry_count + 1;
            let message = format!("Retry {}/{}: {}", attempt, task.max_retries, error);
            let result = self.tasks.transition(
                &task.id,
                "task:retried",
                &[TaskStatus::Running],
                |t| {
                    t.retry_count = attempt;
                    t.error_message = Some(message.clone());
                    t.status = TaskStatus::Queued;
                    t.assigned_agent_id = None;
                    t.queued_at = Some(Utc::now());
                },
            );
            match result {
                Ok(Some(requeued)) => {
                    incr(&self.metrics.tasks_retried);
                    tracing::warn!(
                        task_id = %task.id,
                        attempt,
                        max_retries = task.max_retries,
                        error = %error,
                        "task failed, requeued for retry"
                    );
                    let mut state = self.state.lock();
                    self.insert_into_queue(&mut state, &requeued);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "could not requeue task")
                }
            }
        } else {
            let result = self.tasks.transition(
                &task.id,
                "task:failed",
                &[TaskStatus::Running],
                |t| {
                    t.status = TaskStatus::Failed;
                    t.error_message = Some(error.to_string());
                    t.completed_at = Some(Utc::now());
                },
            );
            match result {
                Ok(Some(_)) => {
                    incr(&self.metrics.tasks_failed);
                    tracing::error!(
                        task_id = %task.id,
                        retries = task.retry_count,
                        error = %error,
                        "task failed, retry budget exhausted"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "could not record failure")
                }
            }
        }
    }

    fn cancel(&self, id: &str) -> Result<bool> {
        // Pull the id out of the queue first so a concurrent pass cannot
        // claim it while we transition the record.
        {
            let mut state = self.state.lock();
            state.queue.retain(|queued| queued != id);
        }

        let cancelled = match self.tasks.transition(
            id,
            "task:cancelled",
            &[TaskStatus::Pending, TaskStatus::Queued],
            |t| {
                t.status = TaskStatus::Cancelled;
                t.completed_at = Some(Utc::now());
            },
        ) {
            Ok(cancelled) => cancelled,
            Err(e) => {
                // The record did not move; put a still-queued task back.
                if let Some(task) = self.tasks.try_get(id) {
                    if task.status == TaskStatus::Queued {
                        let mut state = self.state.lock();
                        self.insert_into_queue(&mut state, &task);
                    }
                }
                return Err(e);
            }
        };

        match cancelled {
            Some(task) => {
                incr(&self.metrics.tasks_cancelled);
                tracing::info!(task_id = %task.id, "task cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn release(&self, agent_id: &str, task_id: &str) {
        let mut state = self.state.lock();
        if let Some(ids) = state.running.get_mut(agent_id) {
            ids.retain(|id| id != task_id);
            if ids.is_empty() {
                state.running.remove(agent_id);
            }
        }
    }
}

/// Schedule a processing pass on the runtime.
fn kick(core: &Arc<SchedulerCore>) {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        core.process_queue().await;
    });
}

/// Dispatch step of a pass: walk a snapshot of the queue, claim a slot
/// for each dispatchable task, persist the assignment, and spawn its
/// execution.
fn dispatch_queued(core: &Arc<SchedulerCore>) {
    // Snapshot, because assignment mutates the queue as we go.
    let snapshot: Vec<String> = core.state.lock().queue.clone();
    if snapshot.is_empty() {
        return;
    }

    let agents = core.agents.list();

    for task_id in snapshot {
        let Some(task) = core.tasks.try_get(&task_id) else {
            core.state.lock().queue.retain(|id| *id != task_id);
            continue;
        };
        if task.status != TaskStatus::Queued {
            core.state.lock().queue.retain(|id| *id != task_id);
            continue;
        }

        let capable = matcher::find_capable(&task, &agents);
        if capable.is_empty() {
            continue;
        }

        // Pick under the state lock so the load snapshot the balancer
        // sees matches the claim we are about to make.
        let claimed = {
            let mut state = core.state.lock();
            let available = matcher::find_available(capable, &state.running);
            let Some(agent) = core.balancer.pick(&available, &state.running) else {
                continue;
            };
            let Some(pos) = state.queue.iter().position(|id| *id == task_id) else {
                continue;
            };
            state.queue.remove(pos);
            state
                .running
                .entry(agent.id.clone())
                .or_default()
                .push(task_id.clone());
            agent
        };

        let assigned = core.tasks.transition(
            &task_id,
            "task:assigned",
            &[TaskStatus::Queued],
            |t| {
                t.status = TaskStatus::Assigned;
                t.assigned_agent_id = Some(claimed.id.clone());
                t.assigned_at = Some(Utc::now());
            },
        );

        match assigned {
            Ok(Some(assigned)) => {
                tracing::info!(
                    task_id = %assigned.id,
                    agent_id = %claimed.id,
                    "task assigned"
                );
                let spawned = Arc::clone(core);
                tokio::spawn(async move {
                    spawned.execute_task(assigned, claimed).await;
                });
            }
            Ok(None) => {
                // Cancelled (or otherwise moved) between snapshot and
                // claim; release the slot.
                core.release(&claimed.id, &task_id);
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "could not assign task");
                core.release(&claimed.id, &task_id);
                let mut state = core.state.lock();
                core.insert_into_queue(&mut state, &task);
            }
        }
    }
}
