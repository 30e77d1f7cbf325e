//! Write-through repository for task records, with the secondary views
//! the scheduler and recovery lean on.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::audit::{self, AuditLog, ENTITY_TASK};
use super::{StateCache, StateStore};
use crate::error::{MindmuxError, Result};
use crate::task::{Task, TaskStatus};

/// The only writer of task records. Mutations are serialized under one
/// lock so read-modify-write cycles cannot interleave.
pub struct TaskStore {
    store: Arc<dyn StateStore>,
    cache: Arc<StateCache>,
    audit: Arc<AuditLog>,
    mutate_lock: Mutex<()>,
}

impl TaskStore {
    pub fn new(store: Arc<dyn StateStore>, cache: Arc<StateCache>, audit: Arc<AuditLog>) -> Self {
        Self {
            store,
            cache,
            audit,
            mutate_lock: Mutex::new(()),
        }
    }

    /// Persist a freshly constructed task.
    pub fn insert(&self, task: Task) -> Result<Task> {
        let _guard = self.mutate_lock.lock();
        self.store.upsert_task(&task)?;
        self.cache.put_task(task.clone());
        self.audit.record(
            "task:created",
            ENTITY_TASK,
            &task.id,
            None,
            Some(audit::snapshot(&task)),
        );
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.cache.task(id).ok_or_else(|| MindmuxError::NotFound {
            kind: "task",
            id: id.to_string(),
        })
    }

    pub fn try_get(&self, id: &str) -> Option<Task> {
        self.cache.task(id)
    }

    pub fn list(&self) -> Vec<Task> {
        self.cache.tasks()
    }

    /// Id-keyed snapshot of every task, for dependency resolution.
    pub fn map(&self) -> HashMap<String, Task> {
        self.cache.task_map()
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<Task> {
        self.cache.tasks_with_status(status)
    }

    pub fn for_agent(&self, agent_id: &str) -> Vec<Task> {
        self.cache.tasks_for_agent(agent_id)
    }

    /// Tasks awaiting assignment ({pending, queued}), priority desc with
    /// creation order as the tiebreak.
    pub fn queue_snapshot(&self) -> Vec<Task> {
        let mut queue = self.with_status(TaskStatus::Pending);
        queue.extend(self.with_status(TaskStatus::Queued));
        queue.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        queue
    }

    /// Tasks in {pending, queued, assigned, running}; the recovery
    /// coordinator's working set.
    pub fn incomplete(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .cache
            .tasks()
            .into_iter()
            .filter(|t| t.status.is_incomplete())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Counts per status for the façade's queue statistics.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        self.cache.status_counts()
    }

    /// Apply a mutation to one task under the write-through discipline.
    /// `event` names the audit entry, e.g. `task:assigned`.
    pub fn update<F>(&self, id: &str, event: &str, mutate: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let _guard = self.mutate_lock.lock();
        let before = self.cache.task(id).ok_or_else(|| MindmuxError::NotFound {
            kind: "task",
            id: id.to_string(),
        })?;

        let mut task = before.clone();
        mutate(&mut task);
        task.check_invariants()?;

        self.store.upsert_task(&task)?;
        self.cache.put_task(task.clone());
        self.audit.record(
            event,
            ENTITY_TASK,
            &task.id,
            Some(audit::snapshot(&before)),
            Some(audit::snapshot(&task)),
        );
        Ok(task)
    }

    /// Guarded state transition: atomically reload the task, and apply
    /// `mutate` only if its current status is one of `expected`. Returns
    /// `Ok(None)` when the task is gone or another writer got there
    /// first, which callers treat as "someone else already moved it".
    pub fn transition<F>(
        &self,
        id: &str,
        event: &str,
        expected: &[TaskStatus],
        mutate: F,
    ) -> Result<Option<Task>>
    where
        F: FnOnce(&mut Task),
    {
        let _guard = self.mutate_lock.lock();
        let Some(before) = self.cache.task(id) else {
            return Ok(None);
        };
        if !expected.contains(&before.status) {
            return Ok(None);
        }

        let mut task = before.clone();
        mutate(&mut task);
        task.check_invariants()?;

        self.store.upsert_task(&task)?;
        self.cache.put_task(task.clone());
        self.audit.record(
            event,
            ENTITY_TASK,
            &task.id,
            Some(audit::snapshot(&before)),
            Some(audit::snapshot(&task)),
        );
        Ok(Some(task))
    }

    /// Delete all tasks in a terminal state. Returns how many were
    /// removed.
    pub fn clear_finished(&self) -> Result<usize> {
        let _guard = self.mutate_lock.lock();
        let finished: Vec<Task> = self
            .cache
            .tasks()
            .into_iter()
            .filter(|t| t.status.is_terminal())
            .collect();

        let mut removed = 0;
        for task in finished {
            self.store.delete_task(&task.id)?;
            self.cache.remove_task(&task.id);
            self.audit.record(
                "task:deleted",
                ENTITY_TASK,
                &task.id,
                Some(audit::snapshot(&task)),
                None,
            );
            removed += 1;
        }
        Ok(removed)
    }
}
