//! Dependency resolver.
//!
//! A dependency id that no longer exists in the task map is treated as
//! satisfied, not failed: administrative deletion of an upstream task
//! must never poison downstream work.

use std::collections::HashMap;

use crate::task::{Task, TaskStatus};

/// True iff every extant dependency has completed.
pub fn can_execute(task: &Task, all_tasks: &HashMap<String, Task>) -> bool {
    task.depends_on.iter().all(|dep_id| {
        all_tasks
            .get(dep_id)
            .map_or(true, |dep| dep.status == TaskStatus::Completed)
    })
}

/// True iff any extant dependency ended in failure or cancellation; the
/// dependent task is poisoned and will be failed on the next pass.
pub fn has_dependency_failed(task: &Task, all_tasks: &HashMap<String, Task>) -> bool {
    task.depends_on.iter().any(|dep_id| {
        all_tasks.get(dep_id).is_some_and(|dep| {
            matches!(dep.status, TaskStatus::Failed | TaskStatus::Cancelled)
        })
    })
}

/// Diagnostic: ids of extant dependencies still standing in the way.
pub fn blocking_deps(task: &Task, all_tasks: &HashMap<String, Task>) -> Vec<String> {
    task.depends_on
        .iter()
        .filter(|dep_id| {
            all_tasks
                .get(*dep_id)
                .is_some_and(|dep| dep.status != TaskStatus::Completed)
        })
        .cloned()
        .collect()
}
