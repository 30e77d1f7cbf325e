//! Capability matcher: which agents can, and which currently may, take a
//! task.

use std::collections::HashMap;

use crate::agent::{Agent, AgentStatus};
use crate::task::Task;

/// Agents whose declared capabilities cover the task's requirement.
/// Unhealthy agents never qualify; an empty or `*` requirement admits
/// every healthy agent.
pub fn find_capable(task: &Task, agents: &[Agent]) -> Vec<Agent> {
    agents
        .iter()
        .filter(|agent| agent.status != AgentStatus::Unhealthy)
        .filter(|agent| task.required_capabilities.matched_by(&agent.capabilities))
        .cloned()
        .collect()
}

/// Narrow capable agents to those that can take work right now: a live
/// session and headroom under `max_concurrent_tasks`.
pub fn find_available(
    candidates: Vec<Agent>,
    running_index: &HashMap<String, Vec<String>>,
) -> Vec<Agent> {
    candidates
        .into_iter()
        .filter(|agent| agent.is_running)
        .filter(|agent| {
            let load = running_index.get(&agent.id).map_or(0, |ids| ids.len());
            load < agent.config.max_concurrent_tasks as usize
        })
        .collect()
}
