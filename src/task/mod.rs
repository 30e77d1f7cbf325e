//! Task records and the task status machine.
//!
//! ```text
//! pending ──deps met──► queued ──dispatch──► assigned ──start──► running
//!    │                    │ ▲                                      │
//!    │                    │ └──retry (on failure, retries left)────┤
//!    │cancel              │cancel                                  ├──► completed
//!    ▼                    ▼                                        └──► failed
//! cancelled            cancelled
//! pending ──dependency failed──► failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::Capability;
use crate::error::{MindmuxError, Result};

/// Upper bound on prompt size; larger is a validation failure.
pub const MAX_PROMPT_BYTES: usize = 50 * 1024;

/// Highest admissible priority.
pub const MAX_PRIORITY: u8 = 100;

/// Task status, ordered by lifecycle progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting on unmet dependencies.
    Pending,
    /// Eligible and waiting in the priority queue.
    Queued,
    /// Bound to an agent, execution not yet started.
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// States counted as "incomplete" by startup recovery.
    pub fn is_incomplete(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = MindmuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "assigned" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(MindmuxError::Validation(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }
}

/// Capability requirement of a task. The `*` token (or an empty set)
/// means any capability set suffices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub enum CapabilitySelector {
    Any,
    Set(BTreeSet<Capability>),
}

impl CapabilitySelector {
    /// Whether the given capability set satisfies this requirement.
    pub fn matched_by(&self, capabilities: &BTreeSet<Capability>) -> bool {
        match self {
            CapabilitySelector::Any => true,
            CapabilitySelector::Set(required) if required.is_empty() => true,
            CapabilitySelector::Set(required) => required.is_subset(capabilities),
        }
    }
}

impl Default for CapabilitySelector {
    fn default() -> Self {
        CapabilitySelector::Any
    }
}

impl From<CapabilitySelector> for Vec<String> {
    fn from(selector: CapabilitySelector) -> Self {
        match selector {
            CapabilitySelector::Any => vec!["*".to_string()],
            CapabilitySelector::Set(set) => {
                set.iter().map(|c| c.as_str().to_string()).collect()
            }
        }
    }
}

impl TryFrom<Vec<String>> for CapabilitySelector {
    type Error = MindmuxError;

    fn try_from(tokens: Vec<String>) -> Result<Self> {
        if tokens.iter().any(|t| t == "*") {
            return Ok(CapabilitySelector::Any);
        }
        let mut set = BTreeSet::new();
        for token in &tokens {
            set.insert(token.parse::<Capability>()?);
        }
        Ok(CapabilitySelector::Set(set))
    }
}

/// A unit of AI work to be executed on one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    pub prompt: String,

    /// 0-100, higher runs first.
    pub priority: u8,

    pub required_capabilities: CapabilitySelector,

    /// Task ids that must be completed before this one becomes eligible.
    pub depends_on: Vec<String>,

    /// Set when the scheduler binds the task to an agent; cleared again
    /// on the running -> queued retry edge.
    pub assigned_agent_id: Option<String>,

    pub status: TaskStatus,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Per-attempt wall-clock ceiling.
    pub timeout: Duration,

    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub result: Option<String>,
    pub error_message: Option<String>,
}

impl Task {
    /// Build a fresh pending task. Prompt and priority are validated here.
    pub fn new(
        prompt: String,
        priority: u8,
        required_capabilities: CapabilitySelector,
        depends_on: Vec<String>,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Self> {
        validate_prompt(&prompt)?;
        if priority > MAX_PRIORITY {
            return Err(MindmuxError::Validation(format!(
                "priority {} exceeds the maximum of {}",
                priority, MAX_PRIORITY
            )));
        }
        if timeout.is_zero() {
            return Err(MindmuxError::Validation(
                "task timeout must be a positive duration".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            priority,
            required_capabilities,
            depends_on,
            assigned_agent_id: None,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            timeout,
            created_at: Utc::now(),
            queued_at: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
        })
    }

    /// Record invariants that must hold for any persisted task.
    pub fn check_invariants(&self) -> Result<()> {
        validate_prompt(&self.prompt)?;
        if self.priority > MAX_PRIORITY {
            return Err(MindmuxError::Validation(format!(
                "task '{}' has priority {} above {}",
                self.id, self.priority, MAX_PRIORITY
            )));
        }
        if self.retry_count > self.max_retries {
            return Err(MindmuxError::Validation(format!(
                "task '{}' retryCount {} exceeds maxRetries {}",
                self.id, self.retry_count, self.max_retries
            )));
        }
        match self.status {
            TaskStatus::Completed => {
                if self.result.is_none() || self.error_message.is_some() {
                    return Err(MindmuxError::Validation(format!(
                        "completed task '{}' must carry a result and no error",
                        self.id
                    )));
                }
            }
            TaskStatus::Failed => {
                if self.error_message.is_none() {
                    return Err(MindmuxError::Validation(format!(
                        "failed task '{}' must carry an error message",
                        self.id
                    )));
                }
            }
            TaskStatus::Assigned | TaskStatus::Running => {
                if self.assigned_agent_id.is_none() {
                    return Err(MindmuxError::Validation(format!(
                        "task '{}' is {} without an assigned agent",
                        self.id, self.status
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether `cancel` is still allowed.
    pub fn is_cancellable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Queued)
    }
}

pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.is_empty() {
        return Err(MindmuxError::Validation(
            "prompt must not be empty".to_string(),
        ));
    }
    if prompt.len() > MAX_PROMPT_BYTES {
        return Err(MindmuxError::Validation(format!(
            "prompt is {} bytes, maximum is {}",
            prompt.len(),
            MAX_PROMPT_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_task() -> Task {
        Task::new(
            "say hello".to_string(),
            50,
            CapabilitySelector::Any,
            vec![],
            3,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = simple_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.assigned_agent_id.is_none());
        assert!(task.queued_at.is_none());
    }

    #[test]
    fn test_prompt_bounds() {
        assert!(validate_prompt("x").is_ok());
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt(&"y".repeat(MAX_PROMPT_BYTES)).is_ok());
        assert!(validate_prompt(&"y".repeat(MAX_PROMPT_BYTES + 1)).is_err());
    }

    #[test]
    fn test_priority_bound() {
        let err = Task::new(
            "p".to_string(),
            101,
            CapabilitySelector::Any,
            vec![],
            0,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_selector_matching() {
        let mut caps = BTreeSet::new();
        caps.insert(Capability::Testing);
        caps.insert(Capability::Debugging);

        assert!(CapabilitySelector::Any.matched_by(&caps));
        assert!(CapabilitySelector::Set(BTreeSet::new()).matched_by(&caps));

        let mut required = BTreeSet::new();
        required.insert(Capability::Testing);
        assert!(CapabilitySelector::Set(required.clone()).matched_by(&caps));

        required.insert(Capability::Planning);
        assert!(!CapabilitySelector::Set(required).matched_by(&caps));
    }

    #[test]
    fn test_selector_serde_star_token() {
        let json = serde_json::to_string(&CapabilitySelector::Any).unwrap();
        assert_eq!(json, "[\"*\"]");

        let parsed: CapabilitySelector = serde_json::from_str("[\"*\"]").unwrap();
        assert_eq!(parsed, CapabilitySelector::Any);

        let parsed: CapabilitySelector =
            serde_json::from_str("[\"testing\",\"debugging\"]").unwrap();
        match parsed {
            CapabilitySelector::Set(set) => {
                assert!(set.contains(&Capability::Testing));
                assert!(set.contains(&Capability::Debugging));
            }
            CapabilitySelector::Any => panic!("expected a concrete set"),
        }

        assert!(serde_json::from_str::<CapabilitySelector>("[\"warp-drive\"]").is_err());
    }

    #[test]
    fn test_terminal_invariants() {
        let mut task = simple_task();
        task.status = TaskStatus::Completed;
        assert!(task.check_invariants().is_err());

        task.result = Some("done".to_string());
        assert!(task.check_invariants().is_ok());

        task.error_message = Some("boom".to_string());
        assert!(task.check_invariants().is_err());

        let mut failed = simple_task();
        failed.status = TaskStatus::Failed;
        assert!(failed.check_invariants().is_err());
        failed.error_message = Some("boom".to_string());
        assert!(failed.check_invariants().is_ok());
    }

    #[test]
    fn test_cancel_window() {
        let mut task = simple_task();
        assert!(task.is_cancellable());
        task.status = TaskStatus::Queued;
        assert!(task.is_cancellable());
        task.status = TaskStatus::Running;
        assert!(!task.is_cancellable());
        task.status = TaskStatus::Completed;
        assert!(!task.is_cancellable());
    }
}
