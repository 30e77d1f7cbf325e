//! Agent records: a configured AI assistant that can host one or more
//! concurrent tasks inside a multiplexer session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MindmuxError, Result};

/// Closed set of assistant variants. Selects the CLI adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Gemini,
    Gpt4,
    OpenCode,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
            AgentKind::Gpt4 => "gpt4",
            AgentKind::OpenCode => "opencode",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = MindmuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude" => Ok(AgentKind::Claude),
            "gemini" => Ok(AgentKind::Gemini),
            "gpt4" => Ok(AgentKind::Gpt4),
            "opencode" => Ok(AgentKind::OpenCode),
            other => Err(MindmuxError::Validation(format!(
                "unknown agent kind '{}'",
                other
            ))),
        }
    }
}

/// Whitelisted capability vocabulary.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    CodeGeneration,
    CodeReview,
    Debugging,
    Testing,
    Documentation,
    Planning,
    Research,
    Refactoring,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CodeGeneration => "code-generation",
            Capability::CodeReview => "code-review",
            Capability::Debugging => "debugging",
            Capability::Testing => "testing",
            Capability::Documentation => "documentation",
            Capability::Planning => "planning",
            Capability::Research => "research",
            Capability::Refactoring => "refactoring",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = MindmuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "code-generation" => Ok(Capability::CodeGeneration),
            "code-review" => Ok(Capability::CodeReview),
            "debugging" => Ok(Capability::Debugging),
            "testing" => Ok(Capability::Testing),
            "documentation" => Ok(Capability::Documentation),
            "planning" => Ok(Capability::Planning),
            "research" => Ok(Capability::Research),
            "refactoring" => Ok(Capability::Refactoring),
            other => Err(MindmuxError::Validation(format!(
                "unknown capability '{}'",
                other
            ))),
        }
    }
}

/// Current status of an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is available for tasks (whether or not a session is live).
    Idle,
    /// Agent is currently executing at least one task.
    Busy,
    /// The controller believes the agent's session is gone or broken.
    Unhealthy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Unhealthy => "unhealthy",
        }
    }
}

impl FromStr for AgentStatus {
    type Err = MindmuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "unhealthy" => Ok(AgentStatus::Unhealthy),
            other => Err(MindmuxError::Validation(format!(
                "unknown agent status '{}'",
                other
            ))),
        }
    }
}

/// Per-agent runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRuntimeConfig {
    /// Model name handed to the vendor CLI, if it takes one.
    pub model: Option<String>,

    /// Parallelism limit within this agent. Must be at least 1.
    pub max_concurrent_tasks: u32,

    /// Per-attempt timeout for tasks executed on this agent.
    pub task_timeout: Duration,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_concurrent_tasks: 1,
            task_timeout: Duration::from_secs(300),
        }
    }
}

/// A configured AI assistant. Exists (is persisted) independently of
/// whether a session is currently running for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Opaque unique identifier, assigned at creation, immutable.
    pub id: String,

    /// Human identifier, unique across all agents.
    pub name: String,

    /// Assistant variant; selects the CLI adapter.
    pub kind: AgentKind,

    /// Declared skills, matched against task requirements.
    pub capabilities: BTreeSet<Capability>,

    /// Runtime knobs.
    pub config: AgentRuntimeConfig,

    pub status: AgentStatus,

    /// Name of the hosting multiplexer session, set iff a session is live.
    pub session_name: Option<String>,

    /// True iff the controller believes a live session exists.
    pub is_running: bool,

    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Agent {
    /// Build a fresh agent record. The name is validated here; uniqueness
    /// is the agent store's responsibility.
    pub fn new(
        name: String,
        kind: AgentKind,
        capabilities: BTreeSet<Capability>,
        config: AgentRuntimeConfig,
    ) -> Result<Self> {
        validate_agent_name(&name)?;
        validate_runtime_config(&config)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            kind,
            capabilities,
            config,
            status: AgentStatus::Idle,
            session_name: None,
            is_running: false,
            created_at: now,
            last_activity: now,
        })
    }

    /// Updates the last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Record invariants that must hold for any persisted agent.
    pub fn check_invariants(&self) -> Result<()> {
        validate_agent_name(&self.name)?;
        validate_runtime_config(&self.config)?;
        if self.is_running && self.session_name.is_none() {
            return Err(MindmuxError::Validation(format!(
                "agent '{}' is flagged running without a session name",
                self.name
            )));
        }
        if self.status == AgentStatus::Busy && !self.is_running {
            return Err(MindmuxError::Validation(format!(
                "agent '{}' is busy but not running",
                self.name
            )));
        }
        Ok(())
    }
}

/// Agent names become part of multiplexer session names and shell
/// commands, so the whitelist is strict: 1-255 chars of `[A-Za-z0-9_-]`.
pub fn validate_agent_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(MindmuxError::Validation(
            "agent name must be 1-255 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(MindmuxError::Validation(format!(
            "agent name '{}' contains characters outside [A-Za-z0-9_-]",
            name
        )));
    }
    Ok(())
}

fn validate_runtime_config(config: &AgentRuntimeConfig) -> Result<()> {
    if config.max_concurrent_tasks == 0 {
        return Err(MindmuxError::Validation(
            "maxConcurrentTasks must be a positive integer".to_string(),
        ));
    }
    if config.task_timeout.is_zero() {
        return Err(MindmuxError::Validation(
            "task timeout must be a positive duration".to_string(),
        ));
    }
    Ok(())
}
