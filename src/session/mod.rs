//! Session metadata: one record per live (or historical) multiplexer
//! session hosting an agent's interactive CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{MindmuxError, Result};

/// Represents the current status of a hosted session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is live and detachable.
    Active,
    /// A terminal client is attached.
    Attached,
    /// Running with no client attached.
    Detached,
    /// Session has ended; the record is kept as history until pruned.
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Attached => "attached",
            SessionStatus::Detached => "detached",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = MindmuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "attached" => Ok(SessionStatus::Attached),
            "detached" => Ok(SessionStatus::Detached),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(MindmuxError::Validation(format!(
                "unknown session status '{}'",
                other
            ))),
        }
    }
}

/// Metadata for one multiplexer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub agent_id: String,
    /// Unique across active sessions; `<prefix>-<agentId>` by convention.
    pub multiplexer_session: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// OS process id of the pane's child, when known.
    pub process_id: Option<u32>,
}

impl SessionRecord {
    pub fn open(agent_id: String, multiplexer_session: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            multiplexer_session,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            process_id: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != SessionStatus::Terminated
    }

    /// Mark the session ended. Idempotent.
    pub fn close(&mut self) {
        if self.status != SessionStatus::Terminated {
            self.status = SessionStatus::Terminated;
            self.ended_at = Some(Utc::now());
        }
    }
}
