//! Append-only audit log.
//!
//! Every mutation of an agent, task, or session writes one entry with
//! before/after snapshots. Operational history is best-effort by design:
//! a failed append is logged and swallowed, because the mutation it
//! describes has already committed to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::StateStore;
use crate::error::Result;

/// Entity kinds recorded in the log.
pub const ENTITY_AGENT: &str = "agent";
pub const ENTITY_TASK: &str = "task";
pub const ENTITY_SESSION: &str = "session";

/// Default actor for mutations the core performs on its own behalf.
pub const ACTOR_SYSTEM: &str = "system";

/// An entry about to be appended; the store assigns id and the entry
/// becomes an [`AuditEntry`].
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub entity_kind: String,
    pub entity_id: String,
    /// Snapshot before the mutation; None on create.
    pub before: Option<Value>,
    /// Snapshot after the mutation; None on delete.
    pub after: Option<Value>,
    pub actor: String,
}

/// A committed audit record. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic, store-assigned.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub actor: String,
}

/// Front door for writing and querying audit entries.
pub struct AuditLog {
    store: Arc<dyn StateStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Append one entry. Failures are logged, never propagated: the
    /// mutation being described has already committed.
    pub fn record(
        &self,
        event: &str,
        entity_kind: &str,
        entity_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        let entry = NewAuditEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            entity_kind: entity_kind.to_string(),
            entity_id: entity_id.to_string(),
            before,
            after,
            actor: ACTOR_SYSTEM.to_string(),
        };

        if let Err(e) = self.store.append_audit(&entry) {
            tracing::warn!(
                event,
                entity_kind,
                entity_id,
                error = %e,
                "failed to append audit entry"
            );
        }
    }

    /// Most recent `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.store.recent_audit(limit)
    }

    /// All entries for one entity, oldest first.
    pub fn for_entity(&self, entity_kind: &str, entity_id: &str) -> Result<Vec<AuditEntry>> {
        self.store.audit_for_entity(entity_kind, entity_id)
    }

    /// All entries with one event name, oldest first.
    pub fn for_event(&self, event: &str) -> Result<Vec<AuditEntry>> {
        self.store.audit_for_event(event)
    }
}

/// Serialize an entity for a snapshot column, falling back to Null if it
/// somehow cannot be serialized.
pub fn snapshot<T: Serialize>(entity: &T) -> Value {
    serde_json::to_value(entity).unwrap_or(Value::Null)
}
