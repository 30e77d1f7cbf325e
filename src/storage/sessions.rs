//! Write-through repository for session metadata.

use std::sync::Arc;

use super::audit::{self, AuditLog, ENTITY_SESSION};
use super::{StateCache, StateStore};
use crate::error::{MindmuxError, Result};
use crate::session::SessionRecord;

pub struct SessionStore {
    store: Arc<dyn StateStore>,
    cache: Arc<StateCache>,
    audit: Arc<AuditLog>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn StateStore>, cache: Arc<StateCache>, audit: Arc<AuditLog>) -> Self {
        Self {
            store,
            cache,
            audit,
        }
    }

    /// Record a newly created multiplexer session. The multiplexer
    /// session name must not collide with another live session.
    pub fn open(&self, agent_id: &str, mux_session: &str) -> Result<SessionRecord> {
        if self.cache.live_session_for(mux_session).is_some() {
            return Err(MindmuxError::AlreadyInUse(mux_session.to_string()));
        }

        let session = SessionRecord::open(agent_id.to_string(), mux_session.to_string());
        self.store.upsert_session(&session)?;
        self.cache.put_session(session.clone());
        self.audit.record(
            "session:opened",
            ENTITY_SESSION,
            &session.id,
            None,
            Some(audit::snapshot(&session)),
        );
        Ok(session)
    }

    /// Mark the live session for a multiplexer name terminated. A missing
    /// record is benign (e.g. reaping a session we never tracked).
    pub fn close_by_mux_name(&self, mux_session: &str) -> Result<Option<SessionRecord>> {
        let Some(before) = self.cache.live_session_for(mux_session) else {
            return Ok(None);
        };

        let mut session = before.clone();
        session.close();

        self.store.upsert_session(&session)?;
        self.cache.put_session(session.clone());
        self.audit.record(
            "session:terminated",
            ENTITY_SESSION,
            &session.id,
            Some(audit::snapshot(&before)),
            Some(audit::snapshot(&session)),
        );
        Ok(Some(session))
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        self.cache.sessions()
    }

    pub fn live(&self) -> Vec<SessionRecord> {
        self.cache
            .sessions()
            .into_iter()
            .filter(|s| s.is_live())
            .collect()
    }

    /// Drop terminated session records older than the given cutoff.
    pub fn prune_terminated(&self, keep: usize) -> Result<usize> {
        let mut terminated: Vec<SessionRecord> = self
            .cache
            .sessions()
            .into_iter()
            .filter(|s| !s.is_live())
            .collect();
        terminated.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let mut removed = 0;
        for session in terminated.into_iter().skip(keep) {
            self.store.delete_session(&session.id)?;
            self.cache.remove_session(&session.id);
            removed += 1;
        }
        Ok(removed)
    }
}
