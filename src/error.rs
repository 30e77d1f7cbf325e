//! Error taxonomy and boundary codes.
//!
//! Every error that crosses the scheduler or lifecycle façade carries a
//! stable string code so front-ends can branch on it without parsing
//! messages. Internal layers use `?` propagation; nothing in the store
//! layer recovers, the scheduler recovers transient execution failures
//! via retries, and the lifecycle controller recovers only orphan
//! sessions at startup.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MindmuxError>;

/// Boundary codes, stable across versions. Front-end collaborators
/// branch on these strings; some (access, authorization, decryption)
/// are raised only by collaborators outside the core.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ACCESS_DENIED: &str = "ACCESS_DENIED";
    pub const ALREADY_IN_USE: &str = "ALREADY_IN_USE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const AUTHORIZATION_ERROR: &str = "AUTHORIZATION_ERROR";
    pub const DECRYPTION_ERROR: &str = "DECRYPTION_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Error kinds for mindmux operations
#[derive(Debug, thiserror::Error)]
pub enum MindmuxError {
    /// Input outside a whitelist or size bound. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Benign precondition miss, e.g. starting an agent that is already
    /// running.
    #[error("{0}")]
    Precondition(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A unique resource (agent name, session name) is taken.
    #[error("'{0}' is already in use")]
    AlreadyInUse(String),

    /// The terminal multiplexer is absent or its server is not reachable.
    /// Callers must treat this as a hard precondition.
    #[error("terminal multiplexer unavailable: {0}")]
    MultiplexerUnavailable(String),

    /// A required CLI tool is missing from PATH.
    #[error("'{tool}' is not installed: {hint}")]
    ExternalTool { tool: String, hint: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Output capture hiccup, adapter failure mid-prompt. Triggers a task
    /// retry when it surfaces from an execution attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Durable store write or read failure. The mutation did not commit
    /// and the cache is unchanged.
    #[error("store failure: {0}")]
    Store(String),

    /// Corrupt stored record detected at load. The operator is expected
    /// to repair or delete the named file.
    #[error("invalid stored record at {path}: {detail}")]
    InvariantViolation { path: String, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl MindmuxError {
    /// Stable boundary code, guaranteed not to change across versions.
    pub fn code(&self) -> &'static str {
        match self {
            MindmuxError::Validation(_) => codes::VALIDATION_ERROR,
            MindmuxError::Precondition(_) => codes::VALIDATION_ERROR,
            MindmuxError::NotFound { .. } => codes::NOT_FOUND,
            MindmuxError::AlreadyInUse(_) => codes::ALREADY_IN_USE,
            MindmuxError::MultiplexerUnavailable(_) => codes::INTERNAL_ERROR,
            MindmuxError::ExternalTool { .. } => codes::INTERNAL_ERROR,
            MindmuxError::Timeout(_) => codes::TIMEOUT,
            MindmuxError::Transient(_) => codes::INTERNAL_ERROR,
            MindmuxError::Store(_) => codes::INTERNAL_ERROR,
            MindmuxError::InvariantViolation { .. } => codes::INTERNAL_ERROR,
            MindmuxError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether a failed execution attempt with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MindmuxError::Transient(_) | MindmuxError::Timeout(_)
        )
    }

    /// User-facing message: low-level OS error patterns substituted with
    /// generic text, absolute paths stripped.
    pub fn user_message(&self) -> String {
        format_user_message(&self.to_string())
    }
}

impl From<rusqlite::Error> for MindmuxError {
    fn from(err: rusqlite::Error) -> Self {
        MindmuxError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for MindmuxError {
    fn from(err: serde_json::Error) -> Self {
        MindmuxError::Store(format!("serialization: {}", err))
    }
}

static PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[A-Za-z]:)?(?:/[\w.@~-]+){2,}").unwrap());

const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("ENOENT", "a required file or command was not found"),
    ("EADDRINUSE", "the address is already in use"),
    ("ETIMEDOUT", "the operation timed out"),
    ("ECONNREFUSED", "the connection was refused"),
    ("EACCES", "permission was denied"),
    ("EPIPE", "the connection was closed unexpectedly"),
];

/// Produce a user-facing error string: substitute known low-level error
/// patterns, strip filesystem paths, and drop anything that looks like a
/// stack frame.
pub fn format_user_message(raw: &str) -> String {
    for (pattern, replacement) in SUBSTITUTIONS {
        if raw.contains(pattern) {
            return (*replacement).to_string();
        }
    }

    let first_line = raw.lines().next().unwrap_or(raw);
    PATH_PATTERN.replace_all(first_line, "<path>").into_owned()
}
