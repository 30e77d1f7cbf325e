use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Complete mindmux configuration.
///
/// Loaded by the front-end collaborators and handed to
/// [`crate::Orchestrator::new`]; every field has a usable default so the
/// core can also be constructed with `MindmuxConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindmuxConfig {
    /// Directory holding the durable store and fallback files.
    pub data_dir: PathBuf,

    /// Prefix for multiplexer session names. Sessions are named
    /// `<prefix>-<agentId>`; the prefix is how mindmux recognises its own
    /// sessions among everything else running on the tmux server.
    pub session_prefix: String,

    /// Shell started inside new sessions.
    pub shell: String,

    /// Pane capture poll interval for the output monitor, in milliseconds.
    pub poll_interval_ms: u64,

    /// How long the pane hash must stay unchanged before a response is
    /// considered complete, in milliseconds.
    pub idle_threshold_ms: u64,

    /// Per-attempt wall-clock ceiling for one prompt execution, in
    /// milliseconds. Tasks may override this per task.
    pub default_task_timeout_ms: u64,

    /// Default retry budget for enqueued tasks.
    pub default_max_retries: u32,

    /// Default priority for enqueued tasks (0-100, higher runs first).
    pub default_priority: u8,

    /// Number of pane lines captured per poll.
    pub capture_lines: u32,
}

impl Default for MindmuxConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".mindmux"),
            session_prefix: "mindmux".to_string(),
            shell: "/bin/bash".to_string(),
            poll_interval_ms: 500,
            idle_threshold_ms: 2_000,
            default_task_timeout_ms: 300_000,
            default_max_retries: 3,
            default_priority: 50,
            capture_lines: 200,
        }
    }
}

impl MindmuxConfig {
    /// Load configuration from a JSON file.
    pub async fn from_file(path: PathBuf) -> Result<Self> {
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            crate::error::MindmuxError::InvariantViolation {
                path: path.display().to_string(),
                detail: e.to_string(),
            }
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            crate::error::MindmuxError::InvariantViolation {
                path: path.display().to_string(),
                detail: e.to_string(),
            }
        })?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub async fn to_file(&self, path: PathBuf) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| crate::error::MindmuxError::Store(e.to_string()))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_millis(self.default_task_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MindmuxConfig::default();
        assert_eq!(config.session_prefix, "mindmux");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.idle_threshold_ms, 2_000);
        assert_eq!(config.default_task_timeout_ms, 300_000);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_priority, 50);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = MindmuxConfig::default();
        config.session_prefix = "mm-test".to_string();
        config.default_priority = 75;

        config.to_file(path.clone()).await.unwrap();
        let loaded = MindmuxConfig::from_file(path).await.unwrap();

        assert_eq!(loaded.session_prefix, "mm-test");
        assert_eq!(loaded.default_priority, 75);
    }

    #[tokio::test]
    async fn test_from_file_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "not json at all").await.unwrap();

        let err = MindmuxConfig::from_file(path).await.unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }
}
