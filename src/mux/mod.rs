//! Terminal multiplexer driver.
//!
//! The only strict contract with the outside world: session names are
//! addressable, pane contents are capturable, and keystrokes are
//! injectable. Everything mindmux knows about a running CLI it learns by
//! reading the pane.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MindmuxError, Result};

/// Maximum accepted length for a session name.
pub const MAX_SESSION_NAME_LEN: usize = 200;

/// Abstraction over the underlying terminal multiplexer. Production uses
/// [`TmuxDriver`]; tests substitute an in-memory fake.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session running `shell`. Fails if a session with
    /// that name already exists.
    async fn create_session(&self, name: &str, shell: &str, cwd: Option<&Path>) -> Result<()>;

    async fn has_session(&self, name: &str) -> Result<bool>;

    /// Session names belonging to this system (filtered by prefix).
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Append `text` followed by a newline to the session's active pane.
    /// The text is delivered literally; control bytes are stripped first.
    async fn send_keystrokes(&self, name: &str, text: &str) -> Result<()>;

    /// Deliver Ctrl-C to the session's active pane.
    async fn send_interrupt(&self, name: &str) -> Result<()>;

    /// The most recent `lines` lines of the active pane.
    async fn capture_pane(&self, name: &str, lines: u32) -> Result<String>;

    /// Idempotent: killing an absent session is a success.
    async fn kill_session(&self, name: &str) -> Result<()>;
}

/// Driver for tmux
pub struct TmuxDriver {
    /// Sessions are named `<prefix>-...`; `list_sessions` only reports
    /// names under this prefix.
    prefix: String,
}

impl TmuxDriver {
    /// Connect to tmux, probing that the binary is present.
    pub async fn connect(prefix: impl Into<String>) -> Result<Self> {
        let driver = Self {
            prefix: prefix.into(),
        };
        driver.ping().await?;
        Ok(driver)
    }

    /// Probe the tmux binary. Does not require a running server.
    pub async fn ping(&self) -> Result<()> {
        let output = Command::new("tmux")
            .arg("-V")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| unavailable(&e.to_string()))?;
        if !output.status.success() {
            return Err(unavailable("tmux -V failed"));
        }
        Ok(())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("tmux")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| unavailable(&e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("no server running") {
                return Err(MindmuxError::MultiplexerUnavailable(stderr));
            }
            return Err(MindmuxError::Internal(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn unavailable(detail: &str) -> MindmuxError {
    MindmuxError::MultiplexerUnavailable(format!(
        "tmux is not installed or not runnable ({})",
        detail
    ))
}

#[async_trait]
impl Multiplexer for TmuxDriver {
    async fn create_session(&self, name: &str, shell: &str, cwd: Option<&Path>) -> Result<()> {
        sanitize_session_name(name)?;

        if self.has_session(name).await? {
            return Err(MindmuxError::AlreadyInUse(name.to_string()));
        }

        let cwd_str = cwd.map(|p| p.display().to_string());
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(dir) = cwd_str.as_deref() {
            args.extend_from_slice(&["-c", dir]);
        }
        args.push(shell);

        self.run(&args).await?;
        tracing::debug!(session = name, "created multiplexer session");
        Ok(())
    }

    async fn has_session(&self, name: &str) -> Result<bool> {
        sanitize_session_name(name)?;

        let output = Command::new("tmux")
            .args(["has-session", "-t", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| unavailable(&e.to_string()))?;

        Ok(output.success())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let output = match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(out) => out,
            // A dead server means no sessions, not a failure.
            Err(MindmuxError::MultiplexerUnavailable(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let prefix = format!("{}-", self.prefix);
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with(&prefix))
            .map(str::to_string)
            .collect())
    }

    async fn send_keystrokes(&self, name: &str, text: &str) -> Result<()> {
        sanitize_session_name(name)?;

        let cleaned = strip_control_bytes(text);
        // -l delivers the text literally so tmux key names and control
        // sequences inside the text cannot be interpreted; the newline is
        // delivered as a separate Enter key.
        self.run(&["send-keys", "-t", name, "-l", "--", &cleaned])
            .await?;
        self.run(&["send-keys", "-t", name, "Enter"]).await?;
        Ok(())
    }

    async fn send_interrupt(&self, name: &str) -> Result<()> {
        sanitize_session_name(name)?;
        self.run(&["send-keys", "-t", name, "C-c"]).await?;
        Ok(())
    }

    async fn capture_pane(&self, name: &str, lines: u32) -> Result<String> {
        sanitize_session_name(name)?;

        let start = format!("-{}", lines);
        let output = self
            .run(&["capture-pane", "-p", "-t", name, "-S", &start])
            .await?;

        // tmux may return more history than asked for; keep the tail.
        let all: Vec<&str> = output.lines().collect();
        let keep = all.len().saturating_sub(lines as usize);
        Ok(all[keep..].join("\n"))
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        sanitize_session_name(name)?;

        if !self.has_session(name).await? {
            return Ok(());
        }
        self.run(&["kill-session", "-t", name]).await?;
        tracing::debug!(session = name, "killed multiplexer session");
        Ok(())
    }
}

/// Session names received from callers are whitelisted to
/// `[A-Za-z0-9_%:-]` and length-bounded, because they are spliced into
/// tmux command lines.
pub fn sanitize_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MindmuxError::Validation(
            "session name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_SESSION_NAME_LEN {
        return Err(MindmuxError::Validation(format!(
            "session name exceeds {} characters",
            MAX_SESSION_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '%' | ':' | '-'))
    {
        return Err(MindmuxError::Validation(format!(
            "session name '{}' contains characters outside [A-Za-z0-9_%:-]",
            name
        )));
    }
    Ok(())
}

/// Drop ASCII control bytes (including escape) so pasted text cannot
/// smuggle terminal sequences. Tabs are preserved.
pub fn strip_control_bytes(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}
