//! Per-assistant CLI adapters.
//!
//! Each assistant variant ships an interactive CLI with its own launch
//! command, readiness banner, and quit convention. The differences are
//! small and table-driven ([`VendorProfile`]); the mechanics of driving a
//! CLI through a pane (snapshot, type, wait, diff) are shared in
//! [`AdapterEngine`]. Adding a vendor means adding one profile file under
//! this module; the scheduler never changes.

pub mod claude;
pub mod gemini;
pub mod gpt4;
pub mod opencode;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::AgentKind;
use crate::error::{MindmuxError, Result};
use crate::monitor::{normalize_pane, MonitorOptions, OutputMonitor, WaitOutcome};
use crate::mux::Multiplexer;
use crate::utils::CommandExecutor;

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use gpt4::Gpt4Adapter;
pub use opencode::OpenCodeAdapter;

/// How long a freshly spawned CLI gets to print its ready prompt.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period after sending the quit token.
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// Result of probing PATH for the vendor binary.
#[derive(Debug, Clone)]
pub struct InstallProbe {
    pub installed: bool,
    /// Human install instructions, populated on a miss.
    pub instructions: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub work_dir: Option<PathBuf>,
    pub model: Option<String>,
}

/// Outcome of one prompt round-trip.
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    pub success: bool,
    /// Only the text that appeared after the prompt was sent.
    pub output: String,
    pub duration: Duration,
    pub error: Option<String>,
    /// True when the failure was the per-attempt wall-clock ceiling.
    pub timed_out: bool,
}

/// How a vendor CLI is asked to exit.
#[derive(Debug, Clone, Copy)]
pub enum QuitToken {
    /// A slash command typed into the CLI, e.g. `/exit`.
    Command(&'static str),
    /// Ctrl-C.
    Interrupt,
}

/// Static description of one vendor CLI.
#[derive(Debug)]
pub struct VendorProfile {
    pub kind: AgentKind,
    /// Shell command name expected on PATH.
    pub command: &'static str,
    pub launch_args: &'static [&'static str],
    /// Flag used to pass a model name, if the CLI takes one.
    pub model_flag: Option<&'static str>,
    /// Regex that must match the settled pane before the CLI counts as
    /// ready.
    pub ready_pattern: &'static str,
    pub quit_token: QuitToken,
    pub install_hint: &'static str,
}

/// Contract every assistant variant implements.
#[async_trait]
pub trait CliAdapter: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Shell command name the adapter expects on PATH.
    fn command(&self) -> &'static str;

    async fn check_installed(&self) -> InstallProbe;

    /// Launch the vendor CLI inside the session and wait for readiness.
    async fn spawn_process(&self, session: &str, opts: &SpawnOptions) -> Result<()>;

    /// Type a prompt and wait for the response to settle.
    async fn send_prompt(
        &self,
        session: &str,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<PromptOutcome>;

    /// Two captures 500 ms apart; true iff identical.
    async fn is_idle(&self, session: &str) -> Result<bool>;

    /// Send the vendor quit token and give the CLI a moment to exit.
    async fn terminate(&self, session: &str) -> Result<()>;
}

/// Shared mechanics for pane-driven CLIs. Vendor adapters wrap one of
/// these around their profile.
pub struct AdapterEngine {
    mux: Arc<dyn Multiplexer>,
    monitor: OutputMonitor,
    profile: &'static VendorProfile,
}

impl AdapterEngine {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        options: MonitorOptions,
        profile: &'static VendorProfile,
    ) -> Self {
        let monitor = OutputMonitor::new(Arc::clone(&mux), options);
        Self {
            mux,
            monitor,
            profile,
        }
    }

    pub fn profile(&self) -> &'static VendorProfile {
        self.profile
    }

    pub async fn check_installed(&self) -> InstallProbe {
        let installed = CommandExecutor::command_exists(self.profile.command).await;
        InstallProbe {
            installed,
            instructions: if installed {
                String::new()
            } else {
                format!(
                    "'{}' was not found on PATH. {}",
                    self.profile.command, self.profile.install_hint
                )
            },
        }
    }

    pub async fn spawn_process(&self, session: &str, opts: &SpawnOptions) -> Result<()> {
        let probe = self.check_installed().await;
        if !probe.installed {
            return Err(MindmuxError::ExternalTool {
                tool: self.profile.command.to_string(),
                hint: probe.instructions,
            });
        }

        let launch = build_launch_command(self.profile, opts);
        self.mux.send_keystrokes(session, &launch).await?;

        self.await_ready(session).await
    }

    /// Wait for the settled pane to show the vendor's ready prompt.
    async fn await_ready(&self, session: &str) -> Result<()> {
        let ready = Regex::new(self.profile.ready_pattern)
            .map_err(|e| MindmuxError::Internal(format!("bad ready pattern: {}", e)))?;
        let deadline = std::time::Instant::now() + READY_TIMEOUT;

        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(MindmuxError::Timeout(READY_TIMEOUT));
            }

            match self.monitor.wait_for_idle(session, Some(remaining)).await {
                WaitOutcome::Complete { output, .. } => {
                    if ready.is_match(&output) {
                        tracing::debug!(session, command = self.profile.command, "CLI ready");
                        return Ok(());
                    }
                    // Settled on something that is not the prompt yet
                    // (login screen, spinner frame); keep watching.
                    tokio::time::sleep(self.monitor.options().poll_interval).await;
                }
                WaitOutcome::TimedOut { .. } => {
                    return Err(MindmuxError::Timeout(READY_TIMEOUT));
                }
                WaitOutcome::CaptureError { message } => {
                    return Err(MindmuxError::Transient(message));
                }
            }
        }
    }

    pub async fn send_prompt(
        &self,
        session: &str,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<PromptOutcome> {
        crate::task::validate_prompt(prompt)?;

        let snapshot = self
            .mux
            .capture_pane(session, self.monitor.options().capture_lines)
            .await?;
        let snapshot = normalize_pane(&snapshot);

        for line in prepare_prompt_lines(prompt) {
            self.mux.send_keystrokes(session, &line).await?;
        }

        match self.monitor.wait_for_idle(session, timeout).await {
            WaitOutcome::Complete { output, duration } => Ok(PromptOutcome {
                success: true,
                output: extract_new_text(&snapshot, &output),
                duration,
                error: None,
                timed_out: false,
            }),
            WaitOutcome::TimedOut { elapsed } => Ok(PromptOutcome {
                success: false,
                output: String::new(),
                duration: elapsed,
                error: Some(format!(
                    "no response within {:?}",
                    timeout.unwrap_or(self.monitor.options().timeout)
                )),
                timed_out: true,
            }),
            WaitOutcome::CaptureError { message } => Ok(PromptOutcome {
                success: false,
                output: String::new(),
                duration: Duration::ZERO,
                error: Some(message),
                timed_out: false,
            }),
        }
    }

    pub async fn is_idle(&self, session: &str) -> Result<bool> {
        let lines = self.monitor.options().capture_lines;
        let first = normalize_pane(&self.mux.capture_pane(session, lines).await?);
        tokio::time::sleep(Duration::from_millis(500)).await;
        let second = normalize_pane(&self.mux.capture_pane(session, lines).await?);
        Ok(first == second)
    }

    pub async fn terminate(&self, session: &str) -> Result<()> {
        match self.profile.quit_token {
            QuitToken::Command(token) => {
                self.mux.send_keystrokes(session, token).await?;
            }
            QuitToken::Interrupt => {
                self.mux.send_interrupt(session).await?;
            }
        }
        tokio::time::sleep(QUIT_GRACE).await;
        Ok(())
    }
}

/// Build the shell line that launches the vendor CLI, `cd`-ing into the
/// work directory first when one is given.
pub fn build_launch_command(profile: &VendorProfile, opts: &SpawnOptions) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(profile.command.to_string());
    for arg in profile.launch_args {
        parts.push((*arg).to_string());
    }
    if let (Some(flag), Some(model)) = (profile.model_flag, opts.model.as_deref()) {
        parts.push(flag.to_string());
        parts.push(model.to_string());
    }
    let launch = parts.join(" ");

    match opts.work_dir.as_deref() {
        Some(dir) => format!("cd '{}' && {}", dir.display(), launch),
        None => launch,
    }
}

/// Turn a prompt into the keystroke lines to send. Single-line prompts
/// have shell metacharacters escaped; multi-line prompts are wrapped in
/// a heredoc so embedded blank lines cannot be taken as submissions.
pub fn prepare_prompt_lines(prompt: &str) -> Vec<String> {
    if !prompt.contains('\n') {
        return vec![escape_prompt_line(prompt)];
    }

    let marker = heredoc_marker();
    let mut lines = Vec::with_capacity(prompt.lines().count() + 2);
    lines.push(format!("<<'{}'", marker));
    for line in prompt.lines() {
        lines.push(line.to_string());
    }
    lines.push(marker);
    lines
}

/// Backslash-escape characters the shell would otherwise interpret.
pub fn escape_prompt_line(line: &str) -> String {
    let mut escaped = String::with_capacity(line.len());
    for c in line.chars() {
        if matches!(c, '\\' | '`' | '$' | '"' | ';' | '&' | '|' | '<' | '>') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn heredoc_marker() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("MINDMUX_EOF_{}", &id[..8])
}

/// Extract only the text that appeared after `snapshot` was taken.
pub fn extract_new_text(snapshot: &str, current: &str) -> String {
    if snapshot.is_empty() {
        return current.trim().to_string();
    }
    if let Some(rest) = current.strip_prefix(snapshot) {
        return rest.trim().to_string();
    }

    // The pane scrolled; anchor on the snapshot's last non-empty line.
    if let Some(anchor) = snapshot.lines().rev().find(|l| !l.trim().is_empty()) {
        if let Some(pos) = current.find(anchor) {
            return current[pos + anchor.len()..].trim().to_string();
        }
    }
    current.trim().to_string()
}

/// Adapter lookup keyed by [`AgentKind`].
pub struct AdapterRegistry {
    adapters: DashMap<AgentKind, Arc<dyn CliAdapter>>,
}

impl AdapterRegistry {
    /// Registry with all built-in vendors.
    pub fn with_defaults(mux: Arc<dyn Multiplexer>, options: MonitorOptions) -> Self {
        let registry = Self {
            adapters: DashMap::new(),
        };
        registry.register(Arc::new(ClaudeAdapter::new(
            Arc::clone(&mux),
            options.clone(),
        )));
        registry.register(Arc::new(GeminiAdapter::new(
            Arc::clone(&mux),
            options.clone(),
        )));
        registry.register(Arc::new(Gpt4Adapter::new(
            Arc::clone(&mux),
            options.clone(),
        )));
        registry.register(Arc::new(OpenCodeAdapter::new(mux, options)));
        registry
    }

    /// Empty registry; used by tests to install fakes.
    pub fn empty() -> Self {
        Self {
            adapters: DashMap::new(),
        }
    }

    pub fn register(&self, adapter: Arc<dyn CliAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn for_kind(&self, kind: AgentKind) -> Result<Arc<dyn CliAdapter>> {
        self.adapters
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| MindmuxError::Internal(format!("no adapter registered for {}", kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_prompt_line() {
        assert_eq!(escape_prompt_line("plain words"), "plain words");
        assert_eq!(escape_prompt_line("a;b"), "a\\;b");
        assert_eq!(escape_prompt_line("echo $HOME"), "echo \\$HOME");
        assert_eq!(escape_prompt_line("x|y&z"), "x\\|y\\&z");
        assert_eq!(escape_prompt_line("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_prepare_single_line() {
        let lines = prepare_prompt_lines("fix the bug");
        assert_eq!(lines, vec!["fix the bug".to_string()]);
    }

    #[test]
    fn test_prepare_multiline_uses_heredoc() {
        let lines = prepare_prompt_lines("first\n\nthird");
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("<<'MINDMUX_EOF_"));
        assert_eq!(lines[1], "first");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "third");
        assert!(lines[4].starts_with("MINDMUX_EOF_"));
        // open marker quotes the close marker
        assert!(lines[0].contains(&lines[4]));
    }

    #[test]
    fn test_extract_new_text_prefix_case() {
        let before = "welcome\n> ";
        let after = "welcome\n> \nanswer text\n";
        assert_eq!(extract_new_text(before, after), "answer text");
    }

    #[test]
    fn test_extract_new_text_scrolled_pane() {
        let before = "old scrollback\nprompt-anchor-line";
        let after = "prompt-anchor-line\nfresh response";
        assert_eq!(extract_new_text(before, after), "fresh response");
    }

    #[test]
    fn test_extract_new_text_no_overlap() {
        assert_eq!(extract_new_text("gone entirely", "all new"), "all new");
        assert_eq!(extract_new_text("", "everything"), "everything");
    }

    #[test]
    fn test_build_launch_command() {
        let profile = VendorProfile {
            kind: AgentKind::Claude,
            command: "claude",
            launch_args: &[],
            model_flag: Some("--model"),
            ready_pattern: ">",
            quit_token: QuitToken::Command("/exit"),
            install_hint: "",
        };

        let plain = build_launch_command(&profile, &SpawnOptions::default());
        assert_eq!(plain, "claude");

        let with_all = build_launch_command(
            &profile,
            &SpawnOptions {
                work_dir: Some(PathBuf::from("/tmp/work")),
                model: Some("opus".to_string()),
            },
        );
        assert_eq!(with_all, "cd '/tmp/work' && claude --model opus");
    }
}
