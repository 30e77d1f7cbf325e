//! Shared utilities: tracing setup and command execution helpers.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Initialize the tracing subscriber with env-filter support. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mindmux=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Utility for executing shell commands with consistent error handling
pub struct CommandExecutor;

impl CommandExecutor {
    /// Run a command with arguments
    pub async fn run(cmd: &str, args: &[&str], dir: Option<&Path>) -> Result<String> {
        let mut command = Command::new(cmd);
        command.args(args);

        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let output = command
            .output()
            .await
            .context(format!("Failed to execute command: {} {}", cmd, args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Command failed: {} {}\nStderr: {}",
                cmd,
                args.join(" "),
                stderr
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check if a command exists in PATH
    pub async fn command_exists(cmd: &str) -> bool {
        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}
