//! Output monitor: decides when an interactive CLI has produced a
//! complete response by watching the pane settle.
//!
//! Interactive CLIs have no structured stdout, so the only completion
//! signal available is "the screen stopped changing". The monitor
//! captures the pane on an interval, normalizes it (ANSI stripped,
//! trailing whitespace trimmed), hashes it, and declares the response
//! complete once the hash has been stable for the idle threshold. It is
//! purely observational and never writes to the session.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::mux::Multiplexer;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    /// How long the normalized pane hash must stay unchanged.
    pub idle_threshold: Duration,
    /// Total wall-clock ceiling for one wait.
    pub timeout: Duration,
    /// Pane lines captured per poll.
    pub capture_lines: u32,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            idle_threshold: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
            capture_lines: 200,
        }
    }
}

/// Result of one wait.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The pane went idle; `output` is the final normalized capture.
    Complete { output: String, duration: Duration },
    TimedOut { elapsed: Duration },
    CaptureError { message: String },
}

impl WaitOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, WaitOutcome::Complete { .. })
    }
}

pub struct OutputMonitor {
    mux: Arc<dyn Multiplexer>,
    options: MonitorOptions,
}

impl OutputMonitor {
    pub fn new(mux: Arc<dyn Multiplexer>, options: MonitorOptions) -> Self {
        Self { mux, options }
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Poll the session's pane until it has been stable for the idle
    /// threshold, the timeout elapses, or a capture fails.
    pub async fn wait_for_idle(&self, session: &str, timeout: Option<Duration>) -> WaitOutcome {
        let timeout = timeout.unwrap_or(self.options.timeout);
        let started = Instant::now();

        let mut last_hash: Option<u64> = None;
        let mut stable_since = Instant::now();

        loop {
            if started.elapsed() >= timeout {
                tracing::debug!(session, elapsed_ms = started.elapsed().as_millis() as u64, "output wait timed out");
                return WaitOutcome::TimedOut {
                    elapsed: started.elapsed(),
                };
            }

            let pane = match self
                .mux
                .capture_pane(session, self.options.capture_lines)
                .await
            {
                Ok(pane) => pane,
                Err(e) => {
                    return WaitOutcome::CaptureError {
                        message: e.to_string(),
                    }
                }
            };

            let normalized = normalize_pane(&pane);
            let hash = stable_hash(&normalized);

            match last_hash {
                Some(prev) if prev == hash => {
                    if stable_since.elapsed() >= self.options.idle_threshold {
                        return WaitOutcome::Complete {
                            output: normalized,
                            duration: started.elapsed(),
                        };
                    }
                }
                _ => {
                    last_hash = Some(hash);
                    stable_since = Instant::now();
                }
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\^_]").unwrap()
});

/// Strip ANSI escapes and trailing whitespace so cursor blinks and
/// repaint noise do not defeat stability detection.
pub fn normalize_pane(pane: &str) -> String {
    let stripped = ANSI_PATTERN.replace_all(pane, "");
    let trimmed: Vec<&str> = stripped.lines().map(str::trim_end).collect();
    trimmed.join("\n").trim_end().to_string()
}

pub fn stable_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_ansi() {
        let raw = "\x1b[32mgreen\x1b[0m text   \nnext line\t \n";
        assert_eq!(normalize_pane(raw), "green text\nnext line");
    }

    #[test]
    fn test_normalize_strips_osc_titles() {
        let raw = "\x1b]0;window title\x07prompt>";
        assert_eq!(normalize_pane(raw), "prompt>");
    }

    #[test]
    fn test_hash_is_stable_under_trailing_noise() {
        let a = stable_hash(&normalize_pane("output\n"));
        let b = stable_hash(&normalize_pane("output   \n\n"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_differs_for_new_content() {
        let a = stable_hash(&normalize_pane("thinking..."));
        let b = stable_hash(&normalize_pane("thinking... done"));
        assert_ne!(a, b);
    }
}
