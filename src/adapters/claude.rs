//! Adapter for the Claude Code interactive CLI.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{
    AdapterEngine, CliAdapter, InstallProbe, PromptOutcome, QuitToken, SpawnOptions, VendorProfile,
};
use crate::agent::AgentKind;
use crate::error::Result;
use crate::monitor::MonitorOptions;
use crate::mux::Multiplexer;

static PROFILE: VendorProfile = VendorProfile {
    kind: AgentKind::Claude,
    command: "claude",
    launch_args: &[],
    model_flag: Some("--model"),
    // Claude Code settles on a `>` input box once startup finishes.
    ready_pattern: r"(?m)Claude Code|^\s*>\s*$",
    quit_token: QuitToken::Command("/exit"),
    install_hint: "Install it with `npm install -g @anthropic-ai/claude-code` and sign in once.",
};

pub struct ClaudeAdapter {
    engine: AdapterEngine,
}

impl ClaudeAdapter {
    pub fn new(mux: Arc<dyn Multiplexer>, options: MonitorOptions) -> Self {
        Self {
            engine: AdapterEngine::new(mux, options, &PROFILE),
        }
    }
}

#[async_trait]
impl CliAdapter for ClaudeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn command(&self) -> &'static str {
        PROFILE.command
    }

    async fn check_installed(&self) -> InstallProbe {
        self.engine.check_installed().await
    }

    async fn spawn_process(&self, session: &str, opts: &SpawnOptions) -> Result<()> {
        self.engine.spawn_process(session, opts).await
    }

    async fn send_prompt(
        &self,
        session: &str,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<PromptOutcome> {
        self.engine.send_prompt(session, prompt, timeout).await
    }

    async fn is_idle(&self, session: &str) -> Result<bool> {
        self.engine.is_idle(session).await
    }

    async fn terminate(&self, session: &str) -> Result<()> {
        self.engine.terminate(session).await
    }
}
