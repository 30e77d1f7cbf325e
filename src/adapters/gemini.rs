//! Adapter for the Gemini interactive CLI.

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
    kind: AgentKind::Gemini,
    command: "gemini",
    launch_args: &[],
    model_flag: Some("-m"),
    ready_pattern: r"(?m)Gemini CLI|^\s*>\s*$",
    quit_token: QuitToken::Command("/quit"),
    install_hint: "Install it with `npm install -g @google/gemini-cli` and authenticate once.",
};

pub struct GeminiAdapter {
    engine: AdapterEngine,
}

impl GeminiAdapter {
    pub fn new(mux: Arc<dyn Multiplexer>, options: MonitorOptions) -> Self {
        Self {
            engine: AdapterEngine::new(mux, options, &PROFILE),
        }
    }
}

#[async_trait]
impl CliAdapter for GeminiAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Gemini
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
