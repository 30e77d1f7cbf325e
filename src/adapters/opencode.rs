//! Adapter for the opencode interactive CLI.

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
    kind: AgentKind::OpenCode,
    command: "opencode",
    launch_args: &[],
    model_flag: None,
    ready_pattern: r"(?m)opencode|^\s*>\s*$",
    quit_token: QuitToken::Command("/exit"),
    install_hint: "Install it with `curl -fsSL https://opencode.ai/install | bash`.",
};

pub struct OpenCodeAdapter {
    engine: AdapterEngine,
}

impl OpenCodeAdapter {
    pub fn new(mux: Arc<dyn Multiplexer>, options: MonitorOptions) -> Self {
        Self {
            engine: AdapterEngine::new(mux, options, &PROFILE),
        }
    }
}

#[async_trait]
impl CliAdapter for OpenCodeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::OpenCode
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
