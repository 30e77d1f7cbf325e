//! Adapter for the gpt4 interactive CLI.
//!
//! Unlike the slash-command CLIs, gpt4 has no quit command; termination
//! is an interrupt.

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
    kind: AgentKind::Gpt4,
    command: "gpt4",
    launch_args: &["--interactive"],
    model_flag: Some("--model"),
    ready_pattern: r"(?m)GPT-4|^\s*(?:gpt)?>\s*$",
    quit_token: QuitToken::Interrupt,
    install_hint: "Install the gpt4 CLI with `pip install gpt4-cli` and run `gpt4 login` once.",
};

pub struct Gpt4Adapter {
    engine: AdapterEngine,
}

impl Gpt4Adapter {
    pub fn new(mux: Arc<dyn Multiplexer>, options: MonitorOptions) -> Self {
        Self {
            engine: AdapterEngine::new(mux, options, &PROFILE),
        }
    }
}

#[async_trait]
impl CliAdapter for Gpt4Adapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Gpt4
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
