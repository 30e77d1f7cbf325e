//! Shared fakes and fixtures: an in-memory multiplexer, a scripted
//! prompt runner, a scripted adapter, and a wiring rig over an
//! in-memory store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapters::{CliAdapter, InstallProbe, PromptOutcome, SpawnOptions};
use crate::agent::{Agent, AgentKind, AgentRuntimeConfig, AgentStatus, Capability};
use crate::error::{MindmuxError, Result};
use crate::metrics::Counters;
use crate::mux::Multiplexer;
use crate::scheduler::{
    PromptRunner, SchedulerDefaults, Strategy, TaskScheduler,
};
use crate::storage::{
    AgentStore, AuditLog, NewAgent, SessionStore, SqliteStore, StateCache, StateStore, TaskStore,
};

/// In-memory multiplexer: session name -> pane text.
pub struct FakeMux {
    prefix: String,
    sessions: Mutex<HashMap<String, String>>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeMux {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            sessions: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Install a session without going through create_session.
    pub fn seed_session(&self, name: &str, pane: &str) {
        self.sessions
            .lock()
            .insert(name.to_string(), pane.to_string());
    }

    pub fn set_pane(&self, name: &str, pane: &str) {
        if let Some(existing) = self.sessions.lock().get_mut(name) {
            *existing = pane.to_string();
        }
    }

    pub fn session_names(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn create_session(&self, name: &str, _shell: &str, _cwd: Option<&Path>) -> Result<()> {
        crate::mux::sanitize_session_name(name)?;
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(name) {
            return Err(MindmuxError::AlreadyInUse(name.to_string()));
        }
        sessions.insert(name.to_string(), String::new());
        Ok(())
    }

    async fn has_session(&self, name: &str) -> Result<bool> {
        Ok(self.sessions.lock().contains_key(name))
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let prefix = format!("{}-", self.prefix);
        let mut names: Vec<String> = self
            .sessions
            .lock()
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn send_keystrokes(&self, name: &str, text: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let pane = sessions
            .get_mut(name)
            .ok_or_else(|| MindmuxError::Internal(format!("no such session '{}'", name)))?;
        pane.push_str(text);
        pane.push('\n');
        self.sent.lock().push((name.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_interrupt(&self, name: &str) -> Result<()> {
        self.sent.lock().push((name.to_string(), "^C".to_string()));
        Ok(())
    }

    async fn capture_pane(&self, name: &str, _lines: u32) -> Result<String> {
        self.sessions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| MindmuxError::Internal(format!("no such session '{}'", name)))
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.sessions.lock().remove(name);
        Ok(())
    }
}

/// Scripted prompt runner: pops behaviors off a queue, then succeeds by
/// echoing the prompt.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    pub calls: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Fail the first `n` calls with a transient error, then succeed.
    pub fn failing(n: usize) -> Self {
        let runner = Self::new();
        for i in 0..n {
            runner
                .script
                .lock()
                .push_back(Err(format!("transient hiccup #{}", i + 1)));
        }
        runner
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_ok(&self, output: &str) {
        self.script.lock().push_back(Ok(output.to_string()));
    }

    pub fn push_err(&self, message: &str) {
        self.script.lock().push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl PromptRunner for ScriptedRunner {
    async fn run_prompt(&self, agent: &Agent, prompt: &str, _timeout: Duration) -> Result<String> {
        self.calls
            .lock()
            .push((agent.id.clone(), prompt.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.script.lock().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(MindmuxError::Transient(message)),
            None => Ok(format!("echo: {}", prompt)),
        }
    }
}

/// How a [`FakeAdapter`] reacts to spawn_process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnBehavior {
    Ready,
    NeverReady,
    Broken,
}

/// Scripted CLI adapter for lifecycle tests.
pub struct FakeAdapter {
    kind: AgentKind,
    spawn: Mutex<SpawnBehavior>,
    pub terminated: Mutex<Vec<String>>,
    response: Mutex<Option<String>>,
}

impl FakeAdapter {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            spawn: Mutex::new(SpawnBehavior::Ready),
            terminated: Mutex::new(Vec::new()),
            response: Mutex::new(None),
        }
    }

    pub fn set_spawn(&self, behavior: SpawnBehavior) {
        *self.spawn.lock() = behavior;
    }

    pub fn set_response(&self, response: &str) {
        *self.response.lock() = Some(response.to_string());
    }
}

#[async_trait]
impl CliAdapter for FakeAdapter {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn command(&self) -> &'static str {
        "fake"
    }

    async fn check_installed(&self) -> InstallProbe {
        InstallProbe {
            installed: true,
            instructions: String::new(),
        }
    }

    async fn spawn_process(&self, _session: &str, _opts: &SpawnOptions) -> Result<()> {
        match *self.spawn.lock() {
            SpawnBehavior::Ready => Ok(()),
            SpawnBehavior::NeverReady => Err(MindmuxError::Timeout(Duration::from_secs(30))),
            SpawnBehavior::Broken => Err(MindmuxError::Transient("spawn exploded".to_string())),
        }
    }

    async fn send_prompt(
        &self,
        _session: &str,
        prompt: &str,
        _timeout: Option<Duration>,
    ) -> Result<PromptOutcome> {
        let output = self
            .response
            .lock()
            .clone()
            .unwrap_or_else(|| format!("fake: {}", prompt));
        Ok(PromptOutcome {
            success: true,
            output,
            duration: Duration::from_millis(5),
            error: None,
            timed_out: false,
        })
    }

    async fn is_idle(&self, _session: &str) -> Result<bool> {
        Ok(true)
    }

    async fn terminate(&self, session: &str) -> Result<()> {
        self.terminated.lock().push(session.to_string());
        Ok(())
    }
}

/// Stores wired over an in-memory SQLite database.
pub struct Rig {
    pub store: Arc<dyn StateStore>,
    pub cache: Arc<StateCache>,
    pub audit: Arc<AuditLog>,
    pub agents: Arc<AgentStore>,
    pub tasks: Arc<TaskStore>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<Counters>,
}

impl Rig {
    pub fn new() -> Self {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(StateCache::new());
        let audit = Arc::new(AuditLog::new(Arc::clone(&store)));
        let agents = Arc::new(AgentStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));
        let tasks = Arc::new(TaskStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));
        Self {
            store,
            cache,
            audit,
            agents,
            tasks,
            sessions,
            metrics: Arc::new(Counters::new()),
        }
    }

    pub fn scheduler(&self, runner: Arc<dyn PromptRunner>) -> TaskScheduler {
        TaskScheduler::new(
            Arc::clone(&self.tasks),
            Arc::clone(&self.agents),
            runner,
            Strategy::RoundRobin,
            SchedulerDefaults::default(),
            Arc::clone(&self.audit),
            Arc::clone(&self.metrics),
        )
    }

    /// Create an agent already flagged as running, as the scheduler would
    /// see it after a successful start.
    pub fn running_agent(&self, name: &str, caps: &[Capability]) -> Agent {
        self.running_agent_with(name, caps, 1)
    }

    pub fn running_agent_with(
        &self,
        name: &str,
        caps: &[Capability],
        max_concurrent: u32,
    ) -> Agent {
        let capabilities: BTreeSet<Capability> = caps.iter().copied().collect();
        let created = self
            .agents
            .create(NewAgent {
                name: name.to_string(),
                kind: AgentKind::Claude,
                capabilities,
                config: AgentRuntimeConfig {
                    max_concurrent_tasks: max_concurrent,
                    ..Default::default()
                },
            })
            .unwrap();
        self.agents
            .update(&created.id, "agent:started", |a| {
                a.session_name = Some(format!("mindmux-{}", a.id));
                a.is_running = true;
                a.status = AgentStatus::Idle;
            })
            .unwrap()
    }
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for<F: Fn() -> bool>(timeout_ms: u64, predicate: F) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
