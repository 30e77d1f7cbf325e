//! Lifecycle controller scenarios against the fake multiplexer and
//! scripted adapters.

use std::sync::Arc;

use super::support::{FakeAdapter, FakeMux, Rig, SpawnBehavior};
use crate::adapters::AdapterRegistry;
use crate::agent::{AgentKind, AgentStatus};
use crate::config::MindmuxConfig;
use crate::lifecycle::LifecycleController;
use crate::storage::NewAgent;
use crate::task::TaskStatus;

struct LifecycleRig {
    rig: Rig,
    mux: Arc<FakeMux>,
    adapter: Arc<FakeAdapter>,
    lifecycle: LifecycleController,
}

fn lifecycle_rig() -> LifecycleRig {
    let rig = Rig::new();
    let mux = Arc::new(FakeMux::new("mindmux"));
    let adapter = Arc::new(FakeAdapter::new(AgentKind::Claude));
    let adapters = AdapterRegistry::empty();
    adapters.register(adapter.clone());

    let lifecycle = LifecycleController::new(
        Arc::clone(&rig.agents),
        Arc::clone(&rig.tasks),
        Arc::clone(&rig.sessions),
        mux.clone(),
        Arc::new(adapters),
        Arc::clone(&rig.metrics),
        &MindmuxConfig::default(),
    );

    LifecycleRig {
        rig,
        mux,
        adapter,
        lifecycle,
    }
}

fn create_agent(rig: &Rig, name: &str) -> String {
    rig.agents
        .create(NewAgent {
            name: name.to_string(),
            kind: AgentKind::Claude,
            capabilities: Default::default(),
            config: Default::default(),
        })
        .unwrap()
        .id
}

#[tokio::test]
async fn test_start_agent_happy_path() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");

    let started = lr.lifecycle.start_agent("dev-1").await.unwrap();
    assert!(started.is_running);
    assert_eq!(started.status, AgentStatus::Idle);

    let session = lr.lifecycle.session_name(&id);
    assert_eq!(started.session_name.as_deref(), Some(session.as_str()));
    assert!(lr.mux.session_names().contains(&session));
    assert_eq!(lr.rig.sessions.live().len(), 1);
    assert_eq!(lr.rig.metrics.snapshot().agents_started, 1);
}

#[tokio::test]
async fn test_start_running_agent_rejected() {
    let lr = lifecycle_rig();
    create_agent(&lr.rig, "dev-1");

    lr.lifecycle.start_agent("dev-1").await.unwrap();
    let err = lr.lifecycle.start_agent("dev-1").await.unwrap_err();
    assert!(err.to_string().contains("already running"));
}

#[tokio::test]
async fn test_start_unknown_agent() {
    let lr = lifecycle_rig();
    let err = lr.lifecycle.start_agent("ghost").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_spawn_failure_unwinds() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");
    lr.adapter.set_spawn(SpawnBehavior::Broken);

    assert!(lr.lifecycle.start_agent("dev-1").await.is_err());

    let agent = lr.rig.agents.get(&id).unwrap();
    assert!(!agent.is_running);
    assert!(agent.session_name.is_none());
    // the half-started session was killed
    assert!(lr.mux.session_names().is_empty());
    assert!(lr.rig.sessions.live().is_empty());
}

#[tokio::test]
async fn test_readiness_timeout_leaves_session_flags_unhealthy() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");
    lr.adapter.set_spawn(SpawnBehavior::NeverReady);

    let err = lr.lifecycle.start_agent("dev-1").await.unwrap_err();
    assert_eq!(err.code(), "TIMEOUT");

    let agent = lr.rig.agents.get(&id).unwrap();
    assert_eq!(agent.status, AgentStatus::Unhealthy);
    // the session is deliberately kept for inspection
    assert_eq!(lr.mux.session_names().len(), 1);
}

#[tokio::test]
async fn test_stop_agent_is_idempotent() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");

    lr.lifecycle.start_agent("dev-1").await.unwrap();
    lr.lifecycle.stop_agent("dev-1").await.unwrap();

    let agent = lr.rig.agents.get(&id).unwrap();
    assert!(!agent.is_running);
    assert!(agent.session_name.is_none());
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(lr.mux.session_names().is_empty());
    assert_eq!(lr.adapter.terminated.lock().len(), 1);

    // stopping again is a quiet success
    lr.lifecycle.stop_agent("dev-1").await.unwrap();
    assert_eq!(lr.adapter.terminated.lock().len(), 1);
}

#[tokio::test]
async fn test_execute_task_records_result() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");
    lr.lifecycle.start_agent("dev-1").await.unwrap();
    lr.adapter.set_response("42");

    let task = lr.lifecycle.execute_task(&id, "what is the answer").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some("42"));
    assert_eq!(task.assigned_agent_id.as_deref(), Some(id.as_str()));

    // agent reverted to idle
    assert_eq!(lr.rig.agents.get(&id).unwrap().status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_execute_task_on_stopped_agent_fails() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");

    let err = lr.lifecycle.execute_task(&id, "anyone there?").await.unwrap_err();
    assert!(err.to_string().contains("no live session"));

    // the attempt left a failed task record behind
    let failed = lr.rig.tasks.with_status(TaskStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error_message.is_some());
}

#[tokio::test]
async fn test_monitor_health_detects_vanished_session() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");
    lr.lifecycle.start_agent("dev-1").await.unwrap();
    assert!(lr.lifecycle.monitor_agent_health(&id).await.unwrap());

    // kill the session behind the controller's back
    let session = lr.lifecycle.session_name(&id);
    use crate::mux::Multiplexer;
    lr.mux.kill_session(&session).await.unwrap();

    assert!(!lr.lifecycle.monitor_agent_health(&id).await.unwrap());
    let agent = lr.rig.agents.get(&id).unwrap();
    assert_eq!(agent.status, AgentStatus::Unhealthy);
    assert!(!agent.is_running);
}

// Property 9: orphans are killed, owned sessions are left alone, stale
// running flags are cleared.
#[tokio::test]
async fn test_orphan_sweep() {
    let lr = lifecycle_rig();
    let owned_id = create_agent(&lr.rig, "dev-1");
    lr.lifecycle.start_agent("dev-1").await.unwrap();

    // a session with our prefix but no matching agent
    lr.mux.seed_session("mindmux-deadbeef", "");
    // a foreign session outside our prefix, never touched
    lr.mux.seed_session("someone-elses-session", "");

    // an agent flagged running whose session is gone
    let stale_id = create_agent(&lr.rig, "stale-1");
    lr.rig
        .agents
        .update(&stale_id, "agent:started", |a| {
            a.is_running = true;
            a.session_name = Some("mindmux-gone".to_string());
        })
        .unwrap();

    let sweep = lr.lifecycle.recover_orphaned_sessions().await.unwrap();

    assert_eq!(sweep.killed_sessions, vec!["mindmux-deadbeef".to_string()]);
    assert_eq!(sweep.cleared_agents, vec![stale_id.clone()]);

    let names = lr.mux.session_names();
    assert!(names.contains(&lr.lifecycle.session_name(&owned_id)));
    assert!(names.contains(&"someone-elses-session".to_string()));
    assert!(!names.contains(&"mindmux-deadbeef".to_string()));

    let stale = lr.rig.agents.get(&stale_id).unwrap();
    assert!(!stale.is_running);
    assert!(stale.session_name.is_none());

    // the healthy agent is untouched
    assert!(lr.rig.agents.get(&owned_id).unwrap().is_running);
}

#[tokio::test]
async fn test_get_agent_logs() {
    let lr = lifecycle_rig();
    let id = create_agent(&lr.rig, "dev-1");
    lr.lifecycle.start_agent("dev-1").await.unwrap();

    let session = lr.lifecycle.session_name(&id);
    lr.mux.set_pane(&session, "line one\nline two");

    let logs = lr.lifecycle.get_agent_logs("dev-1", 50).await.unwrap();
    assert!(logs.contains("line two"));

    lr.lifecycle.stop_agent("dev-1").await.unwrap();
    assert!(lr.lifecycle.get_agent_logs("dev-1", 50).await.is_err());
}

#[tokio::test]
async fn test_stop_all_agents() {
    let lr = lifecycle_rig();
    create_agent(&lr.rig, "dev-1");
    create_agent(&lr.rig, "dev-2");
    lr.lifecycle.start_agent("dev-1").await.unwrap();
    lr.lifecycle.start_agent("dev-2").await.unwrap();
    assert_eq!(lr.lifecycle.list_running_agents().len(), 2);

    lr.lifecycle.stop_all_agents().await.unwrap();
    assert!(lr.lifecycle.list_running_agents().is_empty());
    assert!(lr.mux.session_names().is_empty());
    assert_eq!(lr.rig.metrics.snapshot().agents_stopped, 2);
}
