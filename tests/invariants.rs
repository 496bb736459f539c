//! Universal invariants (§8) exercised end to end. Invariant 3 (replay
//! determinism) and 4 (ledger ordering) are covered by
//! `src/agentloom/ledger.rs`'s unit tests; invariant 7 (registration gate) by
//! `src/agentloom/registration.rs`'s. This file covers 1, 5, 6, and 8, which
//! need a full `agentloom::run` drive to observe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agentloom::agentloom::dispatch::{ToolDispatcher, ToolRequest, ToolResult, ToolsetExecutor, ToolsetRegistration};
use agentloom::agentloom::events::{EventBus, EventKind, RunEvent, Subscriber};
use agentloom::agentloom::ids::{AgentId, RunId, SessionId, ToolCallId, ToolsetId};
use agentloom::agentloom::model::{Model, Request, Response};
use agentloom::agentloom::policy::{DefaultPolicyEngine, PolicyOverrides};
use agentloom::agentloom::registration::{ActivityNames, AgentRegistration, RunPolicy};
use agentloom::agentloom::registry::ToolRegistry;
use agentloom::agentloom::signals::{PauseRequest, ResumeRequest};
use agentloom::agentloom::stores::RunStatus;
use agentloom::agentloom::workflow::{CancelToken, InMemoryEngine, WorkflowContext};
use agentloom::agentloom::{control_loop, Message, Part, Role, RunInput};
use async_trait::async_trait;

struct CountingLookup {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolsetExecutor for CountingLookup {
    async fn execute(&self, _req: ToolRequest, _ctx: &dyn WorkflowContext) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ToolResult::success(serde_json::json!({"value": 42}))
    }
}

fn toolset(executor: Arc<dyn ToolsetExecutor>, tool_name: &str) -> ToolsetRegistration {
    ToolsetRegistration {
        name: "acme.chat".into(),
        id: ToolsetId::from("acme.chat"),
        description: "".into(),
        executor,
        tool_names: vec![tool_name.into()],
        task_queue: None,
        inline: false,
        payload_adapter: None,
        result_adapter: None,
        decode_in_executor: false,
        suppress_child_events: false,
    }
}

struct Recorder(Mutex<Vec<EventKind>>);
impl Subscriber for Recorder {
    fn on_event(&self, event: &RunEvent) {
        self.0.lock().unwrap().push(event.kind);
    }
}

struct LookupNTimesThenFinal {
    calls: AtomicU32,
    max_calls: u32,
}

#[async_trait]
impl Model for LookupNTimesThenFinal {
    async fn complete(&self, _request: Request) -> Result<Response, Box<dyn std::error::Error + Send + Sync>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.max_calls {
            Ok(Response {
                message: Message {
                    role: Role::Assistant,
                    parts: vec![Part::ToolUse {
                        id: ToolCallId::generate(),
                        name: "acme.chat.lookup".into(),
                        input: serde_json::json!({}),
                    }],
                },
                usage: None,
            })
        } else {
            Ok(Response {
                message: Message::text(Role::Assistant, "done"),
                usage: None,
            })
        }
    }
}

/// Invariant 1: for a completed run, `ToolCallScheduled` and
/// `ToolResultReceived` counts match.
#[tokio::test]
async fn scheduled_and_received_event_counts_match_on_completion() {
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let event_bus = EventBus::new();
    event_bus.register(recorder.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let agent = AgentRegistration {
        id: AgentId::from("acme.chat"),
        planner: Arc::new(LookupNTimesThenFinal {
            calls: AtomicU32::new(0),
            max_calls: 2,
        }),
        toolsets: vec![toolset(Arc::new(CountingLookup { calls: calls.clone() }), "acme.chat.lookup")],
        activity_names: ActivityNames {
            plan: "plan".into(),
            resume: "resume".into(),
            execute_tool: "execute_tool".into(),
        },
        policy: RunPolicy::default(),
        policy_engine: Arc::new(DefaultPolicyEngine),
    };

    let registry = ToolRegistry::new();
    let dispatcher = ToolDispatcher::new(event_bus.clone());
    let engine = InMemoryEngine::new(event_bus);
    let model: Arc<dyn agentloom::agentloom::model::Model> = agent.planner.clone();
    let mut ctx = engine.new_context(RunId::new("r-inv1"), model, CancelToken::new());

    let input = RunInput {
        agent_id: agent.id.clone(),
        run_id: RunId::new("r-inv1"),
        session_id: SessionId::new("s-inv1"),
        turn_id: None,
        messages: vec![Message::text(Role::User, "go")],
        labels: HashMap::new(),
        metadata: serde_json::Value::Null,
        policy_overrides: None,
    };

    let output = control_loop::run(&agent, ®istry, &dispatcher, None, &mut ctx, input).await;
    assert_eq!(output.status, RunStatus::Completed);

    let events = recorder.0.lock().unwrap();
    let scheduled = events.iter().filter(|k| **k == EventKind::ToolCallScheduled).count();
    let received = events.iter().filter(|k| **k == EventKind::ToolResultReceived).count();
    assert_eq!(scheduled, received);
    assert_eq!(scheduled, 2);
    assert_eq!(events.iter().filter(|k| **k == EventKind::RunStarted).count(), 1);
    assert_eq!(events.iter().filter(|k| **k == EventKind::RunCompleted).count(), 1);
    assert_eq!(events.iter().filter(|k| **k == EventKind::RunFailed).count(), 0);
}

/// Invariant 5: the number of `ToolCallScheduled` events (a proxy for
/// `Caps.tool_calls_used`) never exceeds `RunPolicy.max_tool_calls`.
#[tokio::test]
async fn tool_call_cap_is_never_exceeded() {
    let event_bus = EventBus::new();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    event_bus.register(recorder.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let agent = AgentRegistration {
        id: AgentId::from("acme.chat"),
        planner: Arc::new(LookupNTimesThenFinal {
            calls: AtomicU32::new(0),
            max_calls: 100,
        }),
        toolsets: vec![toolset(Arc::new(CountingLookup { calls: calls.clone() }), "acme.chat.lookup")],
        activity_names: ActivityNames {
            plan: "plan".into(),
            resume: "resume".into(),
            execute_tool: "execute_tool".into(),
        },
        policy: RunPolicy {
            max_tool_calls: 3,
            ..RunPolicy::default()
        },
        policy_engine: Arc::new(DefaultPolicyEngine),
    };

    let registry = ToolRegistry::new();
    let dispatcher = ToolDispatcher::new(event_bus.clone());
    let engine = InMemoryEngine::new(event_bus);
    let model = agent.planner.clone();
    let mut ctx = engine.new_context(RunId::new("r-inv2"), model, CancelToken::new());

    let input = RunInput {
        agent_id: agent.id.clone(),
        run_id: RunId::new("r-inv2"),
        session_id: SessionId::new("s-inv2"),
        turn_id: None,
        messages: vec![Message::text(Role::User, "go")],
        labels: HashMap::new(),
        metadata: serde_json::Value::Null,
        policy_overrides: None,
    };

    let output = control_loop::run(&agent, ®istry, &dispatcher, None, &mut ctx, input).await;
    assert_eq!(output.status, RunStatus::Failed);

    let events = recorder.0.lock().unwrap();
    let scheduled = events.iter().filter(|k| **k == EventKind::ToolCallScheduled).count();
    assert!(scheduled <= 3, "scheduled {} exceeded max_tool_calls", scheduled);
    assert_eq!(calls.load(Ordering::SeqCst), scheduled);
    assert_eq!(events.iter().filter(|k| **k == EventKind::RunFailed).count(), 1);
}

/// Invariant 6: a `PolicyDenied` candidate never reaches the executor.
#[tokio::test]
async fn policy_denied_candidate_never_invokes_executor() {
    let calls = Arc::new(AtomicUsize::new(0));
    let agent = AgentRegistration {
        id: AgentId::from("acme.chat"),
        planner: Arc::new(LookupNTimesThenFinal {
            calls: AtomicU32::new(0),
            max_calls: 1,
        }),
        toolsets: vec![toolset(Arc::new(CountingLookup { calls: calls.clone() }), "acme.chat.lookup")],
        activity_names: ActivityNames {
            plan: "plan".into(),
            resume: "resume".into(),
            execute_tool: "execute_tool".into(),
        },
        policy: RunPolicy::default(),
        policy_engine: Arc::new(DefaultPolicyEngine),
    };

    let registry = ToolRegistry::new();
    let dispatcher = ToolDispatcher::new(EventBus::new());
    let engine = InMemoryEngine::new(EventBus::new());
    let model = agent.planner.clone();
    let mut ctx = engine.new_context(RunId::new("r-inv3"), model, CancelToken::new());

    let input = RunInput {
        agent_id: agent.id.clone(),
        run_id: RunId::new("r-inv3"),
        session_id: SessionId::new("s-inv3"),
        turn_id: None,
        messages: vec![Message::text(Role::User, "go")],
        labels: HashMap::new(),
        metadata: serde_json::Value::Null,
        policy_overrides: Some(PolicyOverrides {
            restrict_to_tool: Some("some.other.tool".into()),
            allowed_tags: None,
            denied_tags: HashMap::new().into_iter().collect(),
        }),
    };

    let output = control_loop::run(&agent, ®istry, &dispatcher, None, &mut ctx, input).await;
    assert_eq!(output.status, RunStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "policy-denied call reached the executor");
}

/// Invariant 8: a paused-then-resumed run produces the same final output as
/// the unpaused equivalent. Both the pause and its matching resume are
/// delivered through the signal router before the run starts, so the
/// non-blocking `try_recv`/buffered `recv` inside `probe_interrupts` observe
/// them deterministically on the first interrupt check.
#[tokio::test]
async fn paused_then_resumed_run_matches_unpaused_output() {
    async fn run_once(run_id: &str, pause_then_resume: bool) -> agentloom::agentloom::control_loop::RunOutput {
        let calls = Arc::new(AtomicUsize::new(0));
        let agent = AgentRegistration {
            id: AgentId::from("acme.chat"),
            planner: Arc::new(LookupNTimesThenFinal {
                calls: AtomicU32::new(0),
                max_calls: 1,
            }),
            toolsets: vec![toolset(Arc::new(CountingLookup { calls }), "acme.chat.lookup")],
            activity_names: ActivityNames {
                plan: "plan".into(),
                resume: "resume".into(),
                execute_tool: "execute_tool".into(),
            },
            policy: RunPolicy::default(),
            policy_engine: Arc::new(DefaultPolicyEngine),
        };

        let registry = ToolRegistry::new();
        let dispatcher = ToolDispatcher::new(EventBus::new());
        let engine = InMemoryEngine::new(EventBus::new());
        let model = agent.planner.clone();
        let run_id = RunId::new(run_id);
        let mut ctx = engine.new_context(run_id.clone(), model, CancelToken::new());

        if pause_then_resume {
            engine
                .signal_router()
                .pause(PauseRequest {
                    run_id: run_id.clone(),
                    resume_deadline: None,
                })
                .unwrap();
            engine
                .signal_router()
                .resume(ResumeRequest { run_id: run_id.clone() })
                .unwrap();
        }

        let input = RunInput {
            agent_id: agent.id.clone(),
            run_id: run_id.clone(),
            session_id: SessionId::new("s-inv4"),
            turn_id: None,
            messages: vec![Message::text(Role::User, "go")],
            labels: HashMap::new(),
            metadata: serde_json::Value::Null,
            policy_overrides: None,
        };

        control_loop::run(&agent, ®istry, &dispatcher, None, &mut ctx, input).await
    }

    let baseline = run_once("r-inv4-baseline", false).await;
    let paused = run_once("r-inv4-paused", true).await;

    assert_eq!(baseline.status, RunStatus::Completed);
    assert_eq!(paused.status, RunStatus::Completed);
    assert_eq!(
        baseline.message.unwrap().parts.len(),
        paused.message.unwrap().parts.len()
    );
}
