//! Agent-as-Tool Composer (C9): inline nested agent execution under the
//! same workflow.
//!
//! Generalizes the teacher's multi-agent round concept (`orchestration.rs`'s
//! `Orchestration::add_agent`/mode dispatch, `council.rs`'s `Council::discuss`)
//! from a sequence of independent, top-level agent turns into a single
//! *inline* nested run: when a parent planner calls a tool whose toolset
//! `Inline:true`, the composer drives a fresh instance of [`crate::control_loop::run`]
//! to completion and folds its result back into one `ToolResult` for the
//! parent (§4.9).
//!
//! Nested caps come from the nested agent's own `RunPolicy` — they never
//! inherit from the parent (§4.9) — and a [`ChildTracker`] assigns
//! monotonically increasing `sequence_index` values to every event the nested
//! loop produces, so a consumer can reconstruct parent/child interleaving
//! from the hook bus alone (§4.3, §5 "Ordering guarantees").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::control_loop::{self, RunInput};
use crate::dispatch::{ToolDispatcher, ToolRequest, ToolResult, ToolsetExecutor};
use crate::events::{EventBus, EventKind, RunEvent, Subscriber};
use crate::ids::{RunId, SessionId, TurnId};
use crate::message::{Message, Role};
use crate::registration::AgentRegistration;
use crate::registry::ToolRegistry;
use crate::stores::RunStatus;
use crate::workflow::WorkflowContext;

/// A single monotonic counter shared by one parent tool call and every event
/// its nested agent run produces (GLOSSARY "Aggregator" companion; §4.9,
/// §9 "Child tracker sequencing"). It does not attempt to express wall-clock
/// concurrency — only a total order a consumer can sort by.
#[derive(Clone, Default)]
pub struct ChildTracker {
    counter: Arc<AtomicU64>,
}

impl ChildTracker {
    pub fn new() -> Self {
        ChildTracker::default()
    }

    /// The next sequence index in this tracker's total order.
    pub fn next_index(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// Forwards events from a nested agent's private event bus to the parent's,
/// tagging each with a [`ChildTracker`]-assigned `sequence_index` and the
/// parent `ToolCallId` (§4.9). When `suppress` is set the event is recorded
/// for aggregation but never forwarded to the parent bus — per the §9 open
/// question, suppression applies only to child events; the parent always
/// receives one aggregated `ToolResultReceived` regardless.
struct ChildForwarder {
    parent_bus: EventBus,
    tracker: ChildTracker,
    parent_tool_call_id: crate::ids::ToolCallId,
    suppress: bool,
    collected: Arc<Mutex<Vec<RunEvent>>>,
}

impl Subscriber for ChildForwarder {
    fn on_event(&self, event: &RunEvent) {
        let tagged = event
            .clone()
            .with_sequence_index(self.tracker.next_index())
            .with_parent_tool_call(self.parent_tool_call_id.clone());
        self.collected.lock().expect("child event log lock poisoned").push(tagged.clone());
        if !self.suppress {
            self.parent_bus.publish(&tagged);
        }
    }
}

/// Combines a parent tool call with its nested agent's result(s) into the
/// `ToolResult` surfaced to the parent planner (§4.9, GLOSSARY "Aggregator").
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, parent_request: &ToolRequest, children: &[ToolResult], evidence: &[RunEvent]) -> ToolResult;
}

/// Default aggregator: returns the first non-null child result, matching
/// `cloudllm`'s pattern of a single synchronous nested call having exactly
/// one outcome to propagate.
pub struct PassThrough;

impl Aggregator for PassThrough {
    fn aggregate(&self, _parent_request: &ToolRequest, children: &[ToolResult], _evidence: &[RunEvent]) -> ToolResult {
        children
            .iter()
            .find(|r| !r.output.is_null())
            .cloned()
            .unwrap_or_else(|| ToolResult::failure("agent-as-tool call produced no result"))
    }
}

/// Emits `{code, result, calls, evidence?, summary?}`, exposing the nested
/// run's tool-call trail alongside its final answer (§4.9).
pub struct ProvenancedEnvelope;

impl Aggregator for ProvenancedEnvelope {
    fn aggregate(&self, _parent_request: &ToolRequest, children: &[ToolResult], evidence: &[RunEvent]) -> ToolResult {
        let child = children.first().cloned().unwrap_or_else(|| ToolResult::failure("no child result"));
        let calls: Vec<serde_json::Value> = evidence
            .iter()
            .filter(|e| matches!(e.kind, EventKind::ToolCallScheduled | EventKind::ToolResultReceived))
            .map(|e| {
                serde_json::json!({
                    "kind": format!("{:?}", e.kind),
                    "sequence_index": e.sequence_index,
                    "data": e.data,
                })
            })
            .collect();

        let envelope = serde_json::json!({
            "code": if child.is_error() { "error" } else { "ok" },
            "result": child.output,
            "calls": calls,
        });
        if child.is_error() {
            ToolResult {
                output: envelope,
                error: child.error,
                kind: child.kind,
            }
        } else {
            ToolResult::success(envelope)
        }
    }
}

/// A [`ToolsetExecutor`] that routes its calls to another registered agent,
/// running it inline (same workflow, not a new durable run) to completion
/// and folding the result back through an [`Aggregator`] (§4.9).
///
/// Toolsets wrapping this executor MUST set [`crate::dispatch::ToolsetRegistration::inline`]
/// to `true`: the nested run schedules its own planner/tool activities, which
/// requires a live workflow context — scheduling this executor itself as an
/// activity would break determinism (§9 "Inline toolsets").
pub struct AgentAsToolExecutor {
    nested_agent: Arc<AgentRegistration>,
    tool_registry: ToolRegistry,
    dispatcher: Arc<ToolDispatcher>,
    parent_bus: EventBus,
    aggregator: Arc<dyn Aggregator>,
    suppress_child_events: bool,
}

impl AgentAsToolExecutor {
    pub fn new(
        nested_agent: Arc<AgentRegistration>,
        tool_registry: ToolRegistry,
        dispatcher: Arc<ToolDispatcher>,
        parent_bus: EventBus,
        aggregator: Arc<dyn Aggregator>,
        suppress_child_events: bool,
    ) -> Self {
        AgentAsToolExecutor {
            nested_agent,
            tool_registry,
            dispatcher,
            parent_bus,
            aggregator,
            suppress_child_events,
        }
    }
}

#[async_trait]
impl ToolsetExecutor for AgentAsToolExecutor {
    async fn execute(&self, request: ToolRequest, ctx: &dyn WorkflowContext) -> ToolResult {
        // The child run context: `ParentToolCallID` correlates nested events
        // back to the parent call (§4.9). The call id is workflow-generated
        // and unique per execution, so deriving the child run id from it
        // keeps the child identifiable without a separate id allocator.
        let child_run_id = RunId::new(format!("{}::child", request.call_id));
        let child_turn_id = TurnId::new(request.call_id.as_str());

        let tracker = ChildTracker::new();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let child_bus = EventBus::new();
        let _forwarder_sub = child_bus.register(Arc::new(ChildForwarder {
            parent_bus: self.parent_bus.clone(),
            tracker,
            parent_tool_call_id: request.call_id.clone(),
            suppress: self.suppress_child_events,
            collected: collected.clone(),
        }));

        // Nested caps come from the nested agent's own `RunPolicy`; they do
        // not inherit from the parent (§4.9). The nested context itself,
        // however, shares the parent's cancellation scope and signal router
        // (`ctx.nested`, §4.9 "same WorkflowContext") instead of standing up
        // a disconnected `InMemoryEngine`, so cancelling the parent run also
        // cancels every in-flight nested agent-as-tool call.
        let mut nested_ctx = ctx.nested(child_run_id.clone(), self.nested_agent.planner.clone(), child_bus);

        let nested_input = RunInput {
            agent_id: self.nested_agent.id.clone(),
            run_id: child_run_id,
            session_id: SessionId::new(request.call_id.as_str()),
            turn_id: Some(child_turn_id),
            messages: vec![Message::text(Role::User, request.payload.to_string())],
            labels: Default::default(),
            metadata: serde_json::Value::Null,
            policy_overrides: None,
        };

        let output = control_loop::run(
            &self.nested_agent,
            &self.tool_registry,
            &self.dispatcher,
            None,
            &mut *nested_ctx,
            nested_input,
        )
        .await;

        let child_result = match output.status {
            RunStatus::Completed => {
                let text = output
                    .message
                    .as_ref()
                    .map(message_text)
                    .unwrap_or_default();
                ToolResult::success(serde_json::Value::String(text))
            }
            _ => ToolResult::failure(output.failure.unwrap_or_else(|| "nested agent run failed".to_string())),
        };

        let evidence = collected.lock().expect("child event log lock poisoned").clone();
        self.aggregator.aggregate(&request, &[child_result], &evidence)
    }
}

fn message_text(message: &Message) -> String {
    message
        .parts
        .iter()
        .filter_map(|p| match p {
            crate::message::Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}
