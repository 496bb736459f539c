//! Tool Dispatcher (C7): payload adaptation, codec decode, executor
//! invocation, retry hint formation.
//!
//! A single `execute(name, parameters)` entry point widens into a six-stage
//! pipeline (§4.7): identify, adapt payload, schedule (inline vs. activity),
//! execute, adapt result, form a retry hint on error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::events::{Event, EventBus, EventKind, RunEvent};
use crate::ids::{AgentId, RunId, ToolCallId, ToolsetId, TurnId};
use crate::workflow::WorkflowContext;

/// A single tool invocation request (§4.7 step 1).
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub call_id: ToolCallId,
    pub tool_name: String,
    pub payload: serde_json::Value,
    /// Set when this call was dispatched from inside a nested agent-as-tool
    /// run (C9), so the emitted event can be tagged with its parent call id.
    pub parent_call_id: Option<ToolCallId>,
}

/// The structured error kinds a `ToolsetExecutor` can attach to a failed
/// [`ToolResult`] (§7's taxonomy, narrowed to the rows that originate at
/// tool execution rather than at the control loop). Defaults to `Other`
/// when an executor reports only a free-form message, which still forms a
/// retry hint — just a less specific one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The payload failed provider/schema validation (§7 `InvalidArguments`).
    InvalidArguments,
    /// The tool name is not registered in any toolset (§7 `ToolUnavailable`).
    ToolUnavailable,
    /// The provider/remote signaled a transient failure, safe to retry
    /// (§7 `RetryableProvider`).
    Retryable,
    /// Any other executor-reported failure.
    Other,
}

impl ToolErrorKind {
    /// The stable `RetryHint.reason` this kind maps onto (§4.7 step 6, §7).
    fn retry_reason(self) -> &'static str {
        match self {
            ToolErrorKind::InvalidArguments => "InvalidArguments",
            ToolErrorKind::ToolUnavailable => "ToolUnavailable",
            ToolErrorKind::Retryable => "RetryableProvider",
            ToolErrorKind::Other => "tool_execution_failed",
        }
    }
}

/// Outcome of one tool execution (§4.7 step 4, §4.4 persistence shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: serde_json::Value,
    pub error: Option<String>,
    #[serde(default)]
    pub kind: Option<ToolErrorKind>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        ToolResult {
            output,
            error: None,
            kind: None,
        }
    }

    /// A failure with no structured kind (maps to `ToolErrorKind::Other` at
    /// retry-hint formation time).
    pub fn failure(message: impl Into<String>) -> Self {
        ToolResult {
            output: serde_json::Value::Null,
            error: Some(message.into()),
            kind: None,
        }
    }

    /// A failure tagged with the structured error kind that caused it, so
    /// the dispatcher can form a `RetryHint` whose `reason` matches §7's
    /// taxonomy instead of a generic default.
    pub fn failure_with_kind(message: impl Into<String>, kind: ToolErrorKind) -> Self {
        ToolResult {
            output: serde_json::Value::Null,
            error: Some(message.into()),
            kind: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A structured hint attached to a `ToolResult::error` suggesting planner
/// repair (§4.7 step 6, GLOSSARY "RetryHint"). The format is deliberately
/// deterministic — identical inputs produce an identical prompt — so planner
/// prompts stay cache-friendly and replayable (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryHint {
    pub reason: String,
    pub tool: String,
    pub message: String,
    pub restrict_to_tool: bool,
}

impl RetryHint {
    /// Render the deterministic repair-prompt template (§4.7).
    pub fn to_prompt(&self, schema: Option<&serde_json::Value>, example: Option<&serde_json::Value>) -> String {
        let mut prompt = format!("Operation: {}\n", self.tool);
        if let Some(schema) = schema {
            prompt.push_str(&format!("Schema: {}\n", schema));
        }
        prompt.push_str(&format!("Error: {}\n", self.message));
        prompt.push_str("Redo the operation now with valid parameters.\n");
        prompt.push_str("Use only valid schema fields and ensure required fields and types/enums are valid.\n");
        if let Some(example) = example {
            prompt.push_str(&format!("Example params: {}\n", example));
        }
        prompt
    }
}

/// The executor a [`ToolsetRegistration`] dispatches to. `ctx` is the live
/// [`WorkflowContext`] driving the run this call belongs to (shared, not
/// owned) — most executors ignore it, but an inline agent-as-tool executor
/// (C9) needs it to start its nested run under the same cancellation scope
/// and signal router rather than a disconnected one (§4.9).
#[async_trait]
pub trait ToolsetExecutor: Send + Sync {
    async fn execute(&self, request: ToolRequest, ctx: &dyn WorkflowContext) -> ToolResult;
}

/// An optional payload/result transform applied before/after the executor
/// runs (§3 `ToolsetRegistration`).
pub trait PayloadAdapter: Send + Sync {
    fn adapt(&self, payload: serde_json::Value) -> Result<serde_json::Value, RuntimeError>;
}

pub trait ResultAdapter: Send + Sync {
    fn adapt(&self, result: ToolResult) -> ToolResult;
}

/// A named group of tools sharing an executor and codecs (§3
/// `ToolsetRegistration`, GLOSSARY "Toolset").
pub struct ToolsetRegistration {
    pub name: String,
    pub id: ToolsetId,
    pub description: String,
    pub executor: Arc<dyn ToolsetExecutor>,
    pub tool_names: Vec<String>,
    pub task_queue: Option<String>,
    /// Required `true` for agent-as-tool toolsets (C9): their executor needs
    /// the workflow context to schedule further activities, so scheduling
    /// them as their own activity would break determinism (§9).
    pub inline: bool,
    pub payload_adapter: Option<Arc<dyn PayloadAdapter>>,
    pub result_adapter: Option<Arc<dyn ResultAdapter>>,
    /// `true` when payloads arrive as raw, already-validated JSON (e.g. from
    /// an MCP transport) and re-decoding in the activity would duplicate
    /// schema work and lose structured errors from the remote (§9).
    pub decode_in_executor: bool,
    pub suppress_child_events: bool,
}

/// Dispatches one tool call through the six-stage pipeline (§4.7). Failure
/// policy: the dispatcher never panics out of the loop — tool failures
/// become `ToolResult::error` values so the planner can decide next steps.
pub struct ToolDispatcher {
    event_bus: EventBus,
}

impl ToolDispatcher {
    pub fn new(event_bus: EventBus) -> Self {
        ToolDispatcher { event_bus }
    }

    /// Execute one tool call against its owning toolset, adapting payload and
    /// result, and forming a [`RetryHint`] on error.
    pub async fn dispatch(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
        turn_id: &TurnId,
        toolset: &ToolsetRegistration,
        mut request: ToolRequest,
        ctx: &dyn WorkflowContext,
    ) -> ToolResult {
        let started_at = Utc::now();

        // Stage: adapt payload.
        if let Some(adapter) = &toolset.payload_adapter {
            match adapter.adapt(request.payload.clone()) {
                Ok(adapted) => request.payload = adapted,
                Err(e) => {
                    let result = ToolResult::failure(format!("payload adaptation failed: {}", e));
                    self.emit_result_event(agent_id, run_id, turn_id, &request, &result, started_at);
                    return result;
                }
            }
        }

        // Stage: execute (inline vs. activity-scheduled is a workflow-layer
        // concern — see crate::workflow — the dispatcher's job ends at
        // invoking the executor the workflow handed it).
        let mut result = toolset.executor.execute(request.clone(), ctx).await;

        // Stage: adapt result.
        if let Some(adapter) = &toolset.result_adapter {
            result = adapter.adapt(result);
        }

        // Stage: form retry hint on error.
        result = attach_retry_hint(&request.tool_name, result);

        self.emit_result_event(agent_id, run_id, turn_id, &request, &result, started_at);
        result
    }

    fn emit_result_event(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
        turn_id: &TurnId,
        request: &ToolRequest,
        result: &ToolResult,
        started_at: chrono::DateTime<Utc>,
    ) {
        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        let data = serde_json::json!({
            "tool_use_id": request.call_id.as_str(),
            "tool": request.tool_name,
            "content": result.output,
            "is_error": result.is_error(),
            "duration_ms": duration_ms,
            "parent_tool_call_id": request.parent_call_id.as_ref().map(|p| p.as_str()),
        });
        let mut event = RunEvent::new(agent_id.clone(), run_id.clone(), EventKind::ToolResultReceived, data)
            .with_turn(turn_id.clone());
        if let Some(parent) = &request.parent_call_id {
            event = event.with_parent_tool_call(parent.clone());
        }
        self.event_bus.publish(&event);
    }
}

/// Form a [`RetryHint`] from the structured error kind a failed `ToolResult`
/// carries (§4.7 step 6, §7) and attach it to `result.output`. A no-op on
/// success. Exposed so callers that short-circuit before ever reaching
/// [`ToolDispatcher::dispatch`] — e.g. the control loop's "tool name isn't
/// registered in any toolset" path, which has no executor to dispatch
/// against — still form the mandated hint instead of a bare error string.
pub fn attach_retry_hint(tool_name: &str, mut result: ToolResult) -> ToolResult {
    if !result.is_error() {
        return result;
    }
    let hint = RetryHint {
        reason: result.kind.unwrap_or(ToolErrorKind::Other).retry_reason().to_string(),
        tool: tool_name.to_string(),
        message: result.error.clone().unwrap_or_default(),
        restrict_to_tool: true,
    };
    result.output = serde_json::json!({ "retry_hint": hint });
    result
}

/// Convert a `ToolResult` into a durable `Event` for the log (§4.4, §6.5).
pub fn tool_result_event(request: &ToolRequest, result: &ToolResult) -> Event {
    Event {
        kind: EventKind::ToolResult,
        timestamp: Utc::now(),
        data: serde_json::json!({
            "tool_use_id": request.call_id.as_str(),
            "content": result.output,
            "is_error": result.is_error(),
        }),
        labels: Default::default(),
    }
}
