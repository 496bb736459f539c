//! Workflow Engine (C6) — interface and in-memory deterministic simulator.
//!
//! No single teacher file implements a durable workflow engine (CloudLLM talks
//! to providers directly); this module is grounded in the teacher's general
//! async/`#[async_trait]` idiom (`orchestration.rs`, `agent.rs`) applied to
//! the contract §4.6 specifies. `InMemoryEngine` is the concrete collaborator
//! shipped for tests and for embedders who don't need a production durable
//! substrate (a Temporal-backed engine is the production alternative, out of
//! scope here).
//!
//! All non-determinism — time, random IDs, tool I/O — goes through
//! [`WorkflowContext`]; [`crate::control_loop`] never calls `Utc::now()` or
//! spawns a bare task directly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RuntimeError;
use crate::events::{EventBus, RunEvent};
use crate::ids::RunId;
use crate::model::{Model, Request, Response};
use crate::signals::{signal_channels, SignalChannels, SignalRouter, SignalSenders};

/// Default byte budget for a planner activity's JSON-encoded input (§4.6).
pub const DEFAULT_PLAN_INPUT_BUDGET_BYTES: usize = 1_000_000;

/// One planner activity invocation (`ExecutePlannerActivity`).
pub struct PlannerActivityCall {
    pub request: Request,
}

/// One tool activity invocation (`ExecuteToolActivityAsync`).
pub struct ToolActivityCall {
    pub toolset: Arc<crate::dispatch::ToolsetRegistration>,
    pub request: crate::dispatch::ToolRequest,
}

/// Options governing one tool activity's retry behavior (§4.6 "Activity contract").
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    pub max_attempts: u32,
    pub timeout: chrono::Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        ActivityOptions {
            max_attempts: 1,
            timeout: chrono::Duration::seconds(30),
        }
    }
}

/// A handle to a nested child workflow (C9's underlying primitive at the
/// engine layer; C9 itself runs children inline rather than through this
/// handle, but the engine still exposes it for non-inline composition).
#[async_trait]
pub trait ChildHandle: Send + Sync {
    async fn get(&mut self) -> Result<serde_json::Value, RuntimeError>;
}

/// Request to start a child workflow.
pub struct ChildWorkflowRequest {
    pub workflow_type: String,
    pub input: serde_json::Value,
}

/// Cooperative cancellation handle produced by `WithCancel`.
#[derive(Clone)]
pub struct CancelToken {
    token: tokio_util_cancel::CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            token: tokio_util_cancel::CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

/// A minimal, dependency-free stand-in for `tokio_util::sync::CancellationToken`,
/// since the crate graph does not otherwise need `tokio-util`.
mod tokio_util_cancel {
    use std::sync::Arc;
    use tokio::sync::Notify;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    pub struct CancellationToken {
        cancelled: Arc<AtomicBool>,
        notify: Arc<Notify>,
    }

    impl CancellationToken {
        pub fn new() -> Self {
            CancellationToken {
                cancelled: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            }
        }

        pub fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        pub fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }

        pub async fn cancelled(&self) {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// The durable execution context a workflow body runs inside (§4.6).
///
/// Deterministic replay requires every suspension point (timers, activities,
/// signal receives, child waits) to flow through this trait rather than bare
/// `tokio`/`std::time` calls.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Monotonic within replay; never `std::time::SystemTime::now()` directly.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend until `d` elapses (workflow-time, not wall-clock, under replay).
    async fn new_timer(&self, d: chrono::Duration);

    /// Invoke the planner activity; always suspends.
    async fn execute_planner_activity(&self, call: PlannerActivityCall) -> Result<Response, RuntimeError>;

    /// Invoke one tool activity; suspends on `.await`. Callers needing
    /// parallelism run several of these concurrently via `futures_util::future::join_all`.
    async fn execute_tool_activity(
        &self,
        call: ToolActivityCall,
        options: ActivityOptions,
    ) -> Result<crate::dispatch::ToolResult, RuntimeError>;

    /// Side-effectful hook activity publishing one event to the hook bus.
    fn publish_hook(&self, event: RunEvent);

    /// The five signal receivers this workflow exposes (§4.11).
    fn signals(&mut self) -> &mut SignalChannels;

    /// A context usable after cancellation, for graceful cleanup (final hook
    /// emission, run-store update) outside the cancellation scope.
    fn detached(&self) -> Arc<dyn WorkflowContext>;

    /// Produce a cooperative cancellation token for this workflow instance.
    fn cancel_token(&self) -> CancelToken;

    /// Derive a context for a nested workflow instance (C9, §4.9 "enters a
    /// nested instance of C8 using the same WorkflowContext"): shares this
    /// context's signal router and cancellation scope — cancelling the
    /// parent run cancels every nested run it started — but gets its own
    /// `run_id`/signal channels, since it is a logically distinct workflow
    /// instance, and publishes hooks on the `event_bus` the caller supplies
    /// (typically a private bus a composer forwards onto the parent's own,
    /// tagged with sequencing metadata) rather than the parent's bus
    /// directly.
    fn nested(&self, run_id: RunId, planner: Arc<dyn Model>, event_bus: EventBus) -> Box<dyn WorkflowContext>;
}

/// The in-memory deterministic simulator: drives a workflow body on a
/// single-threaded `tokio::task::LocalSet`, so the interleaving of concurrent
/// tool activity futures is deterministic for a fixed input sequence (§5
/// "single-threaded cooperative" requirement) without requiring a production
/// durable-execution backend.
pub struct InMemoryEngine {
    event_bus: EventBus,
    signal_router: SignalRouter,
}

impl InMemoryEngine {
    pub fn new(event_bus: EventBus) -> Self {
        InMemoryEngine {
            event_bus,
            signal_router: SignalRouter::new(),
        }
    }

    pub fn signal_router(&self) -> &SignalRouter {
        &self.signal_router
    }

    /// Start a new workflow instance context for `run_id`, registering its
    /// signal senders with the router so `RunHandle::signal` (§6.1) can reach
    /// it.
    pub fn new_context(&self, run_id: RunId, planner: Arc<dyn Model>, cancel_token: CancelToken) -> InMemoryContext {
        let (senders, channels) = signal_channels();
        self.signal_router.register(run_id.clone(), Arc::new(senders));
        InMemoryContext {
            run_id,
            planner,
            event_bus: self.event_bus.clone(),
            signal_router: self.signal_router.clone(),
            channels,
            cancel_token,
        }
    }
}

/// Concrete [`WorkflowContext`] backing [`InMemoryEngine`].
pub struct InMemoryContext {
    run_id: RunId,
    planner: Arc<dyn Model>,
    event_bus: EventBus,
    signal_router: SignalRouter,
    channels: SignalChannels,
    cancel_token: CancelToken,
}

#[async_trait]
impl WorkflowContext for InMemoryContext {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn new_timer(&self, d: chrono::Duration) {
        let millis = d.num_milliseconds().max(0) as u64;
        tokio::time::sleep(tokio::time::Duration::from_millis(millis)).await;
    }

    async fn execute_planner_activity(&self, call: PlannerActivityCall) -> Result<Response, RuntimeError> {
        let encoded = serde_json::to_vec(&serde_json::json!({ "messages_len": call.request.messages.len() }))
            .map_err(|e| RuntimeError::infra("failed to size planner input", e))?;
        if encoded.len() > DEFAULT_PLAN_INPUT_BUDGET_BYTES {
            return Err(RuntimeError::PlanInputTooLarge {
                limit: DEFAULT_PLAN_INPUT_BUDGET_BYTES,
                actual: encoded.len(),
            });
        }
        self.planner
            .complete(call.request)
            .await
            .map_err(|e| RuntimeError::infra("planner activity failed", e))
    }

    async fn execute_tool_activity(
        &self,
        call: ToolActivityCall,
        _options: ActivityOptions,
    ) -> Result<crate::dispatch::ToolResult, RuntimeError> {
        // Activities are at-most-once from the workflow's viewpoint; this
        // simulator does not itself retry (a production engine would, per
        // `ActivityOptions::max_attempts`) but the contract is idempotency,
        // which is the executor's responsibility.
        Ok(call.toolset.executor.execute(call.request).await)
    }

    fn publish_hook(&self, event: RunEvent) {
        self.event_bus.publish(&event);
    }

    fn signals(&mut self) -> &mut SignalChannels {
        &mut self.channels
    }

    fn detached(&self) -> Arc<dyn WorkflowContext> {
        let (senders, channels) = signal_channels();
        // A detached context is not registered with the router under the
        // same run id twice; cleanup code only ever calls signal-free
        // operations (timers, hooks), so an unregistered, unreachable
        // channel set is sufficient here.
        drop(senders);
        Arc::new(InMemoryContext {
            run_id: self.run_id.clone(),
            planner: self.planner.clone(),
            event_bus: self.event_bus.clone(),
            signal_router: self.signal_router.clone(),
            channels,
            cancel_token: CancelToken {
                token: tokio_util_cancel::CancellationToken::new(),
            },
        })
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    fn nested(&self, run_id: RunId, planner: Arc<dyn Model>, event_bus: EventBus) -> Box<dyn WorkflowContext> {
        let (senders, channels) = signal_channels();
        self.signal_router.register(run_id.clone(), Arc::new(senders));
        Box::new(InMemoryContext {
            run_id,
            planner,
            event_bus,
            signal_router: self.signal_router.clone(),
            channels,
            cancel_token: self.cancel_token.clone(),
        })
    }
}

impl Drop for InMemoryContext {
    fn drop(&mut self) {
        self.signal_router.unregister(&self.run_id);
    }
}
