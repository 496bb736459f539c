//! Plan/Execute/Resume Loop (C8) — the heart of the runtime.
//!
//! Drives one agent run to completion: `planStart` → while tool calls remain
//! and the result isn't terminal, filter through the policy engine (C5),
//! dispatch the allowed calls concurrently through C7, probe interrupts (C11),
//! and `planResume`. Grounded in the teacher's `planner::BasicPlanner` turn
//! loop (`src/cloudllm/planner.rs`), generalized from a single in-process
//! `step()` call into the suspend-at-every-activity shape §4.8/§5 require —
//! every non-deterministic operation goes through [`crate::workflow::WorkflowContext`],
//! never called directly.

use std::collections::HashMap;

use chrono::Utc;
use futures_util::future::join_all;

use crate::dispatch::{ToolDispatcher, ToolRequest};
use crate::caps::Caps;
use crate::error::RuntimeError;
use crate::events::{EventKind, RunEvent};
use crate::ids::{AgentId, RunId, SessionId, ToolCallId, ToolId, TurnId};
use crate::ledger::Ledger;
use crate::message::{Message, Part, Role};
use crate::model::Request;
use crate::policy::{PolicyInput, PolicyOverrides, ToolCallCandidate};
use crate::registration::{AgentRegistration, OnMissingFields};
use crate::registry::ToolRegistry;
use crate::stores::{RunRecord, RunStatus, RunStore};
use crate::workflow::{PlannerActivityCall, WorkflowContext};

/// One run request (§3 `RunInput`).
#[derive(Debug, Clone)]
pub struct RunInput {
    pub agent_id: AgentId,
    pub run_id: RunId,
    pub session_id: SessionId,
    pub turn_id: Option<TurnId>,
    pub messages: Vec<Message>,
    pub labels: HashMap<String, String>,
    pub metadata: serde_json::Value,
    pub policy_overrides: Option<PolicyOverrides>,
}

impl RunInput {
    /// Validate the one required-at-submission invariant (§3): `SessionID` non-empty.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.session_id.is_empty() {
            return Err(RuntimeError::MissingSessionID);
        }
        Ok(())
    }
}

/// The outcome of one run (§6.1 `Run`/`RunHandle.Wait`).
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: RunId,
    pub status: RunStatus,
    pub message: Option<Message>,
    pub failure: Option<String>,
}

/// The decision maker's structured reply for one turn (GLOSSARY "PlanResult").
///
/// [`Model`](crate::model::Model) and [`WorkflowContext::execute_planner_activity`]
/// speak in terms of [`crate::model::Response`]; `PlanResult` is the
/// loop-level interpretation of one, derived by scanning its parts.
#[derive(Debug, Clone)]
pub struct PlanResult {
    pub tool_calls: Vec<ToolCallCandidate>,
    pub notes: Vec<String>,
    pub final_response: Option<Message>,
    /// Populated when the planner signaled a validation failure instead of a
    /// normal reply. The wire convention: a lone `Part::Text` whose content
    /// parses as `{"missing_fields": [...]}`. No provider SDK is in scope, so
    /// this convention — not a provider's native error channel — is what a
    /// `Model` implementation must translate into.
    pub missing_fields: Option<Vec<String>>,
}

impl PlanResult {
    fn from_message(message: Message) -> Self {
        let tool_calls: Vec<ToolCallCandidate> = message
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolUse { id, name, input } => Some(ToolCallCandidate {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    tags: Vec::new(),
                    payload: input.clone(),
                }),
                _ => None,
            })
            .collect();

        let missing_fields = message.parts.iter().find_map(|p| match p {
            Part::Text { text } => serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("missing_fields").cloned())
                .and_then(|v| v.as_array().cloned())
                .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect()),
            _ => None,
        });

        let final_response = if tool_calls.is_empty() && missing_fields.is_none() {
            Some(message)
        } else {
            None
        };

        PlanResult {
            tool_calls,
            notes: Vec::new(),
            final_response,
            missing_fields,
        }
    }

    /// Terminal predicate (§4.8): a final response, or no tool calls at all.
    fn is_terminal(&self) -> bool {
        self.final_response.is_some() || (self.tool_calls.is_empty() && self.missing_fields.is_none())
    }
}

/// Resolve the [`ToolCallCandidate::tags`] for a batch from the registry, and
/// find the [`crate::registration::ActivityNames`]-adjacent toolset owning
/// each requested tool name.
fn enrich_tags(registry: &ToolRegistry, candidates: &mut [ToolCallCandidate]) {
    for candidate in candidates.iter_mut() {
        if let Some(spec) = registry.lookup(&ToolId::from(candidate.tool_name.as_str())) {
            candidate.tags = spec.tags.clone();
        }
    }
}

/// Run one agent execution end to end (C8 entry point). `ctx` is exclusively
/// owned by this run for its lifetime, per the single-threaded-cooperative
/// scheduling model (§5).
pub async fn run(
    agent: &AgentRegistration,
    tool_registry: &ToolRegistry,
    dispatcher: &ToolDispatcher,
    run_store: Option<&dyn RunStore>,
    ctx: &mut dyn WorkflowContext,
    input: RunInput,
) -> RunOutput {
    if let Err(e) = input.validate() {
        return finalize_failed(&agent.id, ctx, run_store, &input, e).await;
    }

    let turn_id = input.turn_id.clone().unwrap_or_else(|| TurnId::new(input.run_id.as_str()));
    let mut ledger = Ledger::new();
    for message in &input.messages {
        ledger.append_message(message.clone());
    }

    upsert_status(run_store, &input, RunStatus::Running).await;
    ctx.publish_hook(RunEvent::new(
        agent.id.clone(),
        input.run_id.clone(),
        EventKind::RunStarted,
        serde_json::json!({ "session_id": input.session_id.as_str() }),
    ));

    let mut caps = Caps::start(agent.policy.time_budget);

    let messages = match ledger.build_messages() {
        Ok(m) => m,
        Err(e) => return finalize_failed(&agent.id, ctx, run_store, &input, e).await,
    };
    let mut plan = match plan_start(ctx, agent, messages).await {
        Ok(p) => p,
        Err(e) => return finalize_failed(&agent.id, ctx, run_store, &input, e).await,
    };

    loop {
        if plan.is_terminal() {
            break;
        }
        if caps.deadline_reached() {
            return finalize_failed(&agent.id, ctx, run_store, &input, RuntimeError::TimeBudgetExceeded).await;
        }
        if agent.policy.max_tool_calls != 0 && caps.tool_calls_used >= agent.policy.max_tool_calls {
            return finalize_failed(
                &agent.id,
                ctx,
                run_store,
                &input,
                RuntimeError::CapExhausted("max_tool_calls"),
            )
            .await;
        }

        if let Some(missing) = plan.missing_fields.take() {
            match handle_missing_fields(agent, ctx, &mut ledger, &input.run_id, &turn_id, missing).await {
                MissingFieldsOutcome::Finalized(message) => {
                    return finalize_completed(&agent.id, ctx, run_store, &input, message).await;
                }
                MissingFieldsOutcome::Resumed(messages) => {
                    plan = match plan_resume(ctx, agent, messages).await {
                        Ok(p) => p,
                        Err(e) => return finalize_failed(&agent.id, ctx, run_store, &input, e).await,
                    };
                    continue;
                }
                MissingFieldsOutcome::Errored(e) => {
                    return finalize_failed(&agent.id, ctx, run_store, &input, e).await;
                }
            }
        }

        let mut candidates = plan.tool_calls.clone();
        enrich_tags(tool_registry, &mut candidates);

        let decision = match agent
            .policy_engine
            .decide(PolicyInput {
                agent_id: &agent.id,
                run_id: &input.run_id,
                turn_id: &turn_id,
                available_tools: &agent
                    .toolsets
                    .iter()
                    .flat_map(|t| t.tool_names.iter().cloned())
                    .collect::<Vec<_>>(),
                caps: &caps,
                policy: &agent.policy,
                overrides: input.policy_overrides.as_ref(),
                candidates: &candidates,
            })
            .await
        {
            Ok(d) => d,
            Err(e) => return finalize_failed(&agent.id, ctx, run_store, &input, e).await,
        };

        let mut results: Vec<(ToolCallId, Part)> =
            dispatch_allowed(agent, dispatcher, &input.run_id, &turn_id, &decision.allowed, ctx).await;
        for denial in &decision.denied {
            results.push((
                denial.call_id.clone(),
                Part::ToolResult {
                    tool_use_id: denial.call_id.clone(),
                    content: serde_json::json!({ "error": "PolicyDenied", "reason": denial.reason }),
                    is_error: true,
                },
            ));
        }
        // Preserve the planner's original request order (§4.8: "merge ... by
        // original request order"), not completion order.
        results.sort_by_key(|(id, _)| {
            plan.tool_calls
                .iter()
                .position(|c| &c.call_id == id)
                .unwrap_or(usize::MAX)
        });

        for (_, part) in &results {
            if let Part::ToolResult { is_error, .. } = part {
                caps.record_call(*is_error);
            }
        }

        for call in &plan.tool_calls {
            ledger.declare_tool_use(call.call_id.clone(), call.tool_name.clone(), call.payload.clone());
        }
        ledger.append_user_tool_results(results.into_iter().map(|(_, part)| part).collect());

        if probe_interrupts(ctx, &agent.policy, &input.run_id, run_store, &input).await.is_err() {
            return finalize_failed(
                &agent.id,
                ctx,
                run_store,
                &input,
                RuntimeError::InterruptExpired { run_id: input.run_id.to_string() },
            )
            .await;
        }

        let messages = match ledger.build_messages() {
            Ok(m) => m,
            Err(e) => return finalize_failed(&agent.id, ctx, run_store, &input, e).await,
        };
        plan = match plan_resume(ctx, agent, messages).await {
            Ok(p) => p,
            Err(e) => return finalize_failed(&agent.id, ctx, run_store, &input, e).await,
        };
    }

    let message = plan.final_response.unwrap_or_else(|| Message::text(Role::Assistant, ""));
    finalize_completed(&agent.id, ctx, run_store, &input, message).await
}

async fn plan_start(
    ctx: &mut dyn WorkflowContext,
    agent: &AgentRegistration,
    messages: Vec<Message>,
) -> Result<PlanResult, RuntimeError> {
    let request = Request {
        messages,
        tools: Vec::new(),
        thinking_enabled: false,
    };
    let response = ctx.execute_planner_activity(PlannerActivityCall { request }).await?;
    Ok(PlanResult::from_message(response.message))
}

async fn plan_resume(
    ctx: &mut dyn WorkflowContext,
    agent: &AgentRegistration,
    messages: Vec<Message>,
) -> Result<PlanResult, RuntimeError> {
    plan_start(ctx, agent, messages).await.map(|mut p| {
        p.notes.push(format!("resumed for {}", agent.id));
        p
    })
}

enum MissingFieldsOutcome {
    Finalized(Message),
    Resumed(Vec<Message>),
    Errored(RuntimeError),
}

async fn handle_missing_fields(
    agent: &AgentRegistration,
    ctx: &mut dyn WorkflowContext,
    ledger: &mut Ledger,
    run_id: &RunId,
    turn_id: &TurnId,
    missing: Vec<String>,
) -> MissingFieldsOutcome {
    match agent.policy.on_missing_fields {
        OnMissingFields::Finalize => {
            MissingFieldsOutcome::Finalized(Message::text(
                Role::Assistant,
                format!("unable to complete: missing fields {:?}", missing),
            ))
        }
        OnMissingFields::AwaitClarification => {
            ledger.append_message(Message::text(
                Role::System,
                format!("awaiting clarification for fields {:?}", missing),
            ));
            ctx.publish_hook(RunEvent::new(
                agent.id.clone(),
                run_id.clone(),
                EventKind::PlannerNote,
                serde_json::json!({
                    "turn_id": turn_id.as_str(),
                    "note": "awaiting clarification",
                    "missing_fields": missing,
                }),
            ));
            match ctx.signals().clarification.recv().await {
                Some(answer) => {
                    ledger.append_message(Message::text(Role::User, answer.answer.to_string()));
                    match ledger.build_messages() {
                        Ok(m) => MissingFieldsOutcome::Resumed(m),
                        Err(e) => MissingFieldsOutcome::Errored(e),
                    }
                }
                None => MissingFieldsOutcome::Errored(RuntimeError::infra(
                    "clarification channel closed",
                    std::io::Error::other("closed"),
                )),
            }
        }
        OnMissingFields::Resume => {
            ledger.append_message(Message::text(
                Role::User,
                format!("Redo the operation now with valid parameters. Missing fields: {:?}", missing),
            ));
            match ledger.build_messages() {
                Ok(m) => MissingFieldsOutcome::Resumed(m),
                Err(e) => MissingFieldsOutcome::Errored(e),
            }
        }
    }
}

/// Dispatch every allowed candidate concurrently, preserving request order in
/// the returned vector regardless of completion order (§4.8 "Parallelism").
async fn dispatch_allowed(
    agent: &AgentRegistration,
    dispatcher: &ToolDispatcher,
    run_id: &RunId,
    turn_id: &TurnId,
    allowed: &[ToolCallCandidate],
    ctx: &mut dyn WorkflowContext,
) -> Vec<(ToolCallId, Part)> {
    for candidate in allowed {
        ctx.publish_hook(RunEvent::new(
            agent.id.clone(),
            run_id.clone(),
            EventKind::ToolCallScheduled,
            serde_json::json!({ "tool": candidate.tool_name, "call_id": candidate.call_id.as_str() }),
        ));
    }

    // Reborrow shared: every candidate dispatches concurrently below, and an
    // executor only ever needs read access to the live context (e.g. an
    // inline agent-as-tool executor deriving a nested context, §4.9).
    let ctx: &dyn WorkflowContext = ctx;

    let futures = allowed.iter().map(|candidate| {
        let toolset = agent.toolsets.iter().find(|t| t.tool_names.contains(&candidate.tool_name));
        async move {
            let result = match toolset {
                Some(toolset) => {
                    dispatcher
                        .dispatch(
                            &agent.id,
                            run_id,
                            turn_id,
                            toolset,
                            ToolRequest {
                                call_id: candidate.call_id.clone(),
                                tool_name: candidate.tool_name.clone(),
                                payload: candidate.payload.clone(),
                                parent_call_id: None,
                            },
                            ctx,
                        )
                        .await
                }
                None => crate::dispatch::attach_retry_hint(
                    &candidate.tool_name,
                    crate::dispatch::ToolResult::failure_with_kind(
                        format!("tool unavailable: {}", candidate.tool_name),
                        crate::dispatch::ToolErrorKind::ToolUnavailable,
                    ),
                ),
            };
            (
                candidate.call_id.clone(),
                Part::ToolResult {
                    tool_use_id: candidate.call_id.clone(),
                    content: result.output,
                    is_error: result.is_error(),
                },
            )
        }
    });

    join_all(futures).await
}

/// Non-blocking interrupt probe, entered after each tool batch (§4.8, §4.11).
/// Returns `Err` only when a pause's `ResumeDeadline` expires.
async fn probe_interrupts(
    ctx: &mut dyn WorkflowContext,
    policy: &crate::registration::RunPolicy,
    run_id: &RunId,
    run_store: Option<&dyn RunStore>,
    input: &RunInput,
) -> Result<(), ()> {
    let signals = ctx.signals();
    let _ = signals.external_tool_results.try_recv();
    let _ = signals.confirmation.try_recv();

    if let Some(pause) = signals.pause.try_recv() {
        if !policy.interrupts_allowed {
            // §9 open question, resolved: InterruptsAllowed=false rejects the
            // pause signal outright rather than honoring it.
            return Ok(());
        }
        upsert_status(run_store, input, RunStatus::Paused).await;
        let resumed = match pause.resume_deadline {
            Some(deadline) => {
                let remaining = deadline - Utc::now();
                if remaining.num_milliseconds() <= 0 {
                    None
                } else {
                    let millis = remaining.num_milliseconds() as u64;
                    ctx.signals()
                        .resume
                        .recv_timeout(tokio::time::Duration::from_millis(millis))
                        .await
                }
            }
            None => ctx.signals().resume.recv().await,
        };
        upsert_status(run_store, input, RunStatus::Running).await;
        if resumed.is_none() {
            return Err(());
        }
    }
    let _ = run_id;
    Ok(())
}

async fn upsert_status(run_store: Option<&dyn RunStore>, input: &RunInput, status: RunStatus) {
    if let Some(store) = run_store {
        let now = Utc::now();
        let _ = store
            .upsert(RunRecord {
                agent_id: input.agent_id.clone(),
                run_id: input.run_id.clone(),
                session_id: input.session_id.clone(),
                turn_id: input.turn_id.clone(),
                status,
                started_at: now,
                updated_at: now,
                labels: input.labels.clone(),
                metadata: input.metadata.clone(),
            })
            .await;
    }
}

async fn finalize_completed(
    agent_id: &AgentId,
    ctx: &mut dyn WorkflowContext,
    run_store: Option<&dyn RunStore>,
    input: &RunInput,
    message: Message,
) -> RunOutput {
    upsert_status(run_store, input, RunStatus::Completed).await;
    ctx.publish_hook(RunEvent::new(
        agent_id.clone(),
        input.run_id.clone(),
        EventKind::RunCompleted,
        serde_json::json!({ "message": message }),
    ));
    RunOutput {
        run_id: input.run_id.clone(),
        status: RunStatus::Completed,
        message: Some(message),
        failure: None,
    }
}

async fn finalize_failed(
    agent_id: &AgentId,
    ctx: &mut dyn WorkflowContext,
    run_store: Option<&dyn RunStore>,
    input: &RunInput,
    error: RuntimeError,
) -> RunOutput {
    upsert_status(run_store, input, RunStatus::Failed).await;
    ctx.publish_hook(RunEvent::new(
        agent_id.clone(),
        input.run_id.clone(),
        EventKind::RunFailed,
        serde_json::json!({ "error": error.to_string(), "kind": error.kind() }),
    ));
    RunOutput {
        run_id: input.run_id.clone(),
        status: RunStatus::Failed,
        message: None,
        failure: Some(error.to_string()),
    }
}
