//! Registration / Lifecycle (C10) and the §3 registration-time data shapes.
//!
//! The registration gate flips on the first call to start a run; subsequent
//! `register_agent`/`register_toolset` calls fail with `RegistrationClosed`.
//! This mirrors the conservative assumption behind the teacher's
//! `ToolRegistry` design (tools are installed once, up front, before the
//! first request is served) made explicit per §4.10: some durable-execution
//! engines (the Temporal model in particular) cannot register new handlers on
//! a running worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::control_loop::{self, RunInput, RunOutput};
use crate::dispatch::{ToolDispatcher, ToolsetRegistration};
use crate::error::RuntimeError;
use crate::ids::AgentId;
use crate::model::Model;
use crate::policy::PolicyEngine;
use crate::registry::ToolRegistry;
use crate::stores::RunStore;
use crate::workflow::WorkflowContext;

/// What happens when the planner reports a `missing_fields` validation error
/// (§3 `RunPolicy.OnMissingFields`, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissingFields {
    Finalize,
    AwaitClarification,
    Resume,
}

impl Default for OnMissingFields {
    fn default() -> Self {
        OnMissingFields::Resume
    }
}

/// Per-agent run limits (§3 `RunPolicy`). A value of `0` for either cap means
/// unlimited (§9 open question, codified here).
#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub max_tool_calls: u32,
    pub max_consecutive_failed_tool_calls: u32,
    pub time_budget: chrono::Duration,
    pub interrupts_allowed: bool,
    pub on_missing_fields: OnMissingFields,
}

impl Default for RunPolicy {
    fn default() -> Self {
        RunPolicy {
            max_tool_calls: 0,
            max_consecutive_failed_tool_calls: 0,
            time_budget: chrono::Duration::zero(),
            interrupts_allowed: true,
            on_missing_fields: OnMissingFields::default(),
        }
    }
}

/// Names of the three workflow activities an agent's workflow definition
/// invokes (§3 `AgentRegistration`).
#[derive(Debug, Clone)]
pub struct ActivityNames {
    pub plan: String,
    pub resume: String,
    pub execute_tool: String,
}

/// A declared, runnable unit (§3 `AgentRegistration`, GLOSSARY "Agent").
pub struct AgentRegistration {
    pub id: AgentId,
    pub planner: Arc<dyn Model>,
    pub toolsets: Vec<ToolsetRegistration>,
    pub activity_names: ActivityNames,
    pub policy: RunPolicy,
    pub policy_engine: Arc<dyn PolicyEngine>,
}

struct RegistryInner {
    agents: HashMap<AgentId, Arc<AgentRegistration>>,
}

/// Process-wide agent registrations plus the registration gate (C10).
#[derive(Clone)]
pub struct AgentDirectory {
    inner: Arc<RwLock<RegistryInner>>,
    gate_closed: Arc<AtomicBool>,
    tool_registry: ToolRegistry,
}

impl AgentDirectory {
    pub fn new(tool_registry: ToolRegistry) -> Self {
        AgentDirectory {
            inner: Arc::new(RwLock::new(RegistryInner {
                agents: HashMap::new(),
            })),
            gate_closed: Arc::new(AtomicBool::new(false)),
            tool_registry,
        }
    }

    /// Register an agent. Enforces the required-fields checks from §4.10 and
    /// the registration gate.
    pub fn register_agent(&self, agent: AgentRegistration) -> Result<(), RuntimeError> {
        if self.gate_closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::RegistrationClosed(format!(
                "agent {}",
                agent.id
            )));
        }
        if agent.id.is_empty() {
            return Err(RuntimeError::RegistrationClosed(
                "agent id must be non-empty".to_string(),
            ));
        }
        if agent.activity_names.plan.is_empty()
            || agent.activity_names.resume.is_empty()
            || agent.activity_names.execute_tool.is_empty()
        {
            return Err(RuntimeError::RegistrationClosed(
                "plan/resume/execute_tool activity names must all be non-empty".to_string(),
            ));
        }

        let mut guard = self.inner.write().expect("agent directory lock poisoned");
        guard.agents.insert(agent.id.clone(), Arc::new(agent));
        Ok(())
    }

    pub fn lookup(&self, id: &AgentId) -> Option<Arc<AgentRegistration>> {
        self.inner
            .read()
            .expect("agent directory lock poisoned")
            .agents
            .get(id)
            .cloned()
    }

    /// Close the registration gate. Called internally the first time a run
    /// starts (C8's entry point). Also closes the nested tool registry's gate.
    pub fn close_gate(&self) {
        self.gate_closed.store(true, Ordering::SeqCst);
        self.tool_registry.close_gate();
    }

    pub fn gate_closed(&self) -> bool {
        self.gate_closed.load(Ordering::SeqCst)
    }

    /// Entry point for starting a run (C8, §4.10 testable invariant 7): the
    /// *first* run closes the registration gate (this directory's and the
    /// nested tool registry's) before doing anything else, so registration
    /// attempted after a run has started is rejected regardless of how
    /// quickly it arrives. Looks up the agent and drives it through the
    /// plan/execute/resume loop.
    pub async fn run(
        &self,
        dispatcher: &ToolDispatcher,
        run_store: Option<&dyn RunStore>,
        ctx: &mut dyn WorkflowContext,
        input: RunInput,
    ) -> Result<RunOutput, RuntimeError> {
        self.close_gate();
        let agent = self
            .lookup(&input.agent_id)
            .ok_or_else(|| RuntimeError::AgentNotFound(input.agent_id.to_string()))?;
        Ok(control_loop::run(&agent, &self.tool_registry, dispatcher, run_store, ctx, input).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::NoopPolicy;

    struct NullModel;
    #[async_trait::async_trait]
    impl Model for NullModel {
        async fn complete(
            &self,
            _request: crate::model::Request,
        ) -> Result<crate::model::Response, Box<dyn std::error::Error + Send + Sync>> {
            unimplemented!("test double")
        }
    }

    struct ImmediatelyFinalModel;
    #[async_trait::async_trait]
    impl Model for ImmediatelyFinalModel {
        async fn complete(
            &self,
            _request: crate::model::Request,
        ) -> Result<crate::model::Response, Box<dyn std::error::Error + Send + Sync>> {
            Ok(crate::model::Response {
                message: crate::message::Message::text(crate::message::Role::Assistant, "done"),
                usage: None,
            })
        }
    }

    fn agent(id: &str) -> AgentRegistration {
        AgentRegistration {
            id: AgentId::from(id),
            planner: Arc::new(NullModel),
            toolsets: vec![],
            activity_names: ActivityNames {
                plan: "plan".into(),
                resume: "resume".into(),
                execute_tool: "execute_tool".into(),
            },
            policy: RunPolicy::default(),
            policy_engine: Arc::new(NoopPolicy),
        }
    }

    #[test]
    fn registration_after_gate_closed_is_rejected_and_does_not_mutate_state() {
        let dir = AgentDirectory::new(ToolRegistry::new());
        dir.close_gate();
        let err = dir.register_agent(agent("acme.chat")).unwrap_err();
        assert_eq!(err.kind(), "RegistrationClosed");
        assert!(dir.lookup(&AgentId::from("acme.chat")).is_none());
    }

    #[test]
    fn empty_activity_names_rejected() {
        let dir = AgentDirectory::new(ToolRegistry::new());
        let mut a = agent("acme.chat");
        a.activity_names.resume = String::new();
        assert!(dir.register_agent(a).is_err());
    }

    #[tokio::test]
    async fn first_run_closes_the_gate_and_rejects_later_registration() {
        let dir = AgentDirectory::new(ToolRegistry::new());
        let mut a = agent("acme.chat");
        a.planner = Arc::new(ImmediatelyFinalModel);
        dir.register_agent(a).expect("registration before any run succeeds");
        assert!(!dir.gate_closed());

        let dispatcher = ToolDispatcher::new(crate::events::EventBus::new());
        let engine = crate::workflow::InMemoryEngine::new(crate::events::EventBus::new());
        let mut ctx = engine.new_context(
            crate::ids::RunId::new("r1"),
            Arc::new(ImmediatelyFinalModel),
            crate::workflow::CancelToken::new(),
        );
        let input = RunInput {
            agent_id: AgentId::from("acme.chat"),
            run_id: crate::ids::RunId::new("r1"),
            session_id: crate::ids::SessionId::new("s1"),
            turn_id: None,
            messages: vec![crate::message::Message::text(crate::message::Role::User, "hi")],
            labels: HashMap::new(),
            metadata: serde_json::Value::Null,
            policy_overrides: None,
        };

        let output = dir.run(&dispatcher, None, &mut ctx, input).await.expect("run dispatches");
        assert_eq!(output.status, crate::stores::RunStatus::Completed);
        assert!(dir.gate_closed(), "first run must close the registration gate (C10, invariant 7)");

        let err = dir.register_agent(agent("acme.other")).unwrap_err();
        assert_eq!(err.kind(), "RegistrationClosed");
    }

    #[tokio::test]
    async fn run_for_unregistered_agent_is_rejected() {
        let dir = AgentDirectory::new(ToolRegistry::new());
        let dispatcher = ToolDispatcher::new(crate::events::EventBus::new());
        let engine = crate::workflow::InMemoryEngine::new(crate::events::EventBus::new());
        let mut ctx = engine.new_context(
            crate::ids::RunId::new("r1"),
            Arc::new(ImmediatelyFinalModel),
            crate::workflow::CancelToken::new(),
        );
        let input = RunInput {
            agent_id: AgentId::from("acme.missing"),
            run_id: crate::ids::RunId::new("r1"),
            session_id: crate::ids::SessionId::new("s1"),
            turn_id: None,
            messages: vec![],
            labels: HashMap::new(),
            metadata: serde_json::Value::Null,
            policy_overrides: None,
        };

        let err = dir.run(&dispatcher, None, &mut ctx, input).await.unwrap_err();
        assert_eq!(err.kind(), "AgentNotFound");
        // The gate still closes: even a run for an unknown agent is a "first run" (§4.10).
        assert!(dir.gate_closed());
    }
}
