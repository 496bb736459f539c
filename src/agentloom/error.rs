//! Crate-wide error taxonomy.
//!
//! `RuntimeError` encodes the error *kinds* of the agent execution core (not
//! concrete provider/transport error types, which are out of scope). Every
//! variant maps to one row of the taxonomy table: a run submitted for an
//! unregistered agent, a registration attempted after the gate closed, a
//! ledger that cannot satisfy provider ordering, and so on.
//!
//! Propagation follows the policy described alongside the taxonomy: tool-level
//! errors are captured as `ToolResult::Error` values and never reach here;
//! policy/cap errors terminate a run gracefully without raising `RuntimeError`
//! at all; only registration, ordering, and infrastructure failures surface
//! through this type.

use std::error::Error;
use std::fmt;

/// A boxed, thread-safe source error, mirroring the teacher's `Box<dyn Error + Send + Sync>`
/// chaining convention (see `ToolProtocol::execute`).
pub type Source = Box<dyn Error + Send + Sync>;

/// Crate-wide error kind.
#[derive(Debug)]
pub enum RuntimeError {
    /// A run was submitted for an `AgentID` that was never registered.
    AgentNotFound(String),
    /// The workflow engine refused to accept a new workflow; the run never started.
    EngineUnavailable(String),
    /// A registration call arrived after the first run started the gate.
    RegistrationClosed(String),
    /// `RunInput::session_id` was empty at submission.
    MissingSessionID,
    /// A planner activity's JSON-encoded input exceeded the configured byte budget.
    PlanInputTooLarge { limit: usize, actual: usize },
    /// `RunPolicy::max_tool_calls` or `max_consecutive_failed_tool_calls` was reached.
    CapExhausted(&'static str),
    /// `RunPolicy::time_budget` elapsed before the planner finalized.
    TimeBudgetExceeded,
    /// A candidate tool call was denied by the policy engine for this turn.
    PolicyDenied { tool: String, reason: String },
    /// A tool payload failed schema/provider validation.
    InvalidArguments { tool: String, message: String },
    /// A tool name referenced by the planner is not registered in any toolset.
    ToolUnavailable(String),
    /// The provider/model signaled a transient failure (rate limit, timeout).
    RetryableProvider(String),
    /// A pause was not resumed before its `ResumeDeadline`.
    InterruptExpired { run_id: String },
    /// The transcript ledger could not satisfy the provider ordering invariants.
    OrderingViolation(String),
    /// An engine/activity system failure unrelated to application logic.
    InfraError { message: String, source: Option<Source> },
}

impl RuntimeError {
    /// Construct an [`RuntimeError::InfraError`] wrapping an arbitrary source error.
    pub fn infra(message: impl Into<String>, source: impl Into<Source>) -> Self {
        RuntimeError::InfraError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The stable taxonomy name for this error, used in logs and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::AgentNotFound(_) => "AgentNotFound",
            RuntimeError::EngineUnavailable(_) => "EngineUnavailable",
            RuntimeError::RegistrationClosed(_) => "RegistrationClosed",
            RuntimeError::MissingSessionID => "MissingSessionID",
            RuntimeError::PlanInputTooLarge { .. } => "PlanInputTooLarge",
            RuntimeError::CapExhausted(_) => "CapExhausted",
            RuntimeError::TimeBudgetExceeded => "TimeBudgetExceeded",
            RuntimeError::PolicyDenied { .. } => "PolicyDenied",
            RuntimeError::InvalidArguments { .. } => "InvalidArguments",
            RuntimeError::ToolUnavailable(_) => "ToolUnavailable",
            RuntimeError::RetryableProvider(_) => "RetryableProvider",
            RuntimeError::InterruptExpired { .. } => "InterruptExpired",
            RuntimeError::OrderingViolation(_) => "OrderingViolation",
            RuntimeError::InfraError { .. } => "InfraError",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::AgentNotFound(id) => write!(f, "agent not found: {}", id),
            RuntimeError::EngineUnavailable(msg) => write!(f, "engine unavailable: {}", msg),
            RuntimeError::RegistrationClosed(what) => {
                write!(f, "registration closed, rejected: {}", what)
            }
            RuntimeError::MissingSessionID => write!(f, "missing session id"),
            RuntimeError::PlanInputTooLarge { limit, actual } => write!(
                f,
                "planner activity input of {} bytes exceeds budget of {} bytes",
                actual, limit
            ),
            RuntimeError::CapExhausted(which) => write!(f, "cap exhausted: {}", which),
            RuntimeError::TimeBudgetExceeded => write!(f, "run time budget exceeded"),
            RuntimeError::PolicyDenied { tool, reason } => {
                write!(f, "policy denied tool {}: {}", tool, reason)
            }
            RuntimeError::InvalidArguments { tool, message } => {
                write!(f, "invalid arguments for tool {}: {}", tool, message)
            }
            RuntimeError::ToolUnavailable(name) => write!(f, "tool unavailable: {}", name),
            RuntimeError::RetryableProvider(msg) => write!(f, "retryable provider error: {}", msg),
            RuntimeError::InterruptExpired { run_id } => {
                write!(f, "interrupt expired for run {}", run_id)
            }
            RuntimeError::OrderingViolation(msg) => write!(f, "ledger ordering violation: {}", msg),
            RuntimeError::InfraError { message, .. } => write!(f, "infra error: {}", message),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::InfraError { source, .. } => {
                source.as_deref().map(|e| e as &(dyn Error + 'static))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_taxonomy() {
        assert_eq!(RuntimeError::MissingSessionID.kind(), "MissingSessionID");
        assert_eq!(
            RuntimeError::CapExhausted("max_tool_calls").kind(),
            "CapExhausted"
        );
    }

    #[test]
    fn infra_error_chains_source() {
        let cause: Source = "boom".into();
        let err = RuntimeError::infra("engine poll failed", cause);
        assert!(err.source().is_some());
    }
}
