//! Memory & Run Store interfaces (C4) — collaborator traits only.
//!
//! Concrete persistent store implementations (Mongo, Redis/Pulse) are out of
//! scope; this module specifies the two interfaces the core depends on. A
//! worked, hash-chained reference implementation ships as the separate
//! `eventlog` crate.
//!
//! Failure semantics (§4.4): store errors are logged and reported but never
//! fail the run. The runtime must proceed with an empty snapshot if
//! [`RunStore::load_run`] reports "not found".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::events::Event;
use crate::ids::{AgentId, RunId, SessionId, TurnId};

/// A run's accumulated event log plus free-form metadata, as loaded from a
/// [`Memory`] implementation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub agent_id: Option<AgentId>,
    pub run_id: Option<RunId>,
    pub events: Vec<Event>,
    pub meta: serde_json::Value,
}

/// Append-only event log for a run (§4.4, §6.5).
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append `events` to the durable log for `(agent_id, run_id)`.
    async fn append_events(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
        events: &[Event],
    ) -> Result<(), RuntimeError>;

    /// Load the accumulated snapshot for a run. Implementations MUST signal
    /// "not found" by returning `Ok(None)`, never an error — the runtime
    /// treats a missing run as an empty snapshot, not a failure.
    async fn load_run(
        &self,
        agent_id: &AgentId,
        run_id: &RunId,
    ) -> Result<Option<Snapshot>, RuntimeError>;
}

/// Status of one run record (§4.4, §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// A run's metadata row, independent of its event log (§6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub agent_id: AgentId,
    pub run_id: RunId,
    pub session_id: SessionId,
    pub turn_id: Option<TurnId>,
    pub status: RunStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub labels: std::collections::HashMap<String, String>,
    pub metadata: serde_json::Value,
}

/// Run-record upsert interface (§4.4).
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn upsert(&self, record: RunRecord) -> Result<(), RuntimeError>;
}

/// A [`Memory`] implementation that discards everything it is given, mirroring
/// `cloudllm::planner::NoopMemory`. Useful as a default when no durable store
/// is configured and for unit tests that don't exercise persistence.
pub struct NoopMemory;

#[async_trait]
impl Memory for NoopMemory {
    async fn append_events(
        &self,
        _agent_id: &AgentId,
        _run_id: &RunId,
        _events: &[Event],
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn load_run(
        &self,
        _agent_id: &AgentId,
        _run_id: &RunId,
    ) -> Result<Option<Snapshot>, RuntimeError> {
        Ok(None)
    }
}

/// A [`RunStore`] implementation that discards every upsert.
pub struct NoopRunStore;

#[async_trait]
impl RunStore for NoopRunStore {
    async fn upsert(&self, _record: RunRecord) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_memory_reports_not_found_as_none() {
        let mem = NoopMemory;
        let result = mem.load_run(&AgentId::from("a"), &RunId::new("r")).await.unwrap();
        assert!(result.is_none());
    }
}
