//! Adapter wiring the `eventlog` crate's hash-chained, file-backed store
//! onto this crate's [`Memory`]/[`RunStore`] collaborator traits (C4).
//!
//! `eventlog` ships its own `Event`/`RunRecord` shapes independent of this
//! crate (so it can be depended on without pulling in `agentloom`); this
//! module does the small amount of translation needed to use it as the
//! default durable store for an embedder that wants one without reaching
//! for Mongo/Redis.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::events::{Event, EventKind};
use crate::ids::{AgentId, RunId};
use crate::stores::{Memory, RunRecord, RunStatus, RunStore, Snapshot};

fn event_kind_str(kind: EventKind) -> &'static str {
    match kind {
        EventKind::ToolCall => "tool_call",
        EventKind::ToolResult => "tool_result",
        EventKind::AssistantMessage => "assistant_message",
        EventKind::PlannerNote => "planner_note",
        EventKind::Thinking => "thinking",
        EventKind::RunStarted => "run_started",
        EventKind::RunCompleted => "run_completed",
        EventKind::RunFailed => "run_failed",
        EventKind::ToolCallScheduled => "tool_call_scheduled",
        EventKind::ToolResultReceived => "tool_result_received",
    }
}

fn event_kind_from_str(kind: &str) -> Result<EventKind, RuntimeError> {
    match kind {
        "tool_call" => Ok(EventKind::ToolCall),
        "tool_result" => Ok(EventKind::ToolResult),
        "assistant_message" => Ok(EventKind::AssistantMessage),
        "planner_note" => Ok(EventKind::PlannerNote),
        "thinking" => Ok(EventKind::Thinking),
        "run_started" => Ok(EventKind::RunStarted),
        "run_completed" => Ok(EventKind::RunCompleted),
        "run_failed" => Ok(EventKind::RunFailed),
        "tool_call_scheduled" => Ok(EventKind::ToolCallScheduled),
        "tool_result_received" => Ok(EventKind::ToolResultReceived),
        other => Err(RuntimeError::InfraError {
            message: format!("unknown persisted event kind: {}", other),
            source: None,
        }),
    }
}

fn to_eventlog_event(event: &Event) -> eventlog::Event {
    eventlog::Event {
        kind: event_kind_str(event.kind).to_string(),
        timestamp: event.timestamp,
        data: event.data.clone(),
        labels: event.labels.clone(),
    }
}

fn from_eventlog_event(event: eventlog::Event) -> Result<Event, RuntimeError> {
    Ok(Event {
        kind: event_kind_from_str(&event.kind)?,
        timestamp: event.timestamp,
        data: event.data,
        labels: event.labels,
    })
}

fn to_eventlog_status(status: RunStatus) -> eventlog::RunStatus {
    match status {
        RunStatus::Pending => eventlog::RunStatus::Pending,
        RunStatus::Running => eventlog::RunStatus::Running,
        RunStatus::Completed => eventlog::RunStatus::Completed,
        RunStatus::Failed => eventlog::RunStatus::Failed,
        RunStatus::Paused => eventlog::RunStatus::Paused,
    }
}

/// A [`Memory`] implementation backed by one hash-chained `.jsonl` file per
/// `(agent_id, run_id)` under `root`, via [`eventlog::EventLog`].
pub struct DurableMemory {
    root: PathBuf,
}

impl DurableMemory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DurableMemory { root: root.into() }
    }
}

#[async_trait]
impl Memory for DurableMemory {
    async fn append_events(&self, agent_id: &AgentId, run_id: &RunId, events: &[Event]) -> Result<(), RuntimeError> {
        let root = self.root.clone();
        let agent_id = agent_id.to_string();
        let run_id = run_id.to_string();
        let payload: Vec<eventlog::Event> = events.iter().map(to_eventlog_event).collect();

        tokio::task::spawn_blocking(move || -> Result<(), RuntimeError> {
            let mut log = eventlog::EventLog::open(&root, &agent_id, &run_id)
                .map_err(|e| RuntimeError::infra("opening event log", e))?;
            log.append_all(payload)
                .map_err(|e| RuntimeError::infra("appending events", e))
        })
        .await
        .map_err(|e| RuntimeError::infra("event log task panicked", Box::new(e) as crate::error::Source))??;
        Ok(())
    }

    async fn load_run(&self, agent_id: &AgentId, run_id: &RunId) -> Result<Option<Snapshot>, RuntimeError> {
        let root = self.root.clone();
        let agent_id_str = agent_id.to_string();
        let run_id_str = run_id.to_string();

        let loaded = tokio::task::spawn_blocking(move || -> Result<Option<Vec<eventlog::Event>>, String> {
            let log = eventlog::EventLog::open(&root, &agent_id_str, &run_id_str).map_err(|e| e.to_string())?;
            let events = log.events();
            if events.is_empty() {
                Ok(None)
            } else {
                Ok(Some(events))
            }
        })
        .await
        .map_err(|e| RuntimeError::infra("event log task panicked", Box::new(e) as crate::error::Source))?;

        match loaded {
            Ok(None) => Ok(None),
            Ok(Some(raw_events)) => {
                let mut events = Vec::with_capacity(raw_events.len());
                for raw in raw_events {
                    events.push(from_eventlog_event(raw)?);
                }
                Ok(Some(Snapshot {
                    agent_id: Some(agent_id.clone()),
                    run_id: Some(run_id.clone()),
                    events,
                    meta: serde_json::Value::Null,
                }))
            }
            // A store failure is logged and reported as "not found", per
            // §4.4's failure semantics: the runtime proceeds with an empty
            // snapshot rather than failing the run.
            Err(message) => {
                log::error!("durable memory load_run failed for {}/{}: {}", agent_id, run_id, message);
                Ok(None)
            }
        }
    }
}

/// A [`RunStore`] implementation backed by [`eventlog::RunTable`], a single
/// append-only `runs.jsonl` file under `root` shared across every run.
pub struct DurableRunStore {
    root: PathBuf,
}

impl DurableRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DurableRunStore { root: root.into() }
    }
}

#[async_trait]
impl RunStore for DurableRunStore {
    async fn upsert(&self, record: RunRecord) -> Result<(), RuntimeError> {
        let root = self.root.clone();
        let mapped = eventlog::RunRecord {
            agent_id: record.agent_id.to_string(),
            run_id: record.run_id.to_string(),
            session_id: record.session_id.to_string(),
            turn_id: record.turn_id.map(|t| t.to_string()),
            status: to_eventlog_status(record.status),
            started_at: record.started_at,
            updated_at: record.updated_at,
            labels: record.labels,
            metadata: record.metadata,
        };

        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut table = eventlog::RunTable::open(&root)?;
            table.upsert(mapped)
        })
        .await
        .map_err(|e| RuntimeError::infra("run table task panicked", Box::new(e) as crate::error::Source))?;

        result.map_err(|e| RuntimeError::infra("run table upsert failed", e))
    }
}
