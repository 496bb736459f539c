//! Transcript ledger (C2): provider-ordered message reconstruction from events.
//!
//! Providers demand strict structural pairing between assistant `tool_use`
//! blocks and user `tool_result` blocks. Storing raw event chunks and
//! rebuilding messages per turn — rather than replaying messages verbatim —
//! is the only deterministic way to preserve that ordering after compaction,
//! replay, and multi-process runs (see `SPEC_FULL.md` §4.2/§9).
//!
//! The ledger is single-owner per workflow instance and requires no lock
//! (§5): it is plain in-memory state mutated only by the workflow body.

use crate::error::RuntimeError;
use crate::events::{Event, EventKind};
use crate::ids::ToolCallId;
use crate::message::{Message, Part, Role};

/// In-memory, provider-ordered derivation of a run's conversation.
///
/// Holds an open "current assistant message" until [`Ledger::flush_assistant`]
/// (implicitly called by [`Ledger::append_user_tool_results`]) commits it to
/// the committed list.
#[derive(Debug, Default)]
pub struct Ledger {
    committed: Vec<Message>,
    open_assistant: Option<Message>,
}

impl Ledger {
    /// An empty ledger with no committed messages.
    pub fn new() -> Self {
        Ledger::default()
    }

    fn current_assistant(&mut self) -> &mut Message {
        self.open_assistant.get_or_insert_with(|| Message {
            role: Role::Assistant,
            parts: Vec::new(),
        })
    }

    /// Insert a thinking part into the current assistant message, preserving
    /// the head run of `ThinkingPart`s (invariant 1: they must precede every
    /// other part when the message ends up containing a `ToolUse`).
    pub fn append_thinking(&mut self, part: Part) {
        debug_assert!(part.is_thinking());
        let msg = self.current_assistant();
        let insert_at = msg
            .parts
            .iter()
            .position(|p| !p.is_thinking())
            .unwrap_or(msg.parts.len());
        msg.parts.insert(insert_at, part);
    }

    /// Append a plain text part to the current assistant message.
    pub fn append_text(&mut self, text: impl Into<String>) {
        self.current_assistant().parts.push(Part::Text { text: text.into() });
    }

    /// Append a `ToolUse` part to the current assistant message.
    pub fn declare_tool_use(&mut self, id: ToolCallId, name: impl Into<String>, input: serde_json::Value) {
        self.current_assistant().parts.push(Part::ToolUse {
            id,
            name: name.into(),
            input,
        });
    }

    /// Commit the current assistant message to the committed list, if one is open.
    pub fn flush_assistant(&mut self) {
        if let Some(msg) = self.open_assistant.take() {
            if !msg.parts.is_empty() {
                self.committed.push(msg);
            }
        }
    }

    /// Commit a user-role message containing the given `ToolResult` parts, in
    /// order. Flushes the open assistant message first.
    pub fn append_user_tool_results(&mut self, results: Vec<Part>) {
        self.flush_assistant();
        debug_assert!(results.iter().all(Part::is_tool_result));
        self.committed.push(Message {
            role: Role::User,
            parts: results,
        });
    }

    /// Append a plain user or system message (no tool results), flushing any
    /// open assistant message first.
    pub fn append_message(&mut self, message: Message) {
        self.flush_assistant();
        self.committed.push(message);
    }

    /// Return provider-ready messages, validating ordering invariants 1–3.
    ///
    /// Fails with [`RuntimeError::OrderingViolation`] rather than emit a
    /// partial or invalid transcript.
    pub fn build_messages(&self) -> Result<Vec<Message>, RuntimeError> {
        let mut messages = self.committed.clone();
        if let Some(open) = &self.open_assistant {
            if !open.parts.is_empty() {
                messages.push(open.clone());
            }
        }
        verify_invariants(&messages)?;
        Ok(messages)
    }

    /// Standalone invariant check usable outside [`Ledger::build_messages`].
    pub fn verify_invariants(&self) -> Result<(), RuntimeError> {
        self.build_messages().map(|_| ())
    }

    /// Deterministically reconstruct a ledger from an append-only event log.
    ///
    /// Events are ordered by timestamp, then by kind priority on ties:
    /// `Thinking < AssistantMessage < ToolCall < ToolResult`.
    pub fn from_events(mut events: Vec<Event>) -> Result<Self, RuntimeError> {
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(kind_priority(&a.kind).cmp(&kind_priority(&b.kind))));

        let mut ledger = Ledger::new();
        for event in events {
            match event.kind {
                EventKind::Thinking => {
                    if let Some(part) = part_from_data(&event.data, true) {
                        ledger.append_thinking(part);
                    }
                }
                EventKind::AssistantMessage => {
                    if let Some(text) = event.data.get("text").and_then(|v| v.as_str()) {
                        ledger.append_text(text);
                    }
                }
                EventKind::ToolCall => {
                    if let (Some(id), Some(name)) = (
                        event.data.get("id").and_then(|v| v.as_str()),
                        event.data.get("name").and_then(|v| v.as_str()),
                    ) {
                        let input = event.data.get("input").cloned().unwrap_or(serde_json::Value::Null);
                        ledger.declare_tool_use(ToolCallId::new(id), name, input);
                    }
                }
                EventKind::ToolResult => {
                    if let Some(id) = event.data.get("tool_use_id").and_then(|v| v.as_str()) {
                        let content = event.data.get("content").cloned().unwrap_or(serde_json::Value::Null);
                        let is_error = event.data.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
                        ledger.append_user_tool_results(vec![Part::ToolResult {
                            tool_use_id: ToolCallId::new(id),
                            content,
                            is_error,
                        }]);
                    }
                }
                EventKind::PlannerNote | EventKind::RunStarted | EventKind::RunCompleted | EventKind::RunFailed
                | EventKind::ToolCallScheduled | EventKind::ToolResultReceived => {
                    // Informational events outside the §3 Event enum's {ToolCall, ToolResult,
                    // AssistantMessage, PlannerNote, Thinking} core do not participate in
                    // transcript reconstruction.
                }
            }
        }
        ledger.verify_invariants()?;
        Ok(ledger)
    }
}

fn kind_priority(kind: &EventKind) -> u8 {
    match kind {
        EventKind::Thinking => 0,
        EventKind::AssistantMessage => 1,
        EventKind::ToolCall => 2,
        EventKind::ToolResult => 3,
        _ => 4,
    }
}

fn part_from_data(data: &serde_json::Value, is_final: bool) -> Option<Part> {
    let text = data.get("text")?.as_str()?.to_string();
    Some(Part::Thinking {
        text,
        signature: data.get("signature").and_then(|v| v.as_str()).map(str::to_string),
        redacted: data.get("redacted").and_then(|v| v.as_bool()).unwrap_or(false),
        index: data.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        is_final,
    })
}

/// Validate ordering invariants 1–3 over a sequence of provider-ready messages.
fn verify_invariants(messages: &[Message]) -> Result<(), RuntimeError> {
    for (i, msg) in messages.iter().enumerate() {
        if matches!(msg.role, Role::Assistant) && msg.has_tool_use() {
            // Invariant 1: all ThinkingParts precede all other parts.
            let mut seen_non_thinking = false;
            for part in &msg.parts {
                if part.is_thinking() {
                    if seen_non_thinking {
                        return Err(RuntimeError::OrderingViolation(format!(
                            "message {}: ThinkingPart follows a non-thinking part",
                            i
                        )));
                    }
                } else {
                    seen_non_thinking = true;
                }
            }

            // Invariant 2: every ToolUsePart.ID must be followed, in the next
            // user-role message, by a matching ToolResultPart.
            let expected_ids: Vec<&ToolCallId> = msg.tool_use_ids();
            let next = messages.get(i + 1).ok_or_else(|| {
                RuntimeError::OrderingViolation(format!(
                    "message {}: assistant tool_use has no following user message",
                    i
                ))
            })?;
            if !matches!(next.role, Role::User) {
                return Err(RuntimeError::OrderingViolation(format!(
                    "message {}: message following a tool_use is not user-role",
                    i
                )));
            }
            let actual_ids: Vec<&ToolCallId> = next
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolResult { tool_use_id, .. } => Some(tool_use_id),
                    _ => None,
                })
                .collect();

            // Invariant 3: ToolResult ordering matches ToolUse declaration order.
            if actual_ids != expected_ids {
                return Err(RuntimeError::OrderingViolation(format!(
                    "message {}: tool_result ids {:?} do not match declared tool_use ids {:?}",
                    i, actual_ids, expected_ids
                )));
            }
        }

        // No ToolResultPart may reference a ToolUseID absent from the
        // immediately prior assistant message.
        if matches!(msg.role, Role::User) {
            let has_results = msg.parts.iter().any(Part::is_tool_result);
            if has_results {
                let prior_ids: Vec<&ToolCallId> = messages
                    .get(i.wrapping_sub(1))
                    .filter(|_| i > 0)
                    .map(|prior| prior.tool_use_ids())
                    .unwrap_or_default();
                for part in &msg.parts {
                    if let Part::ToolResult { tool_use_id, .. } = part {
                        if !prior_ids.contains(&tool_use_id) {
                            return Err(RuntimeError::OrderingViolation(format!(
                                "message {}: tool_result references unknown tool_use_id {}",
                                i, tool_use_id
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
