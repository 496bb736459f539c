//! Provider-agnostic message data model (§3).
//!
//! Generalizes the teacher's single-string [`crate::model::Model`] request shape
//! into the multi-part message the [`crate::ledger::Ledger`] reconstructs:
//! providers interleave plain text, reasoning ("thinking"), tool invocations,
//! and tool results within the same turn, and the ledger needs to see each
//! part distinctly to enforce ordering.

use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// The role a [`Message`] was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One constituent of a [`Message`].
///
/// `ImagePart`, `DocumentPart`, `CitationsPart`, and `CacheCheckpointPart` are
/// opaque to the core: the ledger passes them through untouched and never
/// inspects their payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Part {
    /// Plain assistant/user text.
    Text { text: String },
    /// Provider reasoning. When present in a tool-use-bearing assistant
    /// message, every `ThinkingPart` must precede all other parts (invariant 1).
    Thinking {
        text: String,
        signature: Option<String>,
        #[serde(default)]
        redacted: bool,
        index: u32,
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// An assistant-originated tool invocation.
    ToolUse {
        id: ToolCallId,
        name: String,
        input: serde_json::Value,
    },
    /// A user-role reply correlated to a prior `ToolUse.id`.
    ToolResult {
        tool_use_id: ToolCallId,
        content: serde_json::Value,
        is_error: bool,
    },
    /// Opaque to the core; passed through unchanged.
    Image { data: serde_json::Value },
    /// Opaque to the core; passed through unchanged.
    Document { data: serde_json::Value },
    /// Opaque to the core; passed through unchanged.
    Citations { data: serde_json::Value },
    /// Opaque to the core; passed through unchanged.
    CacheCheckpoint { data: serde_json::Value },
}

impl Part {
    /// `true` for the [`Part::Thinking`] variant.
    pub fn is_thinking(&self) -> bool {
        matches!(self, Part::Thinking { .. })
    }

    /// `true` for the [`Part::ToolUse`] variant.
    pub fn is_tool_use(&self) -> bool {
        matches!(self, Part::ToolUse { .. })
    }

    /// `true` for the [`Part::ToolResult`] variant.
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Part::ToolResult { .. })
    }

    /// The `ToolCallId` carried by a `ToolUse` or `ToolResult` part, if any.
    pub fn tool_call_id(&self) -> Option<&ToolCallId> {
        match self {
            Part::ToolUse { id, .. } => Some(id),
            Part::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }
}

/// A provider-ready chat message: a role plus an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    /// Convenience constructor for a single-text-part message (the common
    /// case for `RunInput::messages`).
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// `true` if any part is a `ToolUse`.
    pub fn has_tool_use(&self) -> bool {
        self.parts.iter().any(Part::is_tool_use)
    }

    /// All `ToolCallId`s declared by `ToolUse` parts, in declaration order.
    pub fn tool_use_ids(&self) -> Vec<&ToolCallId> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolUse { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }
}
