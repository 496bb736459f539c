//! Opaque identifiers for the data model (§3 of the specification).
//!
//! All identifier families are caller-assigned opaque strings except
//! [`ToolCallId`], which the runtime generates and is guaranteed unique per
//! workflow execution.

use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap a caller-assigned identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// `true` if the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(AgentId, "`\"service.agent\"`-shaped agent identifier.");
string_id!(ToolsetId, "`\"service.toolset\"`-shaped toolset identifier.");
string_id!(ToolId, "`\"service.toolset.tool\"`-shaped tool identifier.");
string_id!(RunId, "Identifier for one end-to-end agent execution.");
string_id!(SessionId, "Identifier grouping runs into a conversation session.");
string_id!(TurnId, "Identifier for one plan→tools→resume cycle within a run.");
string_id!(ToolCallId, "Runtime-generated identifier for a single tool invocation.");

impl RunId {
    /// Generate a fresh, unique run id (used when `RunInput::run_id` is absent).
    pub fn generate() -> Self {
        RunId(Uuid::new_v4().to_string())
    }
}

impl ToolCallId {
    /// Generate a fresh tool-call id, unique per workflow execution.
    pub fn generate() -> Self {
        ToolCallId(Uuid::new_v4().to_string())
    }
}
