//! Ident & Tool Registry (C1): canonical tool identity, spec storage, codec lookup.
//!
//! Process-wide mapping `ToolID → ToolSpec` and `ToolsetID → ToolsetRegistration`,
//! keyed two levels deep (§4.1) behind an `Arc<RwLock<_>>`. Specs are
//! immutable after insertion; callers receive clones, never references into
//! the map, so no lock is ever held across an activity suspension (§5).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::ids::{AgentId, ToolId, ToolsetId};

/// How a tool payload/result is encoded for transport.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, RuntimeError>;
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, RuntimeError>;
}

/// The default, and only shipped, codec: canonical JSON bytes. Concrete
/// provider-specific codecs are a collaborator concern left to embedders.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, RuntimeError> {
        serde_json::to_vec(value).map_err(|e| RuntimeError::infra("json encode failed", e))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, RuntimeError> {
        serde_json::from_slice(bytes).map_err(|e| RuntimeError::infra("json decode failed", e))
    }
}

/// A named typed shape for a tool's payload or result (§3 `ToolSpec`).
pub struct TypeSpec {
    pub type_name: String,
    pub schema: serde_json::Value,
    pub codec: Arc<dyn Codec>,
}

impl TypeSpec {
    pub fn json(type_name: impl Into<String>, schema: serde_json::Value) -> Self {
        TypeSpec {
            type_name: type_name.into(),
            schema,
            codec: Arc::new(JsonCodec),
        }
    }
}

/// Canonical description of one tool (§3 `ToolSpec`).
pub struct ToolSpec {
    pub id: ToolId,
    pub name: String,
    pub service: String,
    pub toolset: ToolsetId,
    pub description: String,
    pub payload_spec: TypeSpec,
    pub result_spec: TypeSpec,
    pub sidecar_spec: Option<TypeSpec>,
    pub tags: Vec<String>,
}

/// A snapshot of a [`ToolSpec`]'s identity fields, cheap to clone and safe to
/// hand to callers outside the registry's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpecSummary {
    pub id: ToolId,
    pub name: String,
    pub toolset: ToolsetId,
    pub description: String,
    pub tags: Vec<String>,
}

impl ToolSpec {
    pub fn summary(&self) -> ToolSpecSummary {
        ToolSpecSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            toolset: self.toolset.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }
}

struct RegistryInner {
    specs: HashMap<ToolId, Arc<ToolSpec>>,
    agent_tools: HashMap<AgentId, Vec<ToolId>>,
    gate_closed: bool,
}

/// Process-wide tool identity registry (C1). Readers take a read lock;
/// writers take a write lock; a registration after the [registration
/// gate](crate::registration) closes fails with `RegistrationClosed`.
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        ToolRegistry::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            inner: Arc::new(RwLock::new(RegistryInner {
                specs: HashMap::new(),
                agent_tools: HashMap::new(),
                gate_closed: false,
            })),
        }
    }

    /// Idempotent insert. Fails with `RegistrationClosed` if the gate has
    /// already flipped (first run started).
    pub fn register(&self, agent_id: &AgentId, spec: ToolSpec) -> Result<(), RuntimeError> {
        let mut guard = self.inner.write().expect("tool registry lock poisoned");
        if guard.gate_closed {
            return Err(RuntimeError::RegistrationClosed(format!(
                "tool {}",
                spec.id
            )));
        }
        let id = spec.id.clone();
        guard
            .agent_tools
            .entry(agent_id.clone())
            .or_default()
            .push(id.clone());
        guard.specs.insert(id, Arc::new(spec));
        Ok(())
    }

    /// Constant-time lookup by `ToolId`.
    pub fn lookup(&self, id: &ToolId) -> Option<Arc<ToolSpec>> {
        self.inner
            .read()
            .expect("tool registry lock poisoned")
            .specs
            .get(id)
            .cloned()
    }

    /// A snapshot of every spec registered for `agent_id`.
    pub fn list_for_agent(&self, agent_id: &AgentId) -> Vec<ToolSpecSummary> {
        let guard = self.inner.read().expect("tool registry lock poisoned");
        guard
            .agent_tools
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| guard.specs.get(id).map(|s| s.summary()))
            .collect()
    }

    /// Close the registration gate; subsequent `register` calls fail.
    pub(crate) fn close_gate(&self) {
        self.inner.write().expect("tool registry lock poisoned").gate_closed = true;
    }

    pub(crate) fn gate_closed(&self) -> bool {
        self.inner.read().expect("tool registry lock poisoned").gate_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> ToolSpec {
        ToolSpec {
            id: ToolId::from(id),
            name: id.to_string(),
            service: "acme".to_string(),
            toolset: ToolsetId::from("acme.chat"),
            description: "test tool".to_string(),
            payload_spec: TypeSpec::json("Payload", serde_json::json!({})),
            result_spec: TypeSpec::json("Result", serde_json::json!({})),
            sidecar_spec: None,
            tags: vec![],
        }
    }

    #[test]
    fn lookup_after_register_returns_spec() {
        let registry = ToolRegistry::new();
        let agent = AgentId::from("acme.chat");
        registry.register(&agent, spec("acme.chat.lookup")).unwrap();
        let found = registry.lookup(&ToolId::from("acme.chat.lookup"));
        assert!(found.is_some());
        assert_eq!(registry.list_for_agent(&agent).len(), 1);
    }

    #[test]
    fn register_after_gate_closed_fails() {
        let registry = ToolRegistry::new();
        registry.close_gate();
        let err = registry
            .register(&AgentId::from("acme.chat"), spec("acme.chat.lookup"))
            .unwrap_err();
        assert_eq!(err.kind(), "RegistrationClosed");
    }
}
