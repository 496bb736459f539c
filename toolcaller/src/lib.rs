//! `ToolCaller` interface (§6.3): the collaborator contract MCP/A2A-style
//! transports plug into.
//!
//! No concrete wire transport ships here — HTTP/JSON-RPC transports are out
//! of scope (§1 "Deliberately out of scope") — this crate specifies the
//! trait, a deterministic error kind taxonomy, and an in-memory test double
//! transports can be validated against before a real one is written.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One call through a [`ToolCaller`] (§6.3 `CallRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub suite: String,
    pub tool: String,
    pub payload: serde_json::Value,
}

/// The reply to a [`CallRequest`] (§6.3 `CallResponse`). `structured` carries
/// a typed result alongside the free-form `result` when the remote side
/// returns both, mirroring MCP's dual content/structuredContent shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub result: serde_json::Value,
    pub structured: Option<serde_json::Value>,
}

/// Deterministic error taxonomy a [`ToolCaller`] implementation must
/// translate its transport-specific failures into, so [`crate::dispatch`]-style
/// retry-hint formation (outside this crate's scope) has a stable surface to
/// pattern-match against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The named suite/tool pair is not known to the remote.
    MethodNotFound { suite: String, tool: String },
    /// The payload failed the remote's own schema validation.
    InvalidArguments { message: String },
    /// The remote is reachable but signaled a transient failure (timeout,
    /// rate limit); safe to retry at the activity layer.
    Retryable { message: String },
    /// Any other remote-side failure not covered above.
    Other { message: String },
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MethodNotFound { suite, tool } => {
                write!(f, "method not found: {}.{}", suite, tool)
            }
            ErrorKind::InvalidArguments { message } => write!(f, "invalid arguments: {}", message),
            ErrorKind::Retryable { message } => write!(f, "retryable: {}", message),
            ErrorKind::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// The collaborator interface an MCP/A2A-style external transport implements
/// (§6.3). The core never depends on a concrete transport; it depends only
/// on this trait.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(&self, request: CallRequest) -> Result<CallResponse, ErrorKind>;
}

/// An in-memory [`ToolCaller`] double for tests and for embedders
/// prototyping a toolset before a real transport exists. Routes calls by
/// `(suite, tool)` to a registered closure.
#[derive(Clone, Default)]
pub struct InMemoryToolCaller {
    handlers: Arc<RwLock<HashMap<(String, String), Arc<dyn Fn(serde_json::Value) -> Result<CallResponse, ErrorKind> + Send + Sync>>>>,
}

impl InMemoryToolCaller {
    pub fn new() -> Self {
        InMemoryToolCaller::default()
    }

    /// Register a handler for one `(suite, tool)` pair. Overwrites any prior
    /// handler for the same pair.
    pub fn on(
        &self,
        suite: impl Into<String>,
        tool: impl Into<String>,
        handler: impl Fn(serde_json::Value) -> Result<CallResponse, ErrorKind> + Send + Sync + 'static,
    ) {
        self.handlers
            .write()
            .expect("in-memory tool caller lock poisoned")
            .insert((suite.into(), tool.into()), Arc::new(handler));
    }
}

#[async_trait]
impl ToolCaller for InMemoryToolCaller {
    async fn call_tool(&self, request: CallRequest) -> Result<CallResponse, ErrorKind> {
        let key = (request.suite.clone(), request.tool.clone());
        let handler = self
            .handlers
            .read()
            .expect("in-memory tool caller lock poisoned")
            .get(&key)
            .cloned();
        match handler {
            Some(handler) => handler(request.payload),
            None => Err(ErrorKind::MethodNotFound {
                suite: request.suite,
                tool: request.tool,
            }),
        }
    }
}
