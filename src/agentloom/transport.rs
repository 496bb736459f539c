//! Adapter wiring an external `toolcaller::ToolCaller` transport (MCP/A2A-
//! style, §6.3) onto this crate's [`ToolsetExecutor`] interface (C7).
//!
//! A [`ToolsetRegistration`] whose tools live behind a remote transport
//! rather than in-process Rust wires its `executor` field to a
//! [`RemoteToolsetExecutor`] wrapping the concrete [`toolcaller::ToolCaller`].
//! `suite` identifies which remote tool suite `tool_name` values on this
//! toolset belong to (mirroring MCP's server/tool namespacing).

use std::sync::Arc;

use async_trait::async_trait;
use toolcaller::{CallRequest, ErrorKind, ToolCaller};

use crate::dispatch::{ToolErrorKind, ToolRequest, ToolResult, ToolsetExecutor};
use crate::workflow::WorkflowContext;

/// Dispatches [`ToolRequest`]s to a remote tool suite through a
/// [`toolcaller::ToolCaller`], translating its `Result<CallResponse, ErrorKind>`
/// into the core's `ToolResult` (errors never propagate as `RuntimeError` —
/// they become `ToolResult::error` values per §4.7's failure policy).
pub struct RemoteToolsetExecutor {
    suite: String,
    caller: Arc<dyn ToolCaller>,
}

impl RemoteToolsetExecutor {
    pub fn new(suite: impl Into<String>, caller: Arc<dyn ToolCaller>) -> Self {
        RemoteToolsetExecutor {
            suite: suite.into(),
            caller,
        }
    }
}

#[async_trait]
impl ToolsetExecutor for RemoteToolsetExecutor {
    async fn execute(&self, request: ToolRequest, _ctx: &dyn WorkflowContext) -> ToolResult {
        let call = CallRequest {
            suite: self.suite.clone(),
            tool: request.tool_name.clone(),
            payload: request.payload,
        };

        match self.caller.call_tool(call).await {
            Ok(response) => ToolResult::success(response.structured.unwrap_or(response.result)),
            Err(ErrorKind::InvalidArguments { message }) => ToolResult::failure_with_kind(
                format!("invalid arguments: {}", message),
                ToolErrorKind::InvalidArguments,
            ),
            Err(ErrorKind::MethodNotFound { suite, tool }) => ToolResult::failure_with_kind(
                format!("method not found: {}.{}", suite, tool),
                ToolErrorKind::ToolUnavailable,
            ),
            Err(ErrorKind::Retryable { message }) => {
                ToolResult::failure_with_kind(format!("retryable: {}", message), ToolErrorKind::Retryable)
            }
            Err(ErrorKind::Other { message }) => ToolResult::failure_with_kind(message, ToolErrorKind::Other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolcaller::{CallResponse, InMemoryToolCaller};

    struct Unused;
    #[async_trait]
    impl crate::model::Model for Unused {
        async fn complete(
            &self,
            _request: crate::model::Request,
        ) -> Result<crate::model::Response, Box<dyn std::error::Error + Send + Sync>> {
            unreachable!("planner is not invoked by transport-only tests")
        }
    }

    fn test_ctx() -> crate::workflow::InMemoryContext {
        crate::workflow::InMemoryEngine::new(crate::events::EventBus::new()).new_context(
            crate::ids::RunId::new("ctx-r1"),
            Arc::new(Unused),
            crate::workflow::CancelToken::new(),
        )
    }

    #[tokio::test]
    async fn successful_remote_call_becomes_success_result() {
        let caller = InMemoryToolCaller::new();
        caller.on("acme", "lookup", |payload| {
            Ok(CallResponse {
                result: serde_json::json!({"echo": payload}),
                structured: None,
            })
        });
        let executor = RemoteToolsetExecutor::new("acme", Arc::new(caller));

        let result = executor
            .execute(
                ToolRequest {
                    call_id: crate::ids::ToolCallId::new("call-1"),
                    tool_name: "lookup".into(),
                    payload: serde_json::json!({"q": "x"}),
                    parent_call_id: None,
                },
                &test_ctx(),
            )
            .await;

        assert!(!result.is_error());
        assert_eq!(result.output["echo"]["q"], "x");
    }

    #[tokio::test]
    async fn method_not_found_becomes_failure_result() {
        let caller = InMemoryToolCaller::new();
        let executor = RemoteToolsetExecutor::new("acme", Arc::new(caller));

        let result = executor
            .execute(
                ToolRequest {
                    call_id: crate::ids::ToolCallId::new("call-1"),
                    tool_name: "missing".into(),
                    payload: serde_json::Value::Null,
                    parent_call_id: None,
                },
                &test_ctx(),
            )
            .await;

        assert!(result.is_error());
        assert!(result.error.unwrap().contains("method not found"));
    }
}
