//! Model interface (§6.2) — the abstract planner-facing LLM collaborator.
//!
//! Concrete provider SDK adapters (Bedrock, Anthropic, OpenAI) are
//! deliberately out of scope; this module specifies the trait only, a
//! `complete`/`stream` pair over the multi-part [`crate::message::Message`]
//! type the ledger requires.

use std::error::Error;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::message::Message;

/// One request to a [`Model`].
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<Message>,
    pub tools: Vec<crate::registry::ToolSpecSummary>,
    pub thinking_enabled: bool,
}

/// The non-streaming response to a [`Request`].
#[derive(Debug, Clone)]
pub struct Response {
    pub message: Message,
    pub usage: Option<TokenUsage>,
}

/// Token accounting for one [`Model::complete`]/[`Model::stream`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// The kind of one streamed [`Chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Text,
    Thinking,
    ToolCall,
    Usage,
    Stop,
}

/// One incremental piece of a streamed [`Model::stream`] response.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_type: ChunkType,
    pub delta: serde_json::Value,
}

/// A boxed stream of response chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// A live streaming response handle.
#[async_trait]
pub trait Streamer: Send {
    async fn recv(&mut self) -> Option<Result<Chunk, Box<dyn Error + Send + Sync>>>;
    fn metadata(&self) -> serde_json::Value;
    async fn close(&mut self);
}

/// The abstract LLM planner collaborator (§6.2). Implementations must be
/// `Send + Sync` so they can be shared across concurrent workflow activities,
/// matching the teacher's `ClientWrapper` thread-safety requirement.
#[async_trait]
pub trait Model: Send + Sync {
    async fn complete(&self, request: Request) -> Result<Response, Box<dyn Error + Send + Sync>>;

    /// Implementations without streaming support may inherit this default,
    /// which signals "not supported" by returning an error — matching the
    /// spec's `Stream(...) → Streamer | error` shape (vs. the teacher's
    /// `Option`-returning default, since the spec treats streaming as a
    /// first-class optional capability rather than an always-present no-op).
    async fn stream(&self, _request: Request) -> Result<Box<dyn Streamer>, Box<dyn Error + Send + Sync>> {
        Err("streaming not supported by this model".into())
    }
}
