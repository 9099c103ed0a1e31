//! LLM provider abstraction.
//!
//! A provider runs one *turn*: it streams a response for the full
//! conversation history and reports what it decodes through a
//! [`TurnHandler`].  Every turn ends with exactly one of
//! [`TurnHandler::on_end`] or [`TurnHandler::on_error`].

pub mod anthropic;
pub mod sse;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::chat::types::{AssistantBlock, Message, ToolUse};

pub use anthropic::AnthropicProvider;

/// Callbacks a provider invokes while decoding one turn.
pub trait TurnHandler: Send + Sync {
    /// A text delta, forwarded as soon as it is decoded.
    fn on_text(&self, text: &str);
    /// A completed tool invocation block.  The input may be a
    /// placeholder if the streamed JSON could not be parsed.
    fn on_tool(&self, tool: ToolUse);
    /// Raw status fields (e.g. `ai_typing`).  Receivers filter them.
    fn on_status(&self, status: Map<String, Value>);
    /// The turn finished; `content` is the ordered list of blocks.
    fn on_end(&self, content: Vec<AssistantBlock>);
    /// The turn failed.
    fn on_error(&self, error: ProviderError);
}

/// A streaming chat backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one turn over `messages`.  Failures are reported through
    /// `handler.on_error`, never returned.
    async fn stream_turn(&self, messages: &[Message], handler: &dyn TurnHandler);
}

/// Failure of a single turn.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}")]
    Http { status: u16, body: String },
    /// Connecting, sending, or reading the body failed.
    #[error("provider transport error: {0}")]
    Transport(String),
    /// The provider emitted an in-stream `error` event.
    #[error("provider stream error: {kind}: {message}")]
    Stream { kind: String, message: String },
    /// The body ended before `message_stop`.
    #[error("provider stream ended before message_stop")]
    Incomplete,
    /// The turn task exited abnormally.
    #[error("unexpected turn failure: {0}")]
    Unexpected(String),
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

/// Build a one-field status map.
pub fn status_map(key: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert(key.to_string(), value.into());
    m
}
