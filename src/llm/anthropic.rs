//! Anthropic Messages API provider with SSE streaming.
//!
//! Decoding happens in two layers: [`super::sse::SseDecoder`] turns
//! bytes into JSON records, and [`BlockAssembler`] turns records into
//! content blocks and [`TurnHandler`] callbacks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;
use tracing::{debug, info, warn};

use super::sse::SseDecoder;
use super::{status_map, ChatProvider, ProviderError, TurnHandler};
use crate::chat::types::{
    create_file_tool_schema, AssistantBlock, CreateFileInput, Message, ToolUse, CREATE_FILE_TOOL,
};

/// Default endpoint for the Messages API.
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub const SYSTEM_PROMPT: &str = "You are an assistant that helps the user create and inspect files.\n\
When it is appropriate to create a file, call the create_file tool with the path and content fields.\n\
Wait for the tool_result before continuing your answer.\n\
If the file creation is denied, answer without using the tool.";

// ── Wire events ─────────────────────────────────────────────

/// Streamed events this decoder understands.  Anything else with a
/// string `type` (`message_start`, `ping`, `message_delta`, …) maps to
/// [`StreamEvent::Other`].
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamEvent {
    ContentBlockStart {
        content_block: BlockStart,
    },
    ContentBlockDelta {
        #[serde(default)]
        delta: Option<Delta>,
    },
    ContentBlockStop,
    MessageStop,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BlockStart {
    Text,
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Delta {
    TextDelta {
        #[serde(default)]
        text: Option<String>,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

// ── Block assembly ──────────────────────────────────────────

/// What the assembler wants the caller to do after an event.
#[derive(Debug, PartialEq)]
pub enum Step {
    Continue,
    /// `message_stop` was seen; the turn has been ended.
    Finished,
    /// An in-stream error was reported; stop reading.
    Failed,
}

/// Builds the ordered block list of one turn from decoded events.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    blocks: Vec<AssistantBlock>,
    /// Index in `blocks` of the tool block being streamed, if any.
    open_tool: Option<usize>,
    input_json: String,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and apply one raw record.  Records that do not match
    /// the event schema are logged and skipped.
    pub fn apply(&mut self, raw: Value, handler: &dyn TurnHandler) -> Step {
        let event = match serde_json::from_value::<StreamEvent>(raw.clone()) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, raw = %raw, "provider event invalid");
                return Step::Continue;
            }
        };
        self.apply_event(event, handler)
    }

    fn apply_event(&mut self, event: StreamEvent, handler: &dyn TurnHandler) -> Step {
        match event {
            StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                BlockStart::Text => {
                    self.ensure_text_block();
                }
                BlockStart::ToolUse { id, name } => {
                    self.blocks.push(AssistantBlock::ToolUse(ToolUse {
                        id: id.unwrap_or_default(),
                        name: name.unwrap_or_else(|| CREATE_FILE_TOOL.to_string()),
                        input: CreateFileInput::default(),
                    }));
                    self.open_tool = Some(self.blocks.len() - 1);
                    self.input_json.clear();
                }
            },
            StreamEvent::ContentBlockDelta { delta } => match delta {
                Some(Delta::TextDelta { text }) => {
                    let text = text.unwrap_or_default();
                    handler.on_text(&text);
                    self.ensure_text_block();
                    if let Some(AssistantBlock::Text { text: acc }) = self.blocks.last_mut() {
                        acc.push_str(&text);
                    }
                }
                Some(Delta::InputJsonDelta { partial_json }) => {
                    self.input_json
                        .push_str(partial_json.as_deref().unwrap_or_default());
                }
                None => {}
            },
            StreamEvent::ContentBlockStop => {
                if let Some(idx) = self.open_tool.take() {
                    let parsed = CreateFileInput::from_json_fragments(&self.input_json);
                    self.input_json.clear();
                    if let Some(AssistantBlock::ToolUse(tool)) = self.blocks.get_mut(idx) {
                        if let Some(input) = parsed {
                            tool.input = input;
                        }
                        handler.on_tool(tool.clone());
                    }
                }
            }
            StreamEvent::MessageStop => {
                handler.on_status(status_map("ai_typing", false));
                handler.on_end(std::mem::take(&mut self.blocks));
                return Step::Finished;
            }
            StreamEvent::Error { error } => {
                handler.on_status(status_map("ai_typing", false));
                handler.on_error(ProviderError::Stream {
                    kind: error.kind,
                    message: error.message,
                });
                return Step::Failed;
            }
            StreamEvent::Other => {}
        }
        Step::Continue
    }

    /// Open a text block unless the last block already is one, so
    /// adjacent text runs merge.
    fn ensure_text_block(&mut self) {
        if !matches!(self.blocks.last(), Some(AssistantBlock::Text { .. })) {
            self.blocks.push(AssistantBlock::Text {
                text: String::new(),
            });
        }
    }
}

// ── Provider ────────────────────────────────────────────────

/// Provider that talks to the Anthropic Messages API.
pub struct AnthropicProvider {
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    client: Client,
}

impl AnthropicProvider {
    /// Create a provider with explicit configuration (useful for tests
    /// or non-default endpoints).
    pub fn with_config(
        api_key: String,
        endpoint: String,
        model: String,
        max_tokens: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            endpoint,
            model,
            max_tokens,
            client,
        })
    }

    /// The JSON body sent for a turn.
    pub fn request_body(&self, messages: &[Message]) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": messages,
            "tools": create_file_tool_schema(),
            "tool_choice": {"type": "auto", "disable_parallel_tool_use": true},
            "stream": true,
        })
    }

    async fn run(&self, messages: &[Message], handler: &dyn TurnHandler) -> Result<(), ProviderError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(messages))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut decoder = SseDecoder::new();
        let mut assembler = BlockAssembler::new();
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for record in decoder.push(&chunk) {
                match assembler.apply(record, handler) {
                    Step::Continue => {}
                    Step::Finished | Step::Failed => return Ok(()),
                }
            }
        }
        for record in decoder.finish() {
            match assembler.apply(record, handler) {
                Step::Continue => {}
                Step::Finished | Step::Failed => return Ok(()),
            }
        }
        Err(ProviderError::Incomplete)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn stream_turn(&self, messages: &[Message], handler: &dyn TurnHandler) {
        let started = Instant::now();
        handler.on_status(status_map("ai_typing", true));
        debug!(messages = messages.len(), model = %self.model, "provider turn starting");
        if let Err(e) = self.run(messages, handler).await {
            handler.on_status(status_map("ai_typing", false));
            handler.on_error(e);
        }
        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "provider stream finished"
        );
    }
}
