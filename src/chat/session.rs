//! Per-connection conversation state.
//!
//! `ChatSession` performs no validation; the orchestrator owns it and
//! is responsible for every invariant.

use serde::Serialize;

use super::types::{AssistantBlock, Message, PendingToolCall, ToolResultPayload, UserBlock};

#[derive(Debug, Clone)]
pub struct ChatSession {
    id: String,
    history: Vec<Message>,
    pending_tool: Option<PendingToolCall>,
    /// A model turn (or an approved tool run feeding one) is in flight.
    pub active: bool,
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct PublicState<'a> {
    pub session_id: &'a str,
    pub history: &'a [Message],
    pub pending_tool: Option<&'a PendingToolCall>,
    pub active: bool,
    pub updated_at: String,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            pending_tool: None,
            active: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn pending_tool(&self) -> Option<&PendingToolCall> {
        self.pending_tool.as_ref()
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.history
            .push(Message::User(vec![UserBlock::Text { text: text.into() }]));
    }

    pub fn add_assistant_blocks(&mut self, blocks: Vec<AssistantBlock>) {
        self.history.push(Message::Assistant(blocks));
    }

    /// Append a user message holding a single `tool_result` block whose
    /// content is the JSON-serialised payload.
    pub fn record_tool_result(&mut self, tool_use_id: impl Into<String>, result: &ToolResultPayload) {
        let content = match serde_json::to_string(result) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "tool result serialisation failed");
                r#"{"status":"error","error_code":"tool_error","message":"serialisation failed"}"#
                    .to_string()
            }
        };
        self.history.push(Message::User(vec![UserBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
        }]));
    }

    pub fn set_pending_tool(&mut self, tool: PendingToolCall) {
        self.pending_tool = Some(tool);
    }

    pub fn clear_pending_tool(&mut self) {
        self.pending_tool = None;
    }

    pub fn take_pending_tool(&mut self) -> Option<PendingToolCall> {
        self.pending_tool.take()
    }

    pub fn public_state(&self) -> PublicState<'_> {
        PublicState {
            session_id: &self.id,
            history: &self.history,
            pending_tool: self.pending_tool.as_ref(),
            active: self.active,
            updated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}
