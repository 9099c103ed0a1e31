//! Conversation history, tool-call and client/server event shapes.
//!
//! History types serialise directly into the provider's `messages`
//! array; event types serialise into the `{ "type", "data" }` frames
//! exchanged with the client over the session socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only tool the model may call.
pub const CREATE_FILE_TOOL: &str = "create_file";

// ── History ─────────────────────────────────────────────────

/// One conversation message, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum Message {
    User(Vec<UserBlock>),
    Assistant(Vec<AssistantBlock>),
}

/// Content produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text { text: String },
    ToolUse(ToolUse),
}

/// Content sent on the user's side of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    Text { text: String },
    ToolResult { tool_use_id: String, content: String },
}

/// A tool invocation emitted by the model.  While it waits for the
/// human's decision it is the session's *pending* tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Provider-assigned id, unique within the session.
    pub id: String,
    pub name: String,
    pub input: CreateFileInput,
}

pub type PendingToolCall = ToolUse;

/// Structured input of the `create_file` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFileInput {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolInputError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool_input_path_required")]
    EmptyPath,
}

impl CreateFileInput {
    /// Parse the accumulated `input_json` fragments of a tool block.
    ///
    /// Returns `None` when the buffer is empty, is not JSON, or does
    /// not satisfy the schema.
    pub fn from_json_fragments(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        let parsed: Self = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "tool input parse failed");
                return None;
            }
        };
        match parsed.validate() {
            Ok(()) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "tool input invalid");
                None
            }
        }
    }

    pub fn validate(&self) -> Result<(), ToolInputError> {
        if self.path.is_empty() {
            return Err(ToolInputError::EmptyPath);
        }
        Ok(())
    }
}

impl ToolUse {
    /// Check the call against the `create_file` schema.
    pub fn validate(&self) -> Result<(), ToolInputError> {
        if self.name != CREATE_FILE_TOOL {
            return Err(ToolInputError::UnknownTool(self.name.clone()));
        }
        self.input.validate()
    }
}

/// JSON schema advertised to the provider for the single tool.
pub fn create_file_tool_schema() -> Value {
    serde_json::json!([{
        "name": CREATE_FILE_TOOL,
        "description": "Create a file in the workspace and fill it in chunks.",
        "input_schema": {
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        }
    }])
}

/// Outcome of an approved or denied tool call, stored in history as
/// the serialised `content` of a `tool_result` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResultPayload {
    Ok { file_path: String, size: u64 },
    Denied,
    Error { error_code: String, message: String },
}

impl ToolResultPayload {
    pub fn error(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_tool_input() -> Self {
        Self::error("invalid_tool_input", "invalid payload received for tool")
    }
}

// ── Client events ───────────────────────────────────────────

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserMessage { text: String },
    ToolApproval { tool_use_id: String, approved: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientEventError {
    #[error("invalid_json")]
    InvalidJson,
    #[error("invalid_payload")]
    InvalidPayload,
}

impl ClientEventError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientEventError::InvalidJson => "invalid_json",
            ClientEventError::InvalidPayload => "invalid_payload",
        }
    }
}

impl ClientEvent {
    /// Decode a raw text frame from the client.
    pub fn parse(raw: &str) -> Result<Self, ClientEventError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| ClientEventError::InvalidJson)?;
        let event: ClientEvent =
            serde_json::from_value(value).map_err(|_| ClientEventError::InvalidPayload)?;
        let empty = match &event {
            ClientEvent::UserMessage { text } => text.is_empty(),
            ClientEvent::ToolApproval { tool_use_id, .. } => tool_use_id.is_empty(),
        };
        if empty {
            return Err(ClientEventError::InvalidPayload);
        }
        Ok(event)
    }
}

// ── Server events ───────────────────────────────────────────

/// Status fields relayed to the client.  Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy: Option<bool>,
}

impl StatusUpdate {
    /// Keep only the allow-listed, correctly typed fields of a raw
    /// status map.  Returns `None` when nothing survives.
    pub fn from_raw(raw: &serde_json::Map<String, Value>) -> Option<Self> {
        let update = StatusUpdate {
            ai_typing: raw.get("ai_typing").and_then(Value::as_bool),
            tool_running: raw.get("tool_running").and_then(Value::as_bool),
            file_path: raw
                .get("file_path")
                .and_then(Value::as_str)
                .map(str::to_string),
            busy: raw.get("busy").and_then(Value::as_bool),
        };
        if update == StatusUpdate::default() {
            None
        } else {
            Some(update)
        }
    }

    pub fn typing(on: bool) -> Self {
        Self {
            ai_typing: Some(on),
            ..Self::default()
        }
    }

    pub fn busy() -> Self {
        Self {
            busy: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Ok,
    Error,
}

/// Events sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionCreated {
        session_id: String,
    },
    StatusUpdate(StatusUpdate),
    AiChunk {
        text: String,
    },
    AssistantMessageCompleted {
        reason: CompletionReason,
    },
    ToolRequest(PendingToolCall),
    ToolChunk {
        chunk: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            detail: None,
        }
    }

    pub fn error_with_detail(message: impl Into<String>, detail: Option<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            detail,
        }
    }
}
