//! Tool execution.
//!
//! The only tool is `create_file`, which writes content into the
//! workspace in fixed-size slices and reports progress as a stream.

pub mod create_file;
pub mod sandbox;

pub use create_file::{FileWriter, ProgressStream, ToolProgress, WorkspaceWriter};
pub use sandbox::{sandbox_path, ResolvedPath};

/// Typed failure of a tool run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The target resolves outside the workspace or cannot be resolved.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Writing to or flushing the open file failed.
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("tool failed: {0}")]
    Unexpected(String),
}

impl ToolError {
    /// Stable error code recorded in the tool result.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::InvalidPath(_) => "invalid_path",
            ToolError::WriteFailed(_) => "write_failed",
            ToolError::Unexpected(_) => "tool_error",
        }
    }
}
