//! The `create_file` executor.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use futures_core::Stream;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{sandbox_path, ToolError};

pub const DEFAULT_CHUNK_SIZE: usize = 120;
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(80);

/// One step of a file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolProgress {
    /// A slice was written; `written` is the running byte total.
    Chunk { chunk: String, written: u64 },
    /// The file is complete and closed.
    Done { file_path: String, size: u64 },
}

pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<ToolProgress, ToolError>> + Send>>;

/// Something that can perform an approved `create_file` call.
///
/// The returned stream is lazy: nothing touches the filesystem until it
/// is polled.  It yields zero or more `Chunk`s followed by one `Done`,
/// or ends with an error.
pub trait FileWriter: Send + Sync {
    fn write(&self, path: &str, content: &str) -> ProgressStream;
}

/// Writes files below a workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceWriter {
    root: PathBuf,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl WorkspaceWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileWriter for WorkspaceWriter {
    fn write(&self, path: &str, content: &str) -> ProgressStream {
        let root = self.root.clone();
        let chunk_size = self.chunk_size;
        let delay = self.chunk_delay;
        let path = path.to_string();
        let content = content.to_string();

        Box::pin(try_stream! {
            tokio::fs::create_dir_all(&root)
                .await
                .map_err(|e| ToolError::Unexpected(format!("workspace unavailable: {e}")))?;
            let resolved = sandbox_path(&root, &path)?;
            if let Some(parent) = resolved.absolute.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::Unexpected(format!("mkdir failed: {e}")))?;
            }
            let mut file = tokio::fs::File::create(&resolved.absolute)
                .await
                .map_err(|e| ToolError::Unexpected(format!("open failed: {e}")))?;

            let mut offset = 0;
            let mut written = 0u64;
            while offset < content.len() {
                let end = slice_end(&content, offset, chunk_size);
                let slice = &content[offset..end];
                file.write_all(slice.as_bytes())
                    .await
                    .map_err(|e| ToolError::WriteFailed(e.to_string()))?;
                offset = end;
                written += slice.len() as u64;
                yield ToolProgress::Chunk { chunk: slice.to_string(), written };
                if offset < content.len() && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            file.flush()
                .await
                .map_err(|e| ToolError::WriteFailed(e.to_string()))?;
            drop(file);

            let file_path = root.join(&resolved.relative).to_string_lossy().into_owned();
            debug!(file_path = %file_path, size = written, "file written");
            yield ToolProgress::Done { file_path, size: written };
        })
    }
}

/// End of the slice starting at `offset`: `chunk_size` bytes, pulled
/// back to a char boundary.  A char wider than the chunk is emitted whole.
fn slice_end(text: &str, offset: usize, chunk_size: usize) -> usize {
    let mut end = (offset + chunk_size).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    if end == offset {
        end = offset + 1;
        while !text.is_char_boundary(end) {
            end += 1;
        }
    }
    end
}
