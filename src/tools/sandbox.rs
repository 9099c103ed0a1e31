//! Workspace path confinement.

use std::path::{Component, Path, PathBuf};

use super::ToolError;

/// A tool path resolved inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Canonical absolute location to write to.
    pub absolute: PathBuf,
    /// Path relative to the workspace root, without `.`/`..` segments.
    pub relative: PathBuf,
}

/// Resolve `raw` against `workspace` and require the result to lie
/// strictly inside it.
///
/// The workspace must already exist.  Resolution is lexical first and
/// then follows symlinks of the longest existing ancestor, so escapes
/// through either `..` or links are rejected.
pub fn sandbox_path(workspace: &Path, raw: &str) -> Result<ResolvedPath, ToolError> {
    if raw.is_empty() || raw.contains('\0') {
        return Err(ToolError::InvalidPath(format!("invalid path: {raw:?}")));
    }

    let root = workspace
        .canonicalize()
        .map_err(|e| ToolError::InvalidPath(format!("workspace canonicalize failed: {e}")))?;

    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize_path(&joined);

    let resolved = canon_or_resolve(&normalized)?;
    let relative = match resolved.strip_prefix(&root) {
        Ok(rel) if rel.components().next().is_some() => rel.to_path_buf(),
        _ => {
            return Err(ToolError::InvalidPath(format!(
                "path escapes workspace: {raw}"
            )))
        }
    };

    Ok(ResolvedPath {
        absolute: resolved,
        relative,
    })
}

/// Drop `.` segments and fold `..` into its parent without touching
/// the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Canonicalize the longest existing prefix of `p` and append the rest.
fn canon_or_resolve(p: &Path) -> Result<PathBuf, ToolError> {
    let invalid = |e: std::io::Error| ToolError::InvalidPath(e.to_string());
    if p.exists() {
        return p.canonicalize().map_err(invalid);
    }
    let mut existing = p.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        let Some(file) = existing.file_name() else {
            return Err(ToolError::InvalidPath(format!(
                "cannot resolve path: {}",
                p.display()
            )));
        };
        tail.push(file.to_os_string());
        existing = match existing.parent() {
            Some(parent) => parent.to_path_buf(),
            None => {
                return Err(ToolError::InvalidPath(format!(
                    "cannot resolve path: {}",
                    p.display()
                )))
            }
        };
    }
    let mut resolved = existing.canonicalize().map_err(invalid)?;
    for component in tail.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}
