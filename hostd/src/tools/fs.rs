use std::path::Path;

use serde_json::{Map, Value, json};
use similar::ChangeTag;
use tether_protocol::{ErrorCode, limits};

use super::{arg_bool, arg_str};
use crate::errors::ToolError;
use crate::patch::{self, PatchError};
use crate::sandbox;

pub async fn read_file(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let rel = arg_str(args, &["path"])?;
    let path = sandbox::resolve(root, rel)?;
    let meta = tokio::fs::metadata(&path).await?;
    if meta.is_dir() {
        return Err(ToolError::validation("path is a directory"));
    }

    let bytes = tokio::fs::read(&path).await?;
    let truncated = bytes.len() > limits::READ_MAX_BYTES;
    let slice = if truncated {
        &bytes[..limits::READ_MAX_BYTES]
    } else {
        &bytes[..]
    };
    let content = String::from_utf8_lossy(slice).to_string();
    Ok(json!({ "path": rel, "content": content, "truncated": truncated }))
}

/// Full-content write. Creating a file is fine; overwriting with identical
/// bytes is a no-op rather than a spurious mtime bump.
pub async fn edit_file(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let rel = arg_str(args, &["path"])?;
    let content = arg_str(args, &["content"])?;
    let path = sandbox::resolve_for_create(root, rel)?;
    if path.is_dir() {
        return Err(ToolError::validation("path is a directory"));
    }

    let existing = match tokio::fs::read(&path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if let Some(old) = &existing {
        if old == content {
            return Ok(json!({
                "success": true,
                "isNewFile": false,
                "unchanged": true,
                "old_string": old,
                "new_string": content,
                "linesAdded": 0,
                "linesRemoved": 0,
            }));
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    write_atomic(&path, content).await?;

    let old = existing.as_deref().unwrap_or("");
    let (added, removed) = line_changes(old, content);
    Ok(json!({
        "success": true,
        "isNewFile": existing.is_none(),
        "unchanged": false,
        "old_string": old,
        "new_string": content,
        "linesAdded": added,
        "linesRemoved": removed,
    }))
}

/// Partial edit routed through the fuzzy matcher. The reported
/// `old_string`/`new_string` are the span actually substituted, which after
/// fuzzy matching may differ from the literal inputs.
pub async fn string_replace(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let rel = arg_str(args, &["path"])?;
    let old = arg_str(args, &["old_string", "oldString"])?;
    let new = arg_str(args, &["new_string", "newString"])?;
    let replace_all = arg_bool(args, &["replace_all", "replaceAll"], false);

    if old.is_empty() {
        return Err(ToolError::validation("old_string must not be empty"));
    }
    if old == new {
        return Err(ToolError::validation(
            "old_string and new_string are identical",
        ));
    }

    let path = sandbox::resolve(root, rel)?;
    let bytes = tokio::fs::read(&path).await?;
    let content = String::from_utf8_lossy(&bytes).to_string();

    let outcome = patch::apply(&content, old, new, replace_all).map_err(|e| match e {
        PatchError::NotFound => ToolError::new(
            ErrorCode::StringNotFound,
            format!("could not find the text to replace in {rel}"),
        ),
        PatchError::NotUnique { count } => ToolError::new(
            ErrorCode::StringNotUnique,
            format!(
                "the text to replace matched {count} locations in {rel}; add surrounding context or set replace_all"
            ),
        ),
    })?;

    write_atomic(&path, &outcome.content).await?;

    let (added, removed) = line_changes(&content, &outcome.content);
    Ok(json!({
        "success": true,
        "isNewFile": false,
        "old_string": outcome.matched,
        "new_string": outcome.replacement,
        "occurrences": outcome.occurrences,
        "linesAdded": added,
        "linesRemoved": removed,
    }))
}

pub async fn delete_file(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let rel = arg_str(args, &["path"])?;
    let recursive = arg_bool(args, &["recursive"], false);
    let path = sandbox::resolve(root, rel)?;

    let meta = tokio::fs::metadata(&path).await?;
    if meta.is_dir() {
        if !recursive {
            return Err(ToolError::validation(
                "path is a directory; pass recursive to delete it",
            ));
        }
        tokio::fs::remove_dir_all(&path).await?;
    } else {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(json!({ "success": true, "path": rel }))
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), ToolError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ToolError::internal(format!("failed to create temp file: {e}")))?;
    tokio::fs::write(tmp.path(), content)
        .await
        .map_err(|e| ToolError::internal(format!("failed to write temp file: {e}")))?;
    tmp.persist(path)
        .map_err(|e| ToolError::internal(format!("failed to persist file: {e}")))?;
    Ok(())
}

fn line_changes(old: &str, new: &str) -> (usize, usize) {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut added = 0;
    let mut removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    (added, removed)
}
