use std::path::{Component, Path, PathBuf};

use tether_protocol::ErrorCode;

use crate::errors::ToolError;

fn screen_relative(rel: &str) -> Result<(), ToolError> {
    if rel.trim().is_empty() {
        return Err(ToolError::validation("missing path"));
    }
    let p = Path::new(rel);
    if p.is_absolute() {
        return Err(ToolError::access_denied(
            "path must be relative to the project root",
        ));
    }
    for c in p.components() {
        match c {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(ToolError::access_denied(
                    "path traverses outside the project root",
                ));
            }
            _ => return Err(ToolError::access_denied("invalid path")),
        }
    }
    Ok(())
}

/// Resolve `rel` against `root` and prove containment. Symlinks are resolved
/// before the check, so a link inside the project pointing outside is
/// rejected. The target must exist.
pub fn resolve(root: &Path, rel: &str) -> Result<PathBuf, ToolError> {
    screen_relative(rel)?;

    let root_can = std::fs::canonicalize(root)
        .map_err(|e| ToolError::access_denied(format!("bad project root: {e}")))?;
    let joined = root_can.join(rel);
    let joined_can = joined.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ToolError::new(ErrorCode::FileNotFound, format!("no such path: {rel}"))
        }
        _ => ToolError::access_denied(format!("bad path: {e}")),
    })?;
    if joined_can != root_can && !joined_can.starts_with(&root_can) {
        return Err(ToolError::access_denied("path escapes the project root"));
    }
    Ok(joined_can)
}

/// Like [`resolve`] but for targets that may not exist yet: the nearest
/// existing ancestor is canonicalized and checked instead, and the missing
/// suffix is re-appended. Used by tools that create files.
pub fn resolve_for_create(root: &Path, rel: &str) -> Result<PathBuf, ToolError> {
    screen_relative(rel)?;

    let root_can = std::fs::canonicalize(root)
        .map_err(|e| ToolError::access_denied(format!("bad project root: {e}")))?;
    let joined = root_can.join(rel);
    if joined.exists() {
        return resolve(root, rel);
    }

    // Walk up to the deepest ancestor that exists.
    let mut existing = root_can.clone();
    let mut missing = Vec::new();
    let mut cursor = joined.as_path();
    loop {
        if cursor.exists() {
            existing = cursor.to_path_buf();
            break;
        }
        let Some(name) = cursor.file_name() else {
            break;
        };
        missing.push(name.to_os_string());
        let Some(parent) = cursor.parent() else {
            break;
        };
        cursor = parent;
    }

    let existing_can = std::fs::canonicalize(&existing)
        .map_err(|e| ToolError::access_denied(format!("bad path: {e}")))?;
    if existing_can != root_can && !existing_can.starts_with(&root_can) {
        return Err(ToolError::access_denied("path escapes the project root"));
    }

    let mut out = existing_can;
    for part in missing.iter().rev() {
        out.push(part);
    }
    Ok(out)
}

/// Mutating tools must run inside a project. No root means no sandbox
/// context, which is always a denial, never a silent fallback to the
/// process cwd.
pub fn require_root(root: Option<&Path>) -> Result<PathBuf, ToolError> {
    match root {
        Some(r) if !r.as_os_str().is_empty() => Ok(r.to_path_buf()),
        _ => Err(ToolError::access_denied(
            "this tool requires a project context",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn x() {}\n").unwrap();
        dir
    }

    #[test]
    fn resolves_nested_file() {
        let dir = project();
        let p = resolve(dir.path(), "src/lib.rs").unwrap();
        assert!(p.ends_with("src/lib.rs"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = project();
        let err = resolve(dir.path(), "../secret.txt").unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }

    #[test]
    fn rejects_absolute_paths() {
        let dir = project();
        let err = resolve(dir.path(), "/etc/passwd").unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }

    #[test]
    fn rejects_traversal_buried_mid_path() {
        let dir = project();
        let err = resolve(dir.path(), "src/../../other").unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let dir = project();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("target.txt"), "x").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("target.txt"),
            dir.path().join("sneaky.txt"),
        )
        .unwrap();

        let err = resolve(dir.path(), "sneaky.txt").unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }

    #[test]
    fn missing_target_is_file_not_found() {
        let dir = project();
        let err = resolve(dir.path(), "src/absent.rs").unwrap_err();
        assert_eq!(err.code, ErrorCode::FileNotFound);
    }

    #[test]
    fn create_resolution_allows_new_nested_targets() {
        let dir = project();
        let p = resolve_for_create(dir.path(), "src/new/deep/mod.rs").unwrap();
        assert!(p.starts_with(dir.path().canonicalize().unwrap()));
        assert!(p.ends_with("src/new/deep/mod.rs"));
    }

    #[test]
    fn create_resolution_still_rejects_traversal() {
        let dir = project();
        let err = resolve_for_create(dir.path(), "../new.txt").unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }

    #[test]
    fn missing_root_denies() {
        let err = require_root(None).unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
        let err = require_root(Some(Path::new(""))).unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }
}
