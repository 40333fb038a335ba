use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use serde_json::{Map, Value, json};
use tether_protocol::limits;

use super::{arg_bool, arg_str, arg_str_opt, arg_u64_opt};
use crate::errors::ToolError;
use crate::sandbox;

/// Directory names never descended into unless the caller asks. Dependency
/// caches, VCS metadata, and build output dominate walk time and are noise
/// to an agent.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".venv",
    "venv",
    "__pycache__",
    ".cache",
    "vendor",
];

pub struct WalkEntry {
    pub rel: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// Iterative breadth-first walk over an explicit queue. Depth and entry
/// count are both bounded; entries within a directory come back sorted so
/// output is stable across runs.
pub fn walk_tree(
    start: &Path,
    max_depth: usize,
    max_entries: usize,
    skip_ignored: bool,
) -> (Vec<WalkEntry>, bool) {
    let mut out = Vec::new();
    let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
    queue.push_back((start.to_path_buf(), 0));

    while let Some((dir, depth)) = queue.pop_front() {
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = read_dir.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if out.len() >= max_entries {
                return (out, true);
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let is_dir = meta.is_dir();
            if is_dir && skip_ignored && IGNORED_DIRS.contains(&name.as_str()) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(start)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or(name);
            out.push(WalkEntry {
                rel,
                is_dir,
                size: meta.is_file().then(|| meta.len()),
            });
            if is_dir && depth + 1 < max_depth {
                queue.push_back((entry.path(), depth + 1));
            }
        }
    }
    (out, false)
}

/// File listing used by the workspace-context RPC: relative file paths only,
/// capped harder than the listing tool.
pub fn context_files(cwd: &Path, max_files: usize) -> (Vec<String>, bool) {
    let (entries, truncated) = walk_tree(cwd, limits::WALK_MAX_DEPTH, max_files * 4, true);
    let mut files: Vec<String> = entries
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.rel)
        .collect();
    let cut = files.len() > max_files;
    files.truncate(max_files);
    (files, truncated || cut)
}

pub async fn list_directory(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let rel = arg_str_opt(args, &["path"]).unwrap_or(".").to_string();
    let depth = arg_u64_opt(args, &["depth"])
        .map(|d| d as usize)
        .unwrap_or(1)
        .clamp(1, limits::WALK_MAX_DEPTH);
    let include_ignored = arg_bool(args, &["include_ignored", "includeIgnored"], false);

    let start = sandbox::resolve(root, &rel)?;
    if !start.is_dir() {
        return Err(ToolError::validation("path is not a directory"));
    }

    let (entries, truncated) = tokio::task::spawn_blocking(move || {
        walk_tree(&start, depth, limits::WALK_MAX_ENTRIES, !include_ignored)
    })
    .await
    .map_err(|e| ToolError::internal(e.to_string()))?;

    let listed: Vec<Value> = entries
        .iter()
        .map(|e| json!({ "path": e.rel, "is_dir": e.is_dir, "size_bytes": e.size }))
        .collect();
    Ok(json!({ "path": rel, "entries": listed, "truncated": truncated }))
}

pub async fn glob(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let pattern = arg_str(args, &["pattern"])?;
    let rel = arg_str_opt(args, &["path"]).unwrap_or(".").to_string();

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|e| ToolError::validation(format!("invalid glob pattern: {e}")))?
        .compile_matcher();

    let start = sandbox::resolve(root, &rel)?;
    let (entries, walk_truncated) = tokio::task::spawn_blocking(move || {
        walk_tree(&start, limits::WALK_MAX_DEPTH, limits::WALK_MAX_ENTRIES, true)
    })
    .await
    .map_err(|e| ToolError::internal(e.to_string()))?;

    let matches: Vec<String> = entries
        .into_iter()
        .filter(|e| !e.is_dir && matcher.is_match(&e.rel))
        .map(|e| e.rel)
        .collect();

    Ok(json!({
        "pattern": pattern,
        "matches": matches,
        "truncated": walk_truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "x").unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "y").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "z").unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        dir
    }

    #[test]
    fn walk_skips_ignored_directories() {
        let dir = tree();
        let (entries, truncated) = walk_tree(dir.path(), 5, 100, true);
        assert!(!truncated);
        assert!(entries.iter().all(|e| !e.rel.starts_with("node_modules")));
        assert!(entries.iter().any(|e| e.rel == "src/nested/deep.rs"));
    }

    #[test]
    fn walk_respects_depth_bound() {
        let dir = tree();
        let (entries, _) = walk_tree(dir.path(), 1, 100, true);
        assert!(entries.iter().any(|e| e.rel == "src"));
        assert!(entries.iter().all(|e| !e.rel.contains('/')));
    }

    #[test]
    fn walk_caps_entry_count() {
        let dir = tree();
        let (entries, truncated) = walk_tree(dir.path(), 5, 2, true);
        assert_eq!(entries.len(), 2);
        assert!(truncated);
    }

    #[tokio::test]
    async fn glob_matches_relative_paths() {
        let dir = tree();
        let mut args = Map::new();
        args.insert("pattern".into(), json!("**/*.rs"));
        let res = glob(&args, dir.path()).await.unwrap();
        let matches: Vec<String> = res["matches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(matches.contains(&"src/lib.rs".to_string()));
        assert!(matches.contains(&"src/nested/deep.rs".to_string()));
        assert!(!matches.iter().any(|m| m.ends_with(".md")));
    }

    #[tokio::test]
    async fn list_directory_defaults_to_shallow() {
        let dir = tree();
        let res = list_directory(&Map::new(), dir.path()).await.unwrap();
        let entries = res["entries"].as_array().unwrap();
        assert!(entries.iter().any(|e| e["path"] == "README.md"));
        assert!(entries.iter().all(|e| !e["path"].as_str().unwrap().contains('/')));
    }
}
