pub mod batch;
pub mod fs;
pub mod search;
pub mod shell;
pub mod walk;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tether_protocol::limits;
use tether_protocol::redaction::Redactor;

use crate::errors::ToolError;
use crate::sandbox;

/// The full tool surface, closed at compile time. Adding a tool means adding
/// a variant and the match arms below; there is no string-keyed registry to
/// fall out of sync with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadFile,
    EditFile,
    StringReplace,
    DeleteFile,
    Grep,
    Glob,
    ListDirectory,
    RunTerminalCommand,
    Batch,
}

impl ToolKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "readFile" => Some(Self::ReadFile),
            "editFile" => Some(Self::EditFile),
            "stringReplace" | "applyPatch" => Some(Self::StringReplace),
            "deleteFile" => Some(Self::DeleteFile),
            "grep" => Some(Self::Grep),
            "glob" => Some(Self::Glob),
            "listDirectory" => Some(Self::ListDirectory),
            "runTerminalCommand" => Some(Self::RunTerminalCommand),
            "batch" => Some(Self::Batch),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ReadFile => "readFile",
            Self::EditFile => "editFile",
            Self::StringReplace => "stringReplace",
            Self::DeleteFile => "deleteFile",
            Self::Grep => "grep",
            Self::Glob => "glob",
            Self::ListDirectory => "listDirectory",
            Self::RunTerminalCommand => "runTerminalCommand",
            Self::Batch => "batch",
        }
    }

    /// Tools that change the filesystem (or can, via a shell) are refused
    /// without a project root, even if a caller reaches the registry without
    /// going through dispatch.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::EditFile | Self::StringReplace | Self::DeleteFile | Self::RunTerminalCommand
        )
    }

    pub fn timeout(self) -> Duration {
        let ms = match self {
            Self::RunTerminalCommand => limits::TERMINAL_TIMEOUT_MS,
            Self::Batch => limits::BATCH_TIMEOUT_MS,
            _ => limits::DEFAULT_TOOL_TIMEOUT_MS,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Clone)]
pub struct ToolContext {
    /// Sandbox root for this call, when the call carried project context.
    pub root: Option<PathBuf>,
    pub redactor: Arc<Redactor>,
}

impl ToolContext {
    /// Read-only tools fall back to the process cwd when no project context
    /// was supplied.
    fn read_root(&self) -> Result<PathBuf, ToolError> {
        match &self.root {
            Some(r) => Ok(r.clone()),
            None => std::env::current_dir().map_err(|e| ToolError::internal(e.to_string())),
        }
    }

    fn write_root(&self) -> Result<PathBuf, ToolError> {
        sandbox::require_root(self.root.as_deref())
    }
}

pub async fn execute(
    kind: ToolKind,
    args: &Map<String, Value>,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    match kind {
        ToolKind::ReadFile => fs::read_file(args, &ctx.read_root()?).await,
        ToolKind::EditFile => fs::edit_file(args, &ctx.write_root()?).await,
        ToolKind::StringReplace => fs::string_replace(args, &ctx.write_root()?).await,
        ToolKind::DeleteFile => fs::delete_file(args, &ctx.write_root()?).await,
        ToolKind::Grep => search::grep(args, &ctx.read_root()?).await,
        ToolKind::Glob => walk::glob(args, &ctx.read_root()?).await,
        ToolKind::ListDirectory => walk::list_directory(args, &ctx.read_root()?).await,
        ToolKind::RunTerminalCommand => shell::run(args, &ctx.write_root()?, &ctx.redactor).await,
        ToolKind::Batch => batch::run(args, ctx).await,
    }
}

// Argument plumbing. Keys are accepted in snake_case with the camelCase
// spelling as a fallback, since callers have historically sent both.

pub(crate) fn arg_str<'a>(args: &'a Map<String, Value>, keys: &[&str]) -> Result<&'a str, ToolError> {
    arg_str_opt(args, keys).ok_or_else(|| {
        ToolError::validation(format!("missing required argument: {}", keys[0]))
    })
}

pub(crate) fn arg_str_opt<'a>(args: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| args.get(*k).and_then(Value::as_str))
}

pub(crate) fn arg_bool(args: &Map<String, Value>, keys: &[&str], default: bool) -> bool {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_bool))
        .unwrap_or(default)
}

pub(crate) fn arg_u64_opt(args: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| args.get(*k).and_then(Value::as_u64))
}

#[cfg(test)]
pub(crate) fn test_context(root: Option<PathBuf>) -> ToolContext {
    ToolContext {
        root,
        redactor: Arc::new(Redactor::new(&[]).expect("default redactor")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::ErrorCode;

    #[test]
    fn parses_wire_names_and_aliases() {
        assert_eq!(ToolKind::parse("readFile"), Some(ToolKind::ReadFile));
        assert_eq!(ToolKind::parse("applyPatch"), Some(ToolKind::StringReplace));
        assert_eq!(
            ToolKind::parse("stringReplace"),
            Some(ToolKind::StringReplace)
        );
        assert_eq!(ToolKind::parse("bash"), None);
    }

    #[test]
    fn mutating_set_covers_write_paths() {
        assert!(ToolKind::EditFile.is_mutating());
        assert!(ToolKind::DeleteFile.is_mutating());
        assert!(ToolKind::RunTerminalCommand.is_mutating());
        assert!(!ToolKind::ReadFile.is_mutating());
        assert!(!ToolKind::Grep.is_mutating());
    }

    #[tokio::test]
    async fn mutating_tools_require_project_context() {
        let ctx = test_context(None);
        let mut args = Map::new();
        args.insert("path".into(), Value::String("a.txt".into()));
        args.insert("content".into(), Value::String("x".into()));
        let err = execute(ToolKind::EditFile, &args, &ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
    }
}
