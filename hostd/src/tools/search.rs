use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tether_protocol::{ErrorCode, limits};
use tokio::process::Command;

use super::walk::IGNORED_DIRS;
use super::{arg_bool, arg_str, arg_str_opt};
use crate::errors::ToolError;
use crate::sandbox;

/// Text search backed by ripgrep. Output is bounded three ways: total match
/// count, total bytes, and per-line length. The subprocess is killed if it
/// outlives its budget.
pub async fn grep(args: &Map<String, Value>, root: &Path) -> Result<Value, ToolError> {
    let pattern = arg_str(args, &["pattern", "q", "query"])?;
    if pattern.trim().is_empty() {
        return Err(ToolError::validation("search pattern must not be empty"));
    }
    let case_insensitive = arg_bool(args, &["case_insensitive", "caseInsensitive"], false);

    let mut cmd = Command::new("rg");
    cmd.current_dir(root)
        .args(["--line-number", "--column", "--no-heading", "--color", "never"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if case_insensitive {
        cmd.arg("-i");
    }
    for dir in IGNORED_DIRS {
        cmd.arg("-g").arg(format!("!{dir}/**"));
    }
    cmd.arg("--").arg(pattern);
    if let Some(rel) = arg_str_opt(args, &["path"]) {
        cmd.arg(sandbox::resolve(root, rel)?);
    }

    let child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ToolError::new(ErrorCode::GrepExecError, "ripgrep (rg) is not installed")
        }
        _ => ToolError::new(ErrorCode::GrepExecError, e.to_string()),
    })?;

    let budget = Duration::from_millis(limits::GREP_TIMEOUT_MS);
    // kill_on_drop reaps the subprocess when the timed-out future is dropped.
    let out = match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(ToolError::new(ErrorCode::GrepExecError, e.to_string())),
        Err(_) => {
            return Err(ToolError::new(
                ErrorCode::Timeout,
                format!("search exceeded {}ms", budget.as_millis()),
            ));
        }
    };

    // rg exits 1 for "no matches", which is a valid empty result.
    if !out.status.success() && out.status.code() != Some(1) {
        let err = String::from_utf8_lossy(&out.stderr).trim().to_string();
        return Err(ToolError::new(ErrorCode::GrepExecError, err));
    }

    let stdout = String::from_utf8_lossy(&out.stdout);
    let mut matches = Vec::new();
    let mut byte_budget = limits::GREP_MAX_OUTPUT_BYTES;
    let mut truncated = false;
    for line in stdout.lines() {
        if matches.len() >= limits::GREP_MAX_MATCHES {
            truncated = true;
            break;
        }
        let Some((path, rest)) = line.split_once(':') else {
            continue;
        };
        let Some((line_no, rest)) = rest.split_once(':') else {
            continue;
        };
        let Some((col_no, text)) = rest.split_once(':') else {
            continue;
        };
        let text = truncate_line(text, limits::GREP_MAX_LINE_CHARS);
        if byte_budget < path.len() + text.len() {
            truncated = true;
            break;
        }
        byte_budget -= path.len() + text.len();
        matches.push(json!({
            "path": path,
            "line": line_no.parse::<i64>().unwrap_or(0),
            "column": col_no.parse::<i64>().unwrap_or(0),
            "text": text,
        }));
    }

    Ok(json!({ "matches": matches, "truncated": truncated }))
}

fn truncate_line(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
