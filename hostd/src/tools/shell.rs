use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use regex::Regex;
use serde_json::{Map, Value, json};
use tether_protocol::redaction::Redactor;
use tether_protocol::{ErrorCode, limits};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use super::{arg_str, arg_u64_opt};
use crate::errors::ToolError;

/// Commands that are never run, regardless of sandbox root. The list targets
/// machine-destroying operations, not ordinary project mutation.
const DENY_PATTERNS: &[&str] = &[
    r"(?i)\brm\s+(-[a-z]+\s+)*(/|~)(/\*)?\s*$",
    r"(?i)\brm\s+.*--no-preserve-root",
    r"(?i)\bmkfs(\.[a-z0-9]+)?\b",
    r"(?i)\bdd\s+[^|;&]*\bof=/dev/",
    r":\(\)\s*\{\s*:\|:&\s*\}\s*;\s*:",
    r"(?i)\b(shutdown|reboot|poweroff)\b",
    r"(?i)>\s*/dev/sd[a-z]",
    r"(?i)\bchmod\s+(-[a-z]+\s+)*777\s+/\s*$",
];

fn denylist() -> &'static Vec<Regex> {
    static DENY: OnceLock<Vec<Regex>> = OnceLock::new();
    DENY.get_or_init(|| {
        DENY_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("denylist pattern"))
            .collect()
    })
}

pub fn blocked_by(command: &str) -> Option<&'static str> {
    denylist()
        .iter()
        .zip(DENY_PATTERNS)
        .find(|(re, _)| re.is_match(command))
        .map(|(_, pat)| *pat)
}

/// One-shot `bash -lc` under the project root. Non-zero exit is reported in
/// the result, not as a protocol error; only spawn failures, blocked
/// commands, and timeouts fail the call.
pub async fn run(
    args: &Map<String, Value>,
    root: &Path,
    redactor: &Redactor,
) -> Result<Value, ToolError> {
    let command = arg_str(args, &["command", "cmd"])?;
    if command.trim().is_empty() {
        return Err(ToolError::validation("command must not be empty"));
    }
    if blocked_by(command).is_some() {
        return Err(ToolError::new(
            ErrorCode::BlockedCommand,
            "command matches the destructive-command denylist",
        ));
    }

    let timeout_ms = arg_u64_opt(args, &["timeout_ms", "timeoutMs"])
        .unwrap_or(limits::TERMINAL_TIMEOUT_MS)
        .clamp(100, limits::TERMINAL_TIMEOUT_MS);

    let started = Instant::now();
    let mut child = Command::new("bash")
        .arg("-lc")
        .arg(command)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ToolError::new(ErrorCode::CommandFailed, format!("failed to spawn bash: {e}"))
        })?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| ToolError::new(ErrorCode::CommandFailed, e.to_string()))?
        }
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
            terminate(&mut child).await;
            return Err(ToolError::new(
                ErrorCode::Timeout,
                format!("command timed out after {timeout_ms}ms"),
            ));
        }
    };

    let stdout_raw = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).to_string();
    let stderr_raw = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).to_string();
    let (stdout, stdout_cut) = tail_truncate(&stdout_raw, limits::SHELL_MAX_OUTPUT_CHARS);
    let (stderr, stderr_cut) = tail_truncate(&stderr_raw, limits::SHELL_MAX_OUTPUT_CHARS);

    Ok(json!({
        "exitCode": status.code().unwrap_or(-1),
        "stdout": redactor.redact(&stdout),
        "stderr": redactor.redact(&stderr),
        "durationMs": started.elapsed().as_millis() as u64,
        "truncated": stdout_cut || stderr_cut,
    }))
}

/// SIGTERM with a short grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Keep the tail: when output overflows, the end of a build log or test run
/// is worth more than the beginning.
fn tail_truncate(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    (s[start..].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn redactor() -> Arc<Redactor> {
        Arc::new(Redactor::new(&[]).unwrap())
    }

    #[test]
    fn denylist_blocks_catastrophic_commands() {
        assert!(blocked_by("rm -rf /").is_some());
        assert!(blocked_by("rm -rf ~").is_some());
        assert!(blocked_by("sudo mkfs.ext4 /dev/sda1").is_some());
        assert!(blocked_by("dd if=/dev/zero of=/dev/sda").is_some());
        assert!(blocked_by(":(){ :|:& };:").is_some());
        assert!(blocked_by("shutdown now").is_some());
    }

    #[test]
    fn denylist_permits_ordinary_project_commands() {
        assert!(blocked_by("cargo build --release").is_none());
        assert!(blocked_by("rm -rf ./target").is_none());
        assert!(blocked_by("rm old_notes.txt").is_none());
        assert!(blocked_by("git status").is_none());
    }

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = Map::new();
        args.insert("command".into(), json!("echo out && echo err >&2 && exit 3"));
        let res = run(&args, dir.path(), &redactor()).await.unwrap();
        assert_eq!(res["exitCode"], 3);
        assert!(res["stdout"].as_str().unwrap().contains("out"));
        assert!(res["stderr"].as_str().unwrap().contains("err"));
    }

    #[tokio::test]
    async fn times_out_and_kills_the_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = Map::new();
        args.insert("command".into(), json!("sleep 30"));
        args.insert("timeout_ms".into(), json!(200));
        let started = Instant::now();
        let err = run(&args, dir.path(), &redactor()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_is_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = Map::new();
        args.insert("command".into(), json!("echo token=super-secret-value"));
        let res = run(&args, dir.path(), &redactor()).await.unwrap();
        assert!(!res["stdout"].as_str().unwrap().contains("super-secret-value"));
    }

    #[test]
    fn tail_truncation_keeps_the_end() {
        let (out, cut) = tail_truncate("abcdef", 3);
        assert_eq!(out, "def");
        assert!(cut);
        let (out, cut) = tail_truncate("abc", 10);
        assert_eq!(out, "abc");
        assert!(!cut);
    }
}
