use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tether_protocol::{ErrorCode, Inbound, ToolResult, limits};
use tokio::sync::mpsc;

use crate::errors::ToolError;
use crate::rpc;
use crate::state::AppState;
use crate::tools::{self, ToolContext, ToolKind};

/// Validates inbound frames and fans each accepted message out to its own
/// task. Receipt of further frames is never blocked by a slow handler;
/// callers correlate by id, not arrival order.
pub struct Dispatcher {
    state: Arc<AppState>,
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn dispatch_frame(&self, raw: &str, out: mpsc::Sender<ToolResult>) {
        let msg = match serde_json::from_str::<Inbound>(raw) {
            Ok(msg) => msg,
            Err(err) => {
                // Answer with a correlated error when an id can be salvaged;
                // otherwise the frame is unattributable and gets dropped.
                let salvaged = serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_str).map(String::from));
                match salvaged {
                    Some(id) => {
                        let frame = ToolResult::err(
                            id,
                            ErrorCode::ValidationError,
                            format!("malformed message: {err}"),
                        );
                        tokio::spawn(async move {
                            let _ = out.send(frame).await;
                        });
                    }
                    None => {
                        tracing::warn!(error=%err, "dropping malformed frame without id");
                    }
                }
                return;
            }
        };

        let state = self.state.clone();
        tokio::spawn(async move {
            let id = msg.id().to_string();
            let outcome = AssertUnwindSafe(handle_message(state, msg))
                .catch_unwind()
                .await;
            let frame = match outcome {
                Ok(Ok(value)) => ToolResult::ok(&id, value),
                Ok(Err(err)) => ToolResult::err(&id, err.code, err.message),
                Err(_) => ToolResult::err(&id, ErrorCode::Internal, "handler panicked"),
            };
            if out.send(frame).await.is_err() {
                tracing::debug!(id, "connection closed before result delivery");
            }
        });
    }
}

async fn handle_message(state: Arc<AppState>, msg: Inbound) -> Result<Value, ToolError> {
    match msg {
        Inbound::ToolCall(call) => {
            let Some(kind) = ToolKind::parse(&call.tool) else {
                return Err(ToolError::new(
                    ErrorCode::UnknownTool,
                    format!("unknown tool: {}", call.tool),
                ));
            };
            let root =
                resolve_root(&state, call.project_id.as_deref(), call.project_cwd.as_deref())
                    .await?;
            let ctx = ToolContext {
                root,
                redactor: state.redactor.clone(),
            };
            let budget = kind.timeout();
            match tokio::time::timeout(budget, tools::execute(kind, &call.args, &ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::new(
                    ErrorCode::ToolTimeout,
                    format!("{} exceeded {}ms", call.tool, budget.as_millis()),
                )),
            }
        }
        Inbound::RpcCall(call) => {
            let budget = if call.method.starts_with("snapshot_") {
                Duration::from_millis(limits::SNAPSHOT_TIMEOUT_MS)
            } else {
                Duration::from_millis(limits::RPC_TIMEOUT_MS)
            };
            match tokio::time::timeout(budget, rpc::handle(&call.method, &call.args, &state)).await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::new(
                    ErrorCode::Timeout,
                    format!("{} exceeded {}ms", call.method, budget.as_millis()),
                )),
            }
        }
    }
}

/// A project id outranks an inline cwd; either yields the sandbox root. No
/// context at all is allowed here — the tool layer denies mutating tools
/// without a root.
async fn resolve_root(
    state: &Arc<AppState>,
    project_id: Option<&str>,
    project_cwd: Option<&str>,
) -> Result<Option<PathBuf>, ToolError> {
    if let Some(id) = project_id {
        return match state.projects.get(id).await {
            Some(project) => Ok(Some(PathBuf::from(project.cwd))),
            None => Err(ToolError::access_denied(format!("unknown project: {id}"))),
        };
    }
    if let Some(cwd) = project_cwd {
        if cwd.trim().is_empty() {
            return Ok(None);
        }
        let canonical = std::fs::canonicalize(cwd)
            .map_err(|e| ToolError::access_denied(format!("bad project cwd: {e}")))?;
        return Ok(Some(canonical));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use serde_json::json;

    async fn roundtrip(raw: &str) -> Option<ToolResult> {
        let (state, _data) = test_state();
        let dispatcher = Dispatcher::new(state);
        let (tx, mut rx) = mpsc::channel(8);
        dispatcher.dispatch_frame(raw, tx);
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn malformed_frame_with_id_gets_a_validation_error() {
        let frame = roundtrip(r#"{"type":"tool_call","id":"m1","tool":42}"#)
            .await
            .unwrap();
        assert_eq!(frame.id, "m1");
        assert_eq!(frame.error_code, Some(ErrorCode::ValidationError));
        assert!(frame.result.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_without_id_is_dropped() {
        let (state, _data) = test_state();
        let dispatcher = Dispatcher::new(state);
        let (tx, mut rx) = mpsc::channel(8);
        dispatcher.dispatch_frame("not json at all", tx);
        drop(dispatcher);
        // The sender side is dropped without a reply having been queued.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_by_code() {
        let frame = roundtrip(r#"{"type":"tool_call","id":"t1","tool":"levitate","args":{}}"#)
            .await
            .unwrap();
        assert_eq!(frame.error_code, Some(ErrorCode::UnknownTool));
    }

    #[tokio::test]
    async fn tool_call_executes_against_the_supplied_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        let raw = json!({
            "type": "tool_call",
            "id": "r1",
            "tool": "readFile",
            "args": { "path": "hello.txt" },
            "projectCwd": dir.path().to_str().unwrap(),
        })
        .to_string();

        let frame = roundtrip(&raw).await.unwrap();
        assert_eq!(frame.id, "r1");
        let result = frame.result.unwrap();
        assert_eq!(result["content"], "hi");
    }

    #[tokio::test]
    async fn unknown_project_id_is_denied() {
        let raw = r#"{"type":"tool_call","id":"p1","tool":"readFile","args":{"path":"x"},"projectId":"ghost"}"#;
        let frame = roundtrip(raw).await.unwrap();
        assert_eq!(frame.error_code, Some(ErrorCode::AccessDenied));
    }

    #[tokio::test]
    async fn rpc_call_routes_to_the_method_map() {
        let frame = roundtrip(r#"{"type":"rpc_call","id":"s1","method":"status","args":{}}"#)
            .await
            .unwrap();
        let result = frame.result.unwrap();
        assert_eq!(result["projects"], 0);
    }
}
