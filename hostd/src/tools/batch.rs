use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tether_protocol::{ErrorCode, limits};
use tokio::sync::Semaphore;

use super::{ToolContext, ToolKind, execute};
use crate::errors::ToolError;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCall {
    pub tool: String,
    #[serde(default, alias = "args")]
    pub parameters: Map<String, Value>,
    #[serde(default, rename = "timeoutMs", alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
}

/// Runs a list of tool calls under a bounded worker pool. Every call gets an
/// entry in the result, in input order: overflow entries and nested batches
/// fail individually without sinking the rest, and one call timing out never
/// cancels its siblings.
pub async fn run(args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError> {
    let calls_val = args
        .get("calls")
        .ok_or_else(|| ToolError::validation("missing required argument: calls"))?;
    let calls: Vec<BatchCall> = serde_json::from_value(calls_val.clone())
        .map_err(|e| ToolError::validation(format!("invalid calls list: {e}")))?;
    if calls.is_empty() {
        return Err(ToolError::validation("calls must not be empty"));
    }

    let pool = Arc::new(Semaphore::new(limits::BATCH_CONCURRENCY));
    let shared = Arc::new(ctx.clone());

    let mut handles = Vec::with_capacity(calls.len());
    for (idx, call) in calls.into_iter().enumerate() {
        let pool = pool.clone();
        let ctx = shared.clone();
        handles.push(tokio::spawn(async move {
            let started = Instant::now();
            if idx >= limits::BATCH_MAX_CALLS {
                return entry_err(
                    &call.tool,
                    ErrorCode::ValidationError,
                    format!(
                        "batch maximum of {} calls exceeded",
                        limits::BATCH_MAX_CALLS
                    ),
                    started,
                );
            }
            let Some(kind) = ToolKind::parse(&call.tool) else {
                return entry_err(
                    &call.tool,
                    ErrorCode::UnknownTool,
                    format!("unknown tool: {}", call.tool),
                    started,
                );
            };
            if kind == ToolKind::Batch {
                return entry_err(
                    &call.tool,
                    ErrorCode::ValidationError,
                    "batch is not allowed in batch calls",
                    started,
                );
            }

            let _permit = pool.acquire_owned().await.expect("batch pool closed");
            // A call may tighten its budget, never extend it past the
            // tool's own cap.
            let budget = call
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| kind.timeout())
                .min(kind.timeout());
            let fut: BoxFuture<'_, Result<Value, ToolError>> =
                Box::pin(execute(kind, &call.parameters, &ctx));
            match tokio::time::timeout(budget, fut).await {
                Ok(Ok(result)) => {
                    // A call succeeds unless its result says otherwise.
                    let success = result
                        .get("success")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    json!({
                        "tool": call.tool,
                        "success": success,
                        "result": result,
                        "durationMs": elapsed_ms(started),
                    })
                }
                Ok(Err(err)) => entry_err(&call.tool, err.code, err.message, started),
                Err(_) => entry_err(
                    &call.tool,
                    ErrorCode::ToolTimeout,
                    format!("tool call exceeded {}ms", budget.as_millis()),
                    started,
                ),
            }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(entry) => results.push(entry),
            Err(err) => results.push(json!({
                "tool": "",
                "success": false,
                "error": format!("batch worker failed: {err}"),
                "errorCode": ErrorCode::Internal.as_str(),
                "durationMs": 0,
            })),
        }
    }

    let successful = results.iter().filter(|r| r["success"] == true).count();
    let failed = results.len() - successful;
    Ok(json!({
        "success": failed == 0,
        "totalCalls": results.len(),
        "successful": successful,
        "failed": failed,
        "results": results,
    }))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn entry_err(tool: &str, code: ErrorCode, message: impl Into<String>, started: Instant) -> Value {
    json!({
        "tool": tool,
        "success": false,
        "error": message.into(),
        "errorCode": code.as_str(),
        "durationMs": elapsed_ms(started),
    })
}
