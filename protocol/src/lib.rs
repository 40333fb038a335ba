use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod error;
pub mod limits;
pub mod redaction;

pub use error::ErrorCode;

/// Everything the remote side may send. Frames that do not parse into one of
/// these two variants are rejected before any handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "tool_call")]
    ToolCall(ToolCall),
    #[serde(rename = "rpc_call")]
    RpcCall(RpcCall),
}

impl Inbound {
    pub fn id(&self) -> &str {
        match self {
            Inbound::ToolCall(c) => &c.id,
            Inbound::RpcCall(c) => &c.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(rename = "projectCwd", skip_serializing_if = "Option::is_none")]
    pub project_cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCall {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The single response frame shape. Exactly one of `result`/`error` is set;
/// `error_code` accompanies `error` so the remote side can branch on a code
/// instead of scraping the message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub r#type: String,
    pub id: String,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            r#type: "tool_result".into(),
            id: id.into(),
            ts: Utc::now(),
            result: Some(result),
            error: None,
            error_code: None,
        }
    }

    pub fn err(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            r#type: "tool_result".into(),
            id: id.into(),
            ts: Utc::now(),
            result: None,
            error: Some(message.into()),
            error_code: Some(code),
        }
    }
}

/// A registered project. `cwd` is absolute and canonical; it is the sandbox
/// root for every tool call that carries this project's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub cwd: String,
    pub name: String,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_round_trips_with_camel_case_fields() {
        let raw = r#"{"type":"tool_call","id":"c1","tool":"readFile","args":{"path":"a.txt"},"projectCwd":"/p"}"#;
        let parsed: Inbound = serde_json::from_str(raw).unwrap();
        let Inbound::ToolCall(call) = &parsed else {
            panic!("expected tool_call");
        };
        assert_eq!(call.id, "c1");
        assert_eq!(call.tool, "readFile");
        assert_eq!(call.project_cwd.as_deref(), Some("/p"));
        assert!(call.project_id.is_none());

        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["type"], "tool_call");
        assert_eq!(back["projectCwd"], "/p");
        assert!(back.get("projectId").is_none());
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let raw = r#"{"type":"event","id":"x","data":{}}"#;
        assert!(serde_json::from_str::<Inbound>(raw).is_err());
    }

    #[test]
    fn rpc_call_defaults_missing_args() {
        let raw = r#"{"type":"rpc_call","id":"r1","method":"status"}"#;
        let parsed: Inbound = serde_json::from_str(raw).unwrap();
        let Inbound::RpcCall(call) = parsed else {
            panic!("expected rpc_call");
        };
        assert!(call.args.is_empty());
    }

    #[test]
    fn result_frames_carry_exactly_one_of_result_or_error() {
        let ok = serde_json::to_value(ToolResult::ok("a", serde_json::json!({"x": 1}))).unwrap();
        assert!(ok.get("result").is_some());
        assert!(ok.get("error").is_none());
        assert!(ok.get("errorCode").is_none());

        let err =
            serde_json::to_value(ToolResult::err("a", ErrorCode::Timeout, "too slow")).unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"], "too slow");
        assert_eq!(err["errorCode"], "TIMEOUT");
    }
}
