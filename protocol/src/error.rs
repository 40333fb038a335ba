use serde::{Deserialize, Serialize};

/// Failure codes carried in `tool_result.errorCode`. The remote agent
/// branches on these, never on the error message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Sandbox violation, or a mutating tool invoked without project context.
    AccessDenied,
    FileNotFound,
    /// No patch strategy located the requested text.
    StringNotFound,
    /// The winning strategy matched more than one location.
    StringNotUnique,
    Timeout,
    ToolTimeout,
    /// Terminal command matched the destructive-pattern denylist.
    BlockedCommand,
    UnknownTool,
    UnknownMethod,
    ValidationError,
    GrepExecError,
    CommandFailed,
    SnapshotError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::StringNotFound => "STRING_NOT_FOUND",
            ErrorCode::StringNotUnique => "STRING_NOT_UNIQUE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::BlockedCommand => "BLOCKED_COMMAND",
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::UnknownMethod => "UNKNOWN_METHOD",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::GrepExecError => "GREP_EXEC_ERROR",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::SnapshotError => "SNAPSHOT_ERROR",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
