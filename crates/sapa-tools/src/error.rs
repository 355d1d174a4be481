//! Error types for tool execution.

/// Errors from tool lookup and execution.
///
/// These never abort a conversation turn: the orchestrator feeds them back
/// to the model as the tool's result.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("Tool {tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },
    #[error("Tool {tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}

impl ToolError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}
