//! Provider-neutral chat messages and model replies.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned id, echoed back with the tool result.
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them.
    pub arguments: String,
}

/// One message of a model request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set on assistant messages that requested a tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
    /// Set on tool messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Assistant message that carried a tool request, replayed before its
    /// result.
    pub fn assistant_tool_call(draft: Option<String>, call: ToolCallRequest) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::new(ChatRole::Assistant, draft.unwrap_or_default())
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(ChatRole::Tool, content)
        }
    }
}

/// What the model produced for one request.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelReply {
    FinalAnswer(String),
    /// The model wants a tool run first. `draft` is any answer text it wrote
    /// alongside the request.
    ToolRequest {
        call: ToolCallRequest,
        draft: Option<String>,
    },
}

impl ModelReply {
    /// Answer text, if any: the final answer or a non-empty draft.
    pub fn text(&self) -> Option<&str> {
        match self {
            ModelReply::FinalAnswer(text) => Some(text.as_str()),
            ModelReply::ToolRequest { draft, .. } => draft.as_deref(),
        }
        .filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ToolCallRequest {
        ToolCallRequest {
            call_id: "call_1".into(),
            name: "get_external_links".into(),
            arguments: r#"{"topic":"pho_hanoi"}"#.into(),
        }
    }

    #[test]
    fn test_constructors() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);

        let m = ChatMessage::assistant_tool_call(None, call());
        assert_eq!(m.role, ChatRole::Assistant);
        assert_eq!(m.content, "");
        assert_eq!(m.tool_call, Some(call()));

        let m = ChatMessage::tool_result("call_1", "[]");
        assert_eq!(m.role, ChatRole::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_reply_text() {
        assert_eq!(ModelReply::FinalAnswer("Xin chào".into()).text(), Some("Xin chào"));
        assert_eq!(ModelReply::FinalAnswer("  ".into()).text(), None);
        assert_eq!(
            ModelReply::ToolRequest {
                call: call(),
                draft: Some("Let me find links".into())
            }
            .text(),
            Some("Let me find links")
        );
        assert_eq!(
            ModelReply::ToolRequest {
                call: call(),
                draft: None
            }
            .text(),
            None
        );
    }
}
