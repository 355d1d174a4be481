//! Sapa LLM crate - chat messages, the generative model trait and its
//! OpenAI-compatible HTTP backend.

pub mod backend;
pub mod message;

pub use backend::{ChatModel, OpenAiChatModel};
pub use message::{ChatMessage, ChatRole, ModelReply, ToolCallRequest};
