//! Generative model trait and the OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use sapa_core::config::GenerationConfig;
use sapa_core::error::SapaError;
use sapa_core::types::ToolSchema;

use crate::message::{ChatMessage, ChatRole, ModelReply, ToolCallRequest};

/// A chat model that can answer or request a tool.
///
/// Implementations make a single attempt; timeouts and retries are applied
/// by the caller's [`RetryPolicy`](sapa_core::RetryPolicy).
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, SapaError>;

    fn model_name(&self) -> &str;
}

/// Backend speaking the OpenAI `/chat/completions` protocol with function
/// calling.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiChatModel {
    pub fn new(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self, SapaError> {
        Self::with_timeout(config, api_key, config.timeout())
    }

    pub fn with_timeout(
        config: &GenerationConfig,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SapaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SapaError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        info!(endpoint = %endpoint, model = %config.model, "Chat model client ready");

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, SapaError> {
        let body = build_request(&self.model, self.temperature, self.max_tokens, messages, tools);
        debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "Chat completion request");

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SapaError::Provider(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SapaError::Provider(format!(
                "chat endpoint returned {}: {}",
                status, text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SapaError::Provider(format!("invalid chat response: {}", e)))?;
        parse_completion(&payload)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn message_json(message: &ChatMessage) -> Value {
    let mut value = json!({
        "role": role_name(message.role),
        "content": message.content,
    });

    if let Some(call) = &message.tool_call {
        if message.content.is_empty() {
            value["content"] = Value::Null;
        }
        value["tool_calls"] = json!([{
            "id": call.call_id,
            "type": "function",
            "function": { "name": call.name, "arguments": call.arguments },
        }]);
    }
    if let Some(call_id) = &message.tool_call_id {
        value["tool_call_id"] = json!(call_id);
    }
    value
}

/// Request body for `/chat/completions`. The `tools` field is left out when
/// no tools are offered.
pub fn build_request(
    model: &str,
    temperature: f32,
    max_tokens: u32,
    messages: &[ChatMessage],
    tools: &[ToolSchema],
) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "max_tokens": max_tokens,
        "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
    });

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tool_choice"] = json!("auto");
    }
    body
}

/// Interpret a `/chat/completions` response. Only the first tool call of a
/// reply is honoured.
pub fn parse_completion(payload: &Value) -> Result<ModelReply, SapaError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| SapaError::Provider("chat response has no choices".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let first_call = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| calls.first());

    if let Some(call) = first_call {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .ok_or_else(|| SapaError::Provider("tool call without a function name".to_string()))?;
        let arguments = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) => raw.clone(),
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        let call_id = call
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("call_0")
            .to_string();

        return Ok(ModelReply::ToolRequest {
            call: ToolCallRequest {
                call_id,
                name: name.to_string(),
                arguments,
            },
            draft: content.filter(|c| !c.trim().is_empty()),
        });
    }

    match content {
        Some(text) => Ok(ModelReply::FinalAnswer(text)),
        None => Err(SapaError::Provider(
            "chat response has neither content nor tool calls".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links_schema() -> ToolSchema {
        ToolSchema {
            name: "get_external_links".into(),
            description: "links".into(),
            parameters: json!({"type": "object", "properties": {"topic": {"type": "string"}}}),
        }
    }

    #[test]
    fn test_build_request_with_tools() {
        let messages = vec![
            ChatMessage::system("You are a travel advisor"),
            ChatMessage::user("Phở ở đâu ngon?"),
        ];
        let body = build_request("gpt-4o-mini", 0.7, 1000, &messages, &[links_schema()]);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Phở ở đâu ngon?");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_external_links");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_build_request_without_tools() {
        let body = build_request("m", 0.0, 10, &[ChatMessage::user("hi")], &[]);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_tool_exchange_serialization() {
        let call = ToolCallRequest {
            call_id: "call_9".into(),
            name: "get_external_links".into(),
            arguments: r#"{"topic":"bun_cha"}"#.into(),
        };
        let messages = vec![
            ChatMessage::assistant_tool_call(None, call),
            ChatMessage::tool_result("call_9", "[]"),
        ];
        let body = build_request("m", 0.0, 10, &messages, &[]);

        let assistant = &body["messages"][0];
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["id"], "call_9");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"topic":"bun_cha"}"#
        );

        let tool = &body["messages"][1];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_9");
    }

    #[test]
    fn test_parse_final_answer() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "Try Phở Thìn."}}]
        });
        assert_eq!(
            parse_completion(&payload).unwrap(),
            ModelReply::FinalAnswer("Try Phở Thìn.".into())
        );
    }

    #[test]
    fn test_parse_first_tool_call_only() {
        let payload = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [
                    {"id": "a", "type": "function", "function": {"name": "get_external_links", "arguments": "{\"topic\":\"pho_hanoi\"}"}},
                    {"id": "b", "type": "function", "function": {"name": "get_external_links", "arguments": "{\"topic\":\"bun_cha\"}"}}
                ]
            }}]
        });
        match parse_completion(&payload).unwrap() {
            ModelReply::ToolRequest { call, draft } => {
                assert_eq!(call.call_id, "a");
                assert_eq!(call.arguments, r#"{"topic":"pho_hanoi"}"#);
                assert!(draft.is_none());
            }
            other => panic!("expected tool request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_object_arguments() {
        let payload = json!({
            "choices": [{"message": {
                "content": "Looking up links",
                "tool_calls": [{"id": "a", "function": {"name": "get_external_links", "arguments": {"topic": "sapa"}}}]
            }}]
        });
        match parse_completion(&payload).unwrap() {
            ModelReply::ToolRequest { call, draft } => {
                assert_eq!(call.arguments, r#"{"topic":"sapa"}"#);
                assert_eq!(draft.as_deref(), Some("Looking up links"));
            }
            other => panic!("expected tool request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_is_provider_error() {
        for payload in [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {"content": null}}]}),
        ] {
            let err = parse_completion(&payload).unwrap_err();
            assert!(err.is_provider(), "{:?}", payload);
        }
    }

    #[test]
    fn test_new_trims_endpoint() {
        let config = GenerationConfig {
            endpoint: "https://llm.example/v1/".into(),
            ..GenerationConfig::default()
        };
        let model = OpenAiChatModel::new(&config, "key").unwrap();
        assert_eq!(model.chat_url(), "https://llm.example/v1/chat/completions");
        assert_eq!(model.model_name(), config.model);
    }
}
