use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for an OpenAI-compatible streaming chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

fn default_true() -> bool {
    true
}

impl ChatCompletionRequest {
    /// Builds a single-turn request, prepending the system prompt when present.
    pub fn new(
        model: impl Into<String>,
        system_prompt: Option<&str>,
        content: impl Into<String>,
    ) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt.map(str::trim).filter(|value| !value.is_empty()) {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        });

        Self {
            model: model.into(),
            messages,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Normalized content of one streamed completion payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionDelta {
    pub content: Option<String>,
    pub usage: Option<CompletionUsage>,
    pub error: Option<String>,
}

impl CompletionDelta {
    /// Parse one SSE data payload. Returns `None` for payloads that are not
    /// JSON objects.
    pub fn parse(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        if !value.is_object() {
            return None;
        }

        let content = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("delta"))
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty())
            .map(ToString::to_string);
        let usage = value
            .get("usage")
            .filter(|usage| !usage.is_null())
            .and_then(|usage| serde_json::from_value(usage.clone()).ok());
        let error = value.get("error").and_then(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(ToString::to_string)
        });

        Some(Self {
            content,
            usage,
            error,
        })
    }
}
