// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use kestrel_config::ThinkingLevel;

/// Roles a `Message` can carry in a model-facing completion request.
///
/// Distinct from `kestrel_session::Role`, which has a wider variant set
/// (`branch_summary`, `compaction_summary`, `custom`, …) for the on-disk
/// entry log — this is the narrower set a model wire protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One content item in a multimodal user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContentPart {
    Text { text: String },
    Image { data: String, mime_type: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON-encoded arguments, accumulated across streaming deltas.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::User, content: MessageContent::Parts(parts) }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall { name: name.into(), arguments: arguments.into() },
            },
        }
    }
    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult { tool_call_id: id.into(), content: content.into() },
        }
    }

    /// Plain-text view: joins `Text`/`Parts(Text)` blocks with `\n`, skipping
    /// non-textual content. Used by `MockProvider` and by truncation logic.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Coarse 4-chars-per-token estimate, used as the pluggable default for
    /// `estimate_tokens` (spec §9 open question: estimator is external).
    pub fn approx_tokens(&self) -> usize {
        let len = match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { .. } => 0,
                })
                .sum(),
            MessageContent::ToolCall { function, .. } => function.arguments.len() + function.name.len(),
            MessageContent::ToolResult { content, .. } => content.len(),
        };
        len.div_ceil(4).max(if len == 0 { 0 } else { 1 })
    }
}

/// A request to a `ModelProvider`.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub thinking_level: ThinkingLevel,
}

/// Mirrors `kestrel_tools::registry::ToolSchema` but keeps this crate
/// independent of the tools crate, so a provider implementation never needs
/// to depend on tool dispatch machinery it has no other use for.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Streaming events a `ModelProvider::complete` call yields (spec §4.E
/// `ModelStreaming`).
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCall { id: String, name: String, arguments: String },
    Usage { input_tokens: u32, output_tokens: u32 },
    Done,
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_as_text() {
        let m = Message::user("hello");
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn tool_result_as_text_is_none() {
        let m = Message::tool_result("1", "ok");
        assert_eq!(m.as_text(), None);
    }

    #[test]
    fn approx_tokens_rounds_up() {
        // "12345678" = 8 chars -> 2 tokens
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
        // "abcd" = 4 chars -> 1 token
        assert_eq!(Message::assistant("abcd").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_empty_is_zero() {
        assert_eq!(Message::user("").approx_tokens(), 0);
    }

    #[test]
    fn parts_approx_tokens_ignores_images() {
        let m = Message::user_with_parts(vec![
            ContentPart::Text { text: "abcd".into() },
            ContentPart::Image { data: "x".repeat(1000), mime_type: "image/png".into() },
        ]);
        assert_eq!(m.approx_tokens(), 1);
    }
}
