use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Anthropic Messages API.
///
/// This is the broker's canonical request shape: the OpenAI and Gemini
/// inbound endpoints convert into it, and the routing, preprocessing, and
/// translation stages all operate on it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    /// The caller-supplied model name. Routing replaces it with the
    /// upstream model of the selected provider.
    pub model: String,

    /// The conversation, oldest first.
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt placed before the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that stop generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Caller metadata. Carries the routing signals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Tools available to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Tool choice constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl ChatRequest {
    /// Total character count across all message contents. Drives the
    /// long-context classification.
    pub fn content_chars(&self) -> usize {
        self.messages.iter().map(|message| message.content.chars()).sum()
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// Who sent the message.
    pub role: Role,

    /// Either a bare string or a sequence of content blocks.
    pub content: MessageContent,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution output.
    Tool,
}

/// Message content: a bare string or ordered content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// A sequence of typed blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Character count of all text carried by this content.
    pub fn chars(&self) -> usize {
        match self {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => text.chars().count(),
                    ContentBlock::ToolUse { input, .. } => input.to_string().chars().count(),
                    ContentBlock::ToolResult { content, .. } => content.chars(),
                })
                .sum(),
        }
    }

    /// Collapse to a single string, joining text blocks with newlines.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Content block inside a message or a response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
    },

    /// Tool invocation emitted by the model.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Unique id, referenced by a later tool_result.
        id: String,
        /// Tool name.
        name: String,
        /// JSON argument object.
        input: Value,
    },

    /// Result of a tool invocation, sent back by the caller.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The tool_use id this result answers.
        tool_use_id: String,
        /// The result payload.
        content: ToolResultContent,
    },
}

/// Tool result payload: a bare string or nested blocks.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain text result.
    Text(String),
    /// Structured result blocks.
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    fn chars(&self) -> usize {
        match self {
            ToolResultContent::Text(text) => text.chars().count(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => text.chars().count(),
                    _ => 0,
                })
                .sum(),
        }
    }

    /// Collapse the result to one string.
    pub fn joined_text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Caller metadata carrying routing signals.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Metadata {
    /// Explicit routing category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Thinking signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,

    /// Opaque user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Tool definition in Anthropic format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// The tool name.
    pub name: String,

    /// What the tool does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the tool's input.
    pub input_schema: Value,
}

/// Tool choice constraint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides whether to use tools.
    Auto,
    /// Model must use some tool.
    Any,
    /// Model must use the named tool.
    Tool {
        /// The tool to use.
        name: String,
    },
}

/// Response body in the Anthropic Messages shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Unique completion id.
    pub id: String,

    /// Always "message".
    pub r#type: String,

    /// Always "assistant".
    pub role: Role,

    /// Response content blocks.
    pub content: Vec<ContentBlock>,

    /// The model echo.
    pub model: String,

    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,

    /// The matched stop sequence, if any.
    pub stop_sequence: Option<String>,

    /// Token usage.
    pub usage: Usage,
}

impl ChatResponse {
    /// Whether any content block is a tool use.
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }

    /// Enforce the tool-use finality invariant: a response containing a
    /// tool_use block reports `stop_reason: tool_use`.
    pub fn enforce_tool_use_stop_reason(&mut self) {
        if self.has_tool_use() && self.stop_reason != Some(StopReason::ToolUse) {
            log::debug!(
                "overriding stop_reason {:?} -> tool_use for response {}",
                self.stop_reason,
                self.id
            );
            self.stop_reason = Some(StopReason::ToolUse);
        }
    }
}

/// Normalized termination cause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Token limit hit.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
            StopReason::ToolUse => write!(f, "tool_use"),
        }
    }
}

/// Token usage in Anthropic format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input token count.
    pub input_tokens: u32,
    /// Output token count.
    pub output_tokens: u32,
}

/// Error envelope in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always "error".
    #[serde(rename = "type")]
    pub error_type: String,

    /// Error details.
    pub error: ErrorDetails,
}

/// Error details in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error kind.
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable message.
    pub message: String,
}

/// Streaming event for Anthropic SSE responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Start of a message.
    #[serde(rename = "message_start")]
    MessageStart {
        /// Initial message metadata.
        message: StreamMessageStart,
    },

    /// A content block begins.
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// Block index.
        index: u32,
        /// The block being started.
        content_block: ContentBlock,
    },

    /// Incremental content.
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// Block index.
        index: u32,
        /// The delta payload.
        delta: ContentDelta,
    },

    /// A content block ends.
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// Block index.
        index: u32,
    },

    /// Terminal message update.
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// Stop reason and sequence.
        delta: MessageDelta,
        /// Final usage.
        usage: Usage,
    },

    /// End of stream.
    #[serde(rename = "message_stop")]
    MessageStop,

    /// Keep-alive.
    #[serde(rename = "ping")]
    Ping,

    /// Stream error.
    #[serde(rename = "error")]
    Error {
        /// What went wrong.
        error: ErrorDetails,
    },
}

/// Initial metadata of a streamed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Message id.
    pub id: String,
    /// Always "message".
    #[serde(rename = "type")]
    pub message_type: String,
    /// Always "assistant".
    pub role: Role,
    /// Initially empty.
    pub content: Vec<ContentBlock>,
    /// The model.
    pub model: String,
    /// Usage so far.
    pub usage: Usage,
}

/// Delta payload of a content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    /// Text append.
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Text to append.
        text: String,
    },

    /// Partial tool input JSON.
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        /// JSON fragment to append.
        partial_json: String,
    },
}

/// Terminal message delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Stop reason, set once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Matched stop sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_string_and_block_content() {
        let request: ChatRequest = serde_json::from_value(json!({
            "model": "claude-3-sonnet",
            "messages": [
                {"role": "user", "content": "plain string"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "block"},
                    {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"path": "/x"}}
                ]}
            ],
            "max_tokens": 512
        }))
        .unwrap();

        assert!(matches!(request.messages[0].content, MessageContent::Text(_)));

        let MessageContent::Blocks(blocks) = &request.messages[1].content else {
            unreachable!("expected block content");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn content_chars_counts_all_text() {
        let request: ChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "abcd"},
                {"role": "user", "content": [{"type": "text", "text": "efgh"}]}
            ]
        }))
        .unwrap();

        assert_eq!(request.content_chars(), 8);
    }

    #[test]
    fn tool_use_forces_stop_reason() {
        let mut response = ChatResponse {
            id: "msg_1".into(),
            r#type: "message".into(),
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "Edit".into(),
                input: json!({}),
            }],
            model: "m".into(),
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            usage: Usage::default(),
        };

        response.enforce_tool_use_stop_reason();
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn stream_event_wire_shape() {
        let event = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta { text: "Hello".into() },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content_block_delta");
        assert_eq!(json["delta"]["type"], "text_delta");
        assert_eq!(json["delta"]["text"], "Hello");
    }
}
