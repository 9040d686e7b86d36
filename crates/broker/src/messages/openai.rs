use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for OpenAI-compatible chat completions endpoints.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// Model name.
    pub model: String,

    /// The conversation.
    pub messages: Vec<ChatMessage>,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Stream as SSE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tool definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Tool choice constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// A chat message in OpenAI format.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: ChatRole,

    /// Text content. Null for assistant messages that only carry tool
    /// calls.
    #[serde(default)]
    pub content: Option<String>,

    /// Optional participant name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls emitted by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For role=tool messages, the tool call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Chat role in OpenAI format.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user input.
    #[default]
    User,
    /// Model output.
    Assistant,
    /// Tool output.
    Tool,
}

/// Tool definition in OpenAI format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Always "function".
    pub r#type: String,

    /// The function payload.
    pub function: FunctionDef,
}

/// Function definition carried by a tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,

    /// What the function does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments.
    pub parameters: Value,
}

/// A tool call emitted by the assistant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    /// Unique call id.
    pub id: String,

    /// Always "function".
    pub r#type: String,

    /// The invoked function.
    pub function: FunctionCall,
}

/// The function and serialized arguments of a tool call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,

    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Response body from OpenAI-compatible chat completions endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    /// Completion id.
    #[serde(default)]
    pub id: String,

    /// Always "chat.completion".
    #[serde(default)]
    pub object: String,

    /// Unix creation timestamp.
    #[serde(default)]
    pub created: u64,

    /// Model echo.
    #[serde(default)]
    pub model: String,

    /// Completion choices; index 0 is the primary response.
    pub choices: Vec<Choice>,

    /// Token usage.
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Choice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ChatMessage,

    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Finish reason vocabulary, tolerant of provider drift.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Token limit.
    Length,
    /// Tool calls were emitted.
    ToolCalls,
    /// Content filtered.
    ContentFilter,
    /// Anything else a provider reports.
    #[serde(untagged)]
    Other(String),
}

/// Token usage in OpenAI format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct Usage {
    /// Prompt token count.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion token count.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total token count.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Streaming chunk from OpenAI-compatible endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamChunk {
    /// Completion id.
    #[serde(default)]
    pub id: String,

    /// Model echo.
    #[serde(default)]
    pub model: String,

    /// Incremental choices.
    #[serde(default)]
    pub choices: Vec<StreamChoice>,

    /// Usage, present in the final chunk of some providers.
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamChoice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,

    /// The delta payload.
    #[serde(default)]
    pub delta: Delta,

    /// Set on the terminal chunk of the choice.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Delta payload of a streaming chunk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Delta {
    /// Role, present in the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    /// Text fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental tool call in a streaming response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCallDelta {
    /// Position in the tool_calls array.
    #[serde(default)]
    pub index: usize,

    /// Call id, present when the call starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Function name and argument fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Function fragment of a streaming tool call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FunctionCallDelta {
    /// Name, present when the call starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument JSON fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One model in a listing response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Model {
    /// Model identifier usable in requests.
    pub id: String,

    /// Always "model".
    pub object: String,

    /// Owning provider id.
    pub owned_by: String,
}

/// Model listing response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsResponse {
    /// Always "list".
    pub object: String,

    /// The available models.
    pub data: Vec<Model>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finish_reason_tolerates_unknown_values() {
        let reason: FinishReason = serde_json::from_value(json!("stop")).unwrap();
        assert_eq!(reason, FinishReason::Stop);

        let reason: FinishReason = serde_json::from_value(json!("eos_token")).unwrap();
        assert_eq!(reason, FinishReason::Other("eos_token".into()));
    }

    #[test]
    fn deserialize_tool_call_response() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "Read", "arguments": "{\"path\":\"/x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }))
        .unwrap();

        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "Read");
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn stream_chunk_with_partial_tool_call() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "m",
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "function": {"name": "Edit", "arguments": "{\"fi"}
                    }]
                }
            }]
        }))
        .unwrap();

        let delta = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(delta[0].function.as_ref().unwrap().name.as_deref(), Some("Edit"));
    }
}
