use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Gemini generateContent API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// The conversation turns.
    pub contents: Vec<Content>,

    /// System instruction, sent separately from the turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Generation parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// Function declarations available to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

/// One conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Content {
    /// Sender role; Gemini only knows `user` and `model`.
    pub role: Role,

    /// Ordered message parts.
    pub parts: Vec<Part>,
}

/// Gemini role vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Caller input.
    User,
    /// Model output.
    Model,
}

/// A message part: text, a function call, or a function response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Function invocation emitted by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Function result supplied by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    /// A bare text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Function invocation emitted by the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,

    /// Argument object.
    #[serde(default)]
    pub args: Value,
}

/// Function result supplied by the caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionResponse {
    /// Function name.
    pub name: String,

    /// Response object; Gemini requires a JSON object here.
    pub response: Value,
}

/// Generation parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Token cap for the candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature, 0 to 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Tool wrapper carrying function declarations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The declared functions.
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// One declared function.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDeclaration {
    /// Function name; must match `^[A-Za-z][A-Za-z0-9_]{0,63}$`.
    pub name: String,

    /// What the function does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the parameters, restricted to the subset Gemini
    /// accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Response body from generateContent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    /// Response candidates; index 0 is the primary one.
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    /// Token accounting.
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

/// One response candidate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Generated content.
    #[serde(default)]
    pub content: Option<Content>,

    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Gemini finish reason vocabulary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Token limit.
    MaxTokens,
    /// Safety filter.
    Safety,
    /// Recitation filter.
    Recitation,
    /// Unspecified.
    Other,
    /// Anything newer than this vocabulary.
    #[serde(untagged)]
    Unknown(String),
}

/// Token accounting in Gemini format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Prompt token count.
    #[serde(default)]
    pub prompt_token_count: u32,
    /// Candidate token count.
    #[serde(default)]
    pub candidates_token_count: u32,
    /// Total token count.
    #[serde(default)]
    pub total_token_count: u32,
}
