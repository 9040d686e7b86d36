//! Body-shape detection for the three protocols.
//!
//! Providers drift: an "OpenAI-compatible" endpoint may answer with a bare
//! `{"message": …}` body, and the proxy endpoint accepts requests in any of
//! the three formats. Detection is a total function over the parsed body
//! and refuses ambiguity instead of guessing.

use serde_json::Value;
use thiserror::Error;

/// The shape of an upstream response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// OpenAI chat completion: carries a `choices` array.
    OpenAi,
    /// Gemini generateContent: carries a `candidates` array.
    Gemini,
    /// Anthropic messages: carries a `content` array plus message markers.
    Anthropic,
    /// An error envelope (`error` field) regardless of protocol.
    Error,
    /// A body with no recognizable fields at all.
    Empty,
    /// Non-empty but matching no known shape; candidate for the
    /// missing-choices repair.
    Unrecognized,
}

/// Detection failure.
#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    /// Two protocol shapes are simultaneously valid for the same body.
    #[error("ambiguous response body: matches {0} and {1}")]
    Ambiguous(&'static str, &'static str),

    /// The body is not a JSON object.
    #[error("response body is not a JSON object")]
    NotAnObject,
}

/// Classify an upstream response body.
///
/// Exactly one shape may match; a body that carries both `choices` and
/// `candidates` (or either plus Anthropic markers) is rejected rather than
/// parsed by whichever extractor happens to run first.
pub fn detect_response(body: &Value) -> Result<ResponseKind, DetectError> {
    let Some(object) = body.as_object() else {
        return Err(DetectError::NotAnObject);
    };

    if object.is_empty() {
        return Ok(ResponseKind::Empty);
    }

    if object.contains_key("error") {
        return Ok(ResponseKind::Error);
    }

    let openai = object.get("choices").is_some_and(Value::is_array);
    let gemini = object.get("candidates").is_some_and(Value::is_array);
    let anthropic = object.get("content").is_some_and(Value::is_array)
        && (object.get("role").and_then(Value::as_str) == Some("assistant")
            || object.contains_key("stop_reason")
            || object.get("type").and_then(Value::as_str) == Some("message"));

    match (openai, gemini, anthropic) {
        (true, true, _) => Err(DetectError::Ambiguous("openai", "gemini")),
        (true, _, true) => Err(DetectError::Ambiguous("openai", "anthropic")),
        (_, true, true) => Err(DetectError::Ambiguous("gemini", "anthropic")),
        (true, false, false) => Ok(ResponseKind::OpenAi),
        (false, true, false) => Ok(ResponseKind::Gemini),
        (false, false, true) => Ok(ResponseKind::Anthropic),
        (false, false, false) => Ok(ResponseKind::Unrecognized),
    }
}

/// The shape of an inbound request body, for the pass-through endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Anthropic messages request.
    Anthropic,
    /// OpenAI chat completion request.
    OpenAi,
    /// Gemini generateContent request.
    Gemini,
}

/// Classify an inbound request body.
///
/// A plain `{model, messages:[{role, content: "…"}]}` body is valid in
/// both the Anthropic and OpenAI formats; those default to Anthropic, the
/// broker's canonical shape. Distinctive markers win over the default.
pub fn detect_request(body: &Value) -> RequestKind {
    if body.get("contents").is_some_and(Value::is_array) {
        return RequestKind::Gemini;
    }

    let messages = body.get("messages").and_then(Value::as_array);

    let openai_markers = messages.is_some_and(|messages| {
        messages.iter().any(|message| {
            message.get("tool_calls").is_some()
                || message.get("tool_call_id").is_some()
                || message.get("role").and_then(Value::as_str) == Some("tool")
        })
    }) || body
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| tools.iter().any(|tool| tool.get("function").is_some()));

    if openai_markers {
        return RequestKind::OpenAi;
    }

    RequestKind::Anthropic
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_body_detected_by_choices() {
        let body = json!({"choices": [], "usage": {}});
        assert_eq!(detect_response(&body), Ok(ResponseKind::OpenAi));
    }

    #[test]
    fn gemini_body_detected_by_candidates() {
        let body = json!({"candidates": [{"content": {"role": "model", "parts": []}}]});
        assert_eq!(detect_response(&body), Ok(ResponseKind::Gemini));
    }

    #[test]
    fn anthropic_body_needs_message_markers() {
        let body = json!({"content": [{"type": "text", "text": "hi"}], "role": "assistant"});
        assert_eq!(detect_response(&body), Ok(ResponseKind::Anthropic));

        // A bare `content` array without markers is not enough.
        let body = json!({"content": [{"type": "text", "text": "hi"}]});
        assert_eq!(detect_response(&body), Ok(ResponseKind::Unrecognized));
    }

    #[test]
    fn ambiguity_is_rejected() {
        let body = json!({"choices": [], "candidates": []});
        assert_eq!(
            detect_response(&body),
            Err(DetectError::Ambiguous("openai", "gemini"))
        );
    }

    #[test]
    fn error_and_empty_bodies() {
        assert_eq!(
            detect_response(&json!({"error": {"message": "boom"}})),
            Ok(ResponseKind::Error)
        );
        assert_eq!(detect_response(&json!({})), Ok(ResponseKind::Empty));
        assert!(detect_response(&json!("text")).is_err());
    }

    #[test]
    fn bare_message_body_is_unrecognized() {
        let body = json!({"message": "hello", "usage": {"prompt_tokens": 3}});
        assert_eq!(detect_response(&body), Ok(ResponseKind::Unrecognized));
    }

    #[test]
    fn request_detection_prefers_distinctive_markers() {
        let gemini = json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]});
        assert_eq!(detect_request(&gemini), RequestKind::Gemini);

        let openai = json!({
            "model": "m",
            "messages": [{"role": "tool", "content": "out", "tool_call_id": "call_1"}]
        });
        assert_eq!(detect_request(&openai), RequestKind::OpenAi);

        let plain = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(detect_request(&plain), RequestKind::Anthropic);
    }
}
