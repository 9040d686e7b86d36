//! Response-direction repair.
//!
//! Runs in two places: on the raw OpenAI-protocol body before
//! transformation (missing `choices`, wrapped entries, tool calls hiding
//! in text) and on the assembled Anthropic response as the final
//! postprocessing pass.

use config::Toggles;
use serde_json::{Value, json};

use crate::error::{BrokerError, sanitize};
use crate::extract;
use crate::messages::anthropic;

/// Classify a 200-status body that may still be unusable. Returns the
/// structured error to surface; abnormal bodies are never silently
/// normalized.
pub fn classify_abnormal(body: &Value, toggles: &Toggles) -> Option<BrokerError> {
    let Some(object) = body.as_object() else {
        return Some(BrokerError::abnormal("upstream body is not a JSON object"));
    };

    if object.is_empty() {
        return Some(BrokerError::abnormal("empty_response: upstream returned a body with no fields"));
    }

    if let Some(error) = object.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());

        return Some(BrokerError::abnormal(format!("api_error: {}", sanitize(&message))));
    }

    if toggles.strict_finish_reason {
        let explicit_unknown = body
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .is_some_and(|reason| reason == "unknown");

        if explicit_unknown {
            return Some(BrokerError::abnormal("missing_finish_reason: upstream reported explicit 'unknown'"));
        }
    }

    None
}

/// Repair an OpenAI-protocol response body in place.
pub fn repair_openai_body(body: &mut Value, toggles: &Toggles) {
    if toggles.patches.missing_choices {
        synthesize_missing_choices(body, toggles);
    }

    wrap_incomplete_choices(body);

    if toggles.patches.lmstudio || toggles.patches.text_tool_call {
        extract_text_tool_calls(body, toggles);
    }

    if toggles.patches.finish_reason {
        override_finish_reason(body);
    }
}

/// Fallback fields a degenerate body may carry its content in, probed in
/// order.
const CONTENT_FALLBACKS: [&str; 7] = [
    "/content",
    "/message",
    "/text",
    "/response",
    "/output",
    "/result/content",
    "/data/content",
];

/// Fields a degenerate body may carry its finish reason in, probed in
/// order.
const FINISH_REASON_FALLBACKS: [&str; 5] = [
    "/finish_reason",
    "/stop_reason",
    "/finishReason",
    "/status",
    "/choices/0/finish_reason",
];

fn synthesize_missing_choices(body: &mut Value, toggles: &Toggles) {
    if body.get("choices").is_some_and(Value::is_array) {
        return;
    }

    let Some(content) = probe_content(body) else {
        return;
    };

    log::debug!("synthesizing choices array from degenerate upstream body");

    // Content recovered from a fallback field may itself embed tool calls.
    let extraction = if toggles.patches.lmstudio || toggles.patches.text_tool_call {
        extract::extract_tool_calls(&content)
    } else {
        extract::Extraction {
            calls: Vec::new(),
            remaining: content.clone(),
        }
    };

    let tool_calls = calls_to_openai(&extraction.calls);
    let has_tools = !tool_calls.is_empty();

    let finish_reason = probe_finish_reason(body)
        .unwrap_or_else(|| if has_tools { "tool_calls".to_string() } else { "stop".to_string() });

    let message = if has_tools {
        json!({"role": "assistant", "content": Value::Null, "tool_calls": tool_calls})
    } else {
        json!({"role": "assistant", "content": extraction.remaining, "tool_calls": Value::Null})
    };

    if let Some(object) = body.as_object_mut() {
        object.insert(
            "choices".to_string(),
            json!([{"index": 0, "message": message, "finish_reason": finish_reason}]),
        );
    }
}

fn probe_content(body: &Value) -> Option<String> {
    for pointer in CONTENT_FALLBACKS {
        let Some(candidate) = body.pointer(pointer) else {
            continue;
        };

        if let Some(text) = candidate.as_str() {
            return Some(text.to_string());
        }

        // `message` may itself be an object carrying `content`.
        if let Some(text) = candidate.get("content").and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }

    None
}

fn probe_finish_reason(body: &Value) -> Option<String> {
    FINISH_REASON_FALLBACKS
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .map(str::to_string)
}

/// Wrap choices entries that are missing their `message`.
fn wrap_incomplete_choices(body: &mut Value) {
    let Some(choices) = body.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };

    for choice in choices {
        if choice.get("message").is_some() {
            continue;
        }

        let content = choice
            .get("content")
            .or_else(|| choice.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        log::debug!("wrapping incomplete choices entry");

        if let Some(object) = choice.as_object_mut() {
            object.remove("content");
            object.remove("text");
            object.insert(
                "message".to_string(),
                json!({"role": "assistant", "content": content}),
            );
        }
    }
}

/// Scan the primary message text for embedded tool-call syntax (including
/// LM Studio channel markers) and lift matches into real `tool_calls`.
fn extract_text_tool_calls(body: &mut Value, toggles: &Toggles) {
    let Some(message) = body.pointer_mut("/choices/0/message") else {
        return;
    };

    let Some(text) = message.get("content").and_then(Value::as_str).map(str::to_string) else {
        return;
    };

    if text.is_empty() {
        return;
    }

    let extraction = extract::extract_tool_calls(&text);

    if extraction.is_empty() {
        return;
    }

    if toggles.preprocessing_debug {
        log::debug!("extracted {} embedded tool call(s) from message text", extraction.calls.len());
    }

    let new_calls = calls_to_openai(&extraction.calls);

    let Some(object) = message.as_object_mut() else {
        return;
    };

    let mut tool_calls = object
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    tool_calls.extend(new_calls);

    object.insert("tool_calls".to_string(), Value::Array(tool_calls));
    object.insert(
        "content".to_string(),
        if extraction.remaining.is_empty() {
            Value::Null
        } else {
            Value::String(extraction.remaining)
        },
    );
}

fn calls_to_openai(calls: &[extract::ExtractedCall]) -> Vec<Value> {
    calls
        .iter()
        .map(|call| {
            json!({
                "id": format!("call_{}", uuid::Uuid::new_v4().simple()),
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.input.to_string(),
                }
            })
        })
        .collect()
}

/// Any tool call present forces `finish_reason: tool_calls`.
fn override_finish_reason(body: &mut Value) {
    let has_tools = body
        .pointer("/choices/0/message/tool_calls")
        .and_then(Value::as_array)
        .is_some_and(|calls| !calls.is_empty());

    if !has_tools {
        return;
    }

    if let Some(choice) = body.pointer_mut("/choices/0")
        && let Some(object) = choice.as_object_mut()
    {
        object.insert("finish_reason".to_string(), json!("tool_calls"));
    }
}

/// Final postprocessing pass over the assembled Anthropic response: lift
/// tool calls still embedded in text blocks and enforce the tool-use stop
/// reason.
pub fn repair_anthropic_response(response: &mut anthropic::ChatResponse, toggles: &Toggles) {
    if toggles.patches.lmstudio || toggles.patches.text_tool_call {
        let mut repaired: Vec<anthropic::ContentBlock> = Vec::with_capacity(response.content.len());

        for block in response.content.drain(..) {
            match block {
                anthropic::ContentBlock::Text { text } => {
                    let extraction = extract::extract_tool_calls(&text);

                    if extraction.is_empty() {
                        repaired.push(anthropic::ContentBlock::Text { text });
                        continue;
                    }

                    if !extraction.remaining.is_empty() {
                        repaired.push(anthropic::ContentBlock::Text {
                            text: extraction.remaining,
                        });
                    }

                    for call in extraction.calls {
                        repaired.push(anthropic::ContentBlock::ToolUse {
                            id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                            name: call.name,
                            input: call.input,
                        });
                    }
                }
                other => repaired.push(other),
            }
        }

        response.content = repaired;
    }

    if toggles.patches.finish_reason {
        response.enforce_tool_use_stop_reason();
    }
}
