use serde_json::Value;

use crate::messages::{anthropic, openai};

/// Translate an OpenAI chat completion response into the Anthropic shape.
///
/// `choices[0]` is the response; text content becomes one text block and
/// every tool call becomes a `tool_use` block. Arguments that fail to
/// parse keep the tool but carry `{}` as input.
pub fn openai_to_anthropic(response: openai::ChatCompletionResponse, model: &str) -> anthropic::ChatResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content
            && !text.is_empty()
        {
            content.push(anthropic::ContentBlock::Text { text });
        }

        for call in choice.message.tool_calls.unwrap_or_default() {
            content.push(anthropic::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input: parse_arguments(&call.function.arguments),
            });
        }

        stop_reason = choice.finish_reason.and_then(map_finish_reason);
    }

    let usage = response.usage.unwrap_or_default();

    let mut anthropic_response = anthropic::ChatResponse {
        id: if response.id.is_empty() {
            format!("msg_{}", uuid::Uuid::new_v4().simple())
        } else {
            response.id
        },
        r#type: "message".to_string(),
        role: anthropic::Role::Assistant,
        content,
        model: model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    };

    anthropic_response.enforce_tool_use_stop_reason();
    anthropic_response
}

fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            log::warn!("tool call arguments did not parse as an object, keeping tool with empty input");
            Value::Object(Default::default())
        }
    }
}

/// Map the OpenAI finish-reason vocabulary onto Anthropic stop reasons.
pub fn map_finish_reason(reason: openai::FinishReason) -> Option<anthropic::StopReason> {
    match reason {
        openai::FinishReason::Stop => Some(anthropic::StopReason::EndTurn),
        openai::FinishReason::Length => Some(anthropic::StopReason::MaxTokens),
        openai::FinishReason::ToolCalls => Some(anthropic::StopReason::ToolUse),
        openai::FinishReason::ContentFilter => Some(anthropic::StopReason::StopSequence),
        openai::FinishReason::Other(other) => {
            log::debug!("unmapped finish reason from upstream: {other}");
            None
        }
    }
}
