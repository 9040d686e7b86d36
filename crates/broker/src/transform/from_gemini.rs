use crate::messages::{anthropic, gemini};

/// Translate a Gemini generateContent response into the Anthropic shape.
///
/// Text parts of the first candidate concatenate into a single text block;
/// `functionCall` parts become `tool_use` blocks with synthesized ids
/// (Gemini does not issue ids of its own).
pub fn gemini_to_anthropic(response: gemini::GenerateContentResponse, model: &str) -> anthropic::ChatResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;
    let mut text = String::new();

    if let Some(candidate) = response.candidates.into_iter().next() {
        if let Some(body) = candidate.content {
            for (index, part) in body.parts.into_iter().enumerate() {
                if let Some(fragment) = part.text {
                    text.push_str(&fragment);
                }

                if let Some(call) = part.function_call {
                    content.push(anthropic::ContentBlock::ToolUse {
                        id: format!("toolu_{}_{index}", call.name),
                        name: call.name,
                        input: call.args,
                    });
                }
            }
        }

        stop_reason = candidate.finish_reason.and_then(map_finish_reason);
    }

    if !text.is_empty() {
        content.insert(0, anthropic::ContentBlock::Text { text });
    }

    let usage = response.usage_metadata.unwrap_or_default();

    let mut anthropic_response = anthropic::ChatResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        r#type: "message".to_string(),
        role: anthropic::Role::Assistant,
        content,
        model: model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        },
    };

    anthropic_response.enforce_tool_use_stop_reason();
    anthropic_response
}

/// Map the Gemini finish-reason vocabulary onto Anthropic stop reasons.
pub fn map_finish_reason(reason: gemini::FinishReason) -> Option<anthropic::StopReason> {
    match reason {
        gemini::FinishReason::Stop => Some(anthropic::StopReason::EndTurn),
        gemini::FinishReason::MaxTokens => Some(anthropic::StopReason::MaxTokens),
        gemini::FinishReason::Safety | gemini::FinishReason::Recitation => Some(anthropic::StopReason::StopSequence),
        gemini::FinishReason::Other => Some(anthropic::StopReason::EndTurn),
        gemini::FinishReason::Unknown(tag) => {
            log::debug!("unmapped Gemini finish reason: {tag}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> gemini::GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_parts_concatenate_into_one_block() {
        let converted = gemini_to_anthropic(
            response(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Hello, "}, {"text": "world"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "totalTokenCount": 7}
            })),
            "gemini-2-pro",
        );

        assert_eq!(
            converted.content,
            vec![anthropic::ContentBlock::Text {
                text: "Hello, world".into()
            }]
        );
        assert_eq!(converted.stop_reason, Some(anthropic::StopReason::EndTurn));
        assert_eq!(converted.usage.input_tokens, 4);
        assert_eq!(converted.usage.output_tokens, 3);
    }

    #[test]
    fn function_calls_become_tool_use_with_synthesized_ids() {
        let converted = gemini_to_anthropic(
            response(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "checking"},
                        {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
                    ]},
                    "finishReason": "STOP"
                }]
            })),
            "m",
        );

        assert_eq!(converted.content.len(), 2);

        let anthropic::ContentBlock::ToolUse { id, name, input } = &converted.content[1] else {
            unreachable!("expected tool use block");
        };
        assert!(id.starts_with("toolu_"));
        assert_eq!(name, "get_weather");
        assert_eq!(input, &json!({"city": "Paris"}));

        // Tool use wins over the reported STOP.
        assert_eq!(converted.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[test]
    fn safety_maps_to_stop_sequence() {
        let converted = gemini_to_anthropic(
            response(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "partial"}]},
                    "finishReason": "SAFETY"
                }]
            })),
            "m",
        );

        assert_eq!(converted.stop_reason, Some(anthropic::StopReason::StopSequence));
    }

    #[test]
    fn empty_candidates_yield_empty_content() {
        let converted = gemini_to_anthropic(response(json!({"candidates": []})), "m");

        assert!(converted.content.is_empty());
        assert_eq!(converted.stop_reason, None);
    }
}
