use crate::messages::{anthropic, gemini, openai};

/// Re-express an Anthropic response on the OpenAI surface, for callers of
/// the chat completions endpoint.
pub fn anthropic_response_to_openai(response: anthropic::ChatResponse) -> openai::ChatCompletionResponse {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();

    for block in response.content {
        match block {
            anthropic::ContentBlock::Text { text } => texts.push(text),
            anthropic::ContentBlock::ToolUse { id, name, input } => tool_calls.push(openai::ToolCall {
                id,
                r#type: "function".into(),
                function: openai::FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            anthropic::ContentBlock::ToolResult { .. } => {}
        }
    }

    let finish_reason = response.stop_reason.map(|reason| match reason {
        anthropic::StopReason::EndTurn | anthropic::StopReason::StopSequence => openai::FinishReason::Stop,
        anthropic::StopReason::MaxTokens => openai::FinishReason::Length,
        anthropic::StopReason::ToolUse => openai::FinishReason::ToolCalls,
    });

    openai::ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".into(),
        created: jiff::Timestamp::now().as_second() as u64,
        model: response.model,
        choices: vec![openai::Choice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::ChatRole::Assistant,
                content: (!texts.is_empty()).then(|| texts.join("\n")),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                ..Default::default()
            },
            finish_reason,
        }],
        usage: Some(openai::Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
    }
}

/// Re-express an Anthropic response on the Gemini surface, for callers of
/// the generateContent endpoint.
pub fn anthropic_response_to_gemini(response: anthropic::ChatResponse) -> gemini::GenerateContentResponse {
    let mut parts: Vec<gemini::Part> = Vec::new();

    for block in response.content {
        match block {
            anthropic::ContentBlock::Text { text } => parts.push(gemini::Part::text(text)),
            anthropic::ContentBlock::ToolUse { name, input, .. } => parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall { name, args: input }),
                ..Default::default()
            }),
            anthropic::ContentBlock::ToolResult { .. } => {}
        }
    }

    let finish_reason = response.stop_reason.map(|reason| match reason {
        anthropic::StopReason::MaxTokens => gemini::FinishReason::MaxTokens,
        _ => gemini::FinishReason::Stop,
    });

    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: gemini::Role::Model,
                parts,
            }),
            finish_reason,
        }],
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: response.usage.input_tokens,
            candidates_token_count: response.usage.output_tokens,
            total_token_count: response.usage.input_tokens + response.usage.output_tokens,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: Vec<anthropic::ContentBlock>, stop_reason: anthropic::StopReason) -> anthropic::ChatResponse {
        anthropic::ChatResponse {
            id: "msg_1".into(),
            r#type: "message".into(),
            role: anthropic::Role::Assistant,
            content,
            model: "m".into(),
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: anthropic::Usage {
                input_tokens: 3,
                output_tokens: 2,
            },
        }
    }

    #[test]
    fn tool_use_maps_back_to_openai_tool_calls() {
        let converted = anthropic_response_to_openai(response(
            vec![anthropic::ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "Read".into(),
                input: json!({"path": "/x"}),
            }],
            anthropic::StopReason::ToolUse,
        ));

        let choice = &converted.choices[0];
        assert_eq!(choice.finish_reason, Some(openai::FinishReason::ToolCalls));
        assert!(choice.message.content.is_none());
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "Read");
        assert_eq!(converted.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn text_maps_back_to_gemini_parts() {
        let converted = anthropic_response_to_gemini(response(
            vec![anthropic::ContentBlock::Text { text: "hello".into() }],
            anthropic::StopReason::EndTurn,
        ));

        let candidate = &converted.candidates[0];
        assert_eq!(candidate.finish_reason, Some(gemini::FinishReason::Stop));
        assert_eq!(
            candidate.content.as_ref().unwrap().parts[0].text.as_deref(),
            Some("hello")
        );
    }
}
