use serde_json::Value;

use crate::messages::{anthropic, gemini, openai};

/// Convert an inbound OpenAI chat completion request into the canonical
/// Anthropic shape.
///
/// This is the inverse of the outbound map: system messages gather into
/// the top-level system prompt, `tool_calls` become `tool_use` blocks, and
/// role=tool messages fold back into user messages carrying `tool_result`
/// blocks.
pub fn openai_request_to_anthropic(request: openai::ChatCompletionRequest) -> anthropic::ChatRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<anthropic::Message> = Vec::new();

    for message in request.messages {
        match message.role {
            openai::ChatRole::System => {
                if let Some(content) = message.content {
                    system_parts.push(content);
                }
            }
            openai::ChatRole::User => {
                messages.push(anthropic::Message {
                    role: anthropic::Role::User,
                    content: anthropic::MessageContent::Text(message.content.unwrap_or_default()),
                });
            }
            openai::ChatRole::Assistant => {
                let mut blocks: Vec<anthropic::ContentBlock> = Vec::new();

                if let Some(text) = message.content
                    && !text.is_empty()
                {
                    blocks.push(anthropic::ContentBlock::Text { text });
                }

                for call in message.tool_calls.unwrap_or_default() {
                    let input = serde_json::from_str::<Value>(&call.function.arguments)
                        .unwrap_or_else(|_| Value::Object(Default::default()));

                    blocks.push(anthropic::ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input,
                    });
                }

                let content = match blocks.as_slice() {
                    [anthropic::ContentBlock::Text { text }] => anthropic::MessageContent::Text(text.clone()),
                    _ => anthropic::MessageContent::Blocks(blocks),
                };

                messages.push(anthropic::Message {
                    role: anthropic::Role::Assistant,
                    content,
                });
            }
            openai::ChatRole::Tool => {
                messages.push(anthropic::Message {
                    role: anthropic::Role::User,
                    content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.unwrap_or_default(),
                        content: anthropic::ToolResultContent::Text(message.content.unwrap_or_default()),
                    }]),
                });
            }
        }
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| anthropic::Tool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool.function.parameters,
            })
            .collect()
    });

    anthropic::ChatRequest {
        model: request.model,
        messages,
        max_tokens: request.max_tokens,
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n")),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: request.stop,
        stream: request.stream,
        metadata: None,
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(convert_tool_choice),
    }
}

fn convert_tool_choice(choice: &Value) -> Option<anthropic::ToolChoice> {
    if let Some(mode) = choice.as_str() {
        return match mode {
            "auto" => Some(anthropic::ToolChoice::Auto),
            "required" | "any" => Some(anthropic::ToolChoice::Any),
            _ => None,
        };
    }

    choice
        .pointer("/function/name")
        .and_then(Value::as_str)
        .map(|name| anthropic::ToolChoice::Tool { name: name.to_string() })
}

/// Convert an inbound Gemini generateContent request into the canonical
/// Anthropic shape. The model comes from the URL path, not the body.
pub fn gemini_request_to_anthropic(request: gemini::GenerateContentRequest, model: &str) -> anthropic::ChatRequest {
    let mut messages = Vec::with_capacity(request.contents.len());

    for content in request.contents {
        let role = match content.role {
            gemini::Role::User => anthropic::Role::User,
            gemini::Role::Model => anthropic::Role::Assistant,
        };

        let mut blocks: Vec<anthropic::ContentBlock> = Vec::new();

        for (index, part) in content.parts.into_iter().enumerate() {
            if let Some(text) = part.text {
                blocks.push(anthropic::ContentBlock::Text { text });
            }

            if let Some(call) = part.function_call {
                blocks.push(anthropic::ContentBlock::ToolUse {
                    id: format!("toolu_{}_{index}", call.name),
                    name: call.name,
                    input: call.args,
                });
            }

            if let Some(response) = part.function_response {
                blocks.push(anthropic::ContentBlock::ToolResult {
                    tool_use_id: format!("toolu_{}_0", response.name),
                    content: anthropic::ToolResultContent::Text(response.response.to_string()),
                });
            }
        }

        let content = match blocks.as_slice() {
            [anthropic::ContentBlock::Text { text }] => anthropic::MessageContent::Text(text.clone()),
            _ => anthropic::MessageContent::Blocks(blocks),
        };

        messages.push(anthropic::Message { role, content });
    }

    let config = request.generation_config.unwrap_or_default();

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .flat_map(|tool| tool.function_declarations)
            .map(|declaration| anthropic::Tool {
                name: declaration.name,
                description: declaration.description.unwrap_or_default(),
                input_schema: declaration.parameters.unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect()
    });

    anthropic::ChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: config.max_output_tokens,
        system: request
            .system_instruction
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect::<Vec<_>>().join("\n")),
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        stop_sequences: config.stop_sequences,
        stream: None,
        metadata: None,
        tools,
        tool_choice: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::anthropic_to_openai;
    use serde_json::json;

    #[test]
    fn openai_round_trip_preserves_text_content() {
        let original: anthropic::ChatRequest = serde_json::from_value(json!({
            "model": "m",
            "system": "stay factual",
            "messages": [
                {"role": "user", "content": "first question"},
                {"role": "assistant", "content": "first answer"},
                {"role": "user", "content": "second question"}
            ]
        }))
        .unwrap();

        let round_tripped = openai_request_to_anthropic(anthropic_to_openai(original.clone()));

        assert_eq!(round_tripped.system.as_deref(), Some("stay factual"));
        assert_eq!(round_tripped.messages.len(), original.messages.len());

        for (before, after) in original.messages.iter().zip(round_tripped.messages.iter()) {
            assert_eq!(before.role, after.role);
            assert_eq!(before.content.joined_text(), after.content.joined_text());
        }
    }

    #[test]
    fn tool_role_message_folds_into_tool_result() {
        let request: openai::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [
                {"role": "tool", "content": "output", "tool_call_id": "call_9"}
            ]
        }))
        .unwrap();

        let converted = openai_request_to_anthropic(request);

        let anthropic::MessageContent::Blocks(blocks) = &converted.messages[0].content else {
            unreachable!("expected blocks");
        };
        assert_eq!(
            blocks[0],
            anthropic::ContentBlock::ToolResult {
                tool_use_id: "call_9".into(),
                content: anthropic::ToolResultContent::Text("output".into()),
            }
        );
    }

    #[test]
    fn gemini_request_converts_roles_and_system() {
        let request: gemini::GenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "hello"}]},
                {"role": "model", "parts": [{"text": "hi there"}]}
            ],
            "systemInstruction": {"role": "user", "parts": [{"text": "short answers"}]},
            "generationConfig": {"maxOutputTokens": 1024, "temperature": 0.5}
        }))
        .unwrap();

        let converted = gemini_request_to_anthropic(request, "gemini-2-pro");

        assert_eq!(converted.model, "gemini-2-pro");
        assert_eq!(converted.system.as_deref(), Some("short answers"));
        assert_eq!(converted.messages[1].role, anthropic::Role::Assistant);
        assert_eq!(converted.max_tokens, Some(1024));
    }
}
