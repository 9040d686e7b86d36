use std::collections::HashMap;

use serde_json::Value;

use crate::messages::{anthropic, gemini};
use crate::transform::{sanitize_tool_name, strip_unsupported_schema_fields};

/// Token cap Gemini accepts for a single candidate.
const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Translate an Anthropic messages request into a Gemini generateContent
/// request.
///
/// System content collapses into a leading user turn prefixed with
/// `[System Instructions]`; tool schemas are stripped to the subset Gemini
/// accepts; tool names are sanitized or the tool is dropped.
pub fn anthropic_to_gemini(request: anthropic::ChatRequest) -> gemini::GenerateContentRequest {
    let mut contents: Vec<gemini::Content> = Vec::new();
    let mut system_parts: Vec<String> = Vec::new();

    if let Some(system) = request.system {
        system_parts.push(system);
    }

    // Gemini loses tool-call ids, so function responses are correlated by
    // name via the ids seen in earlier assistant turns.
    let mut id_to_name: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        if let anthropic::MessageContent::Blocks(blocks) = &message.content {
            for block in blocks {
                if let anthropic::ContentBlock::ToolUse { id, name, .. } = block {
                    id_to_name.insert(id.clone(), name.clone());
                }
            }
        }
    }

    for message in request.messages {
        match message.role {
            anthropic::Role::System => system_parts.push(message.content.joined_text()),
            anthropic::Role::User | anthropic::Role::Tool => {
                let parts = convert_user_parts(message.content, &id_to_name);
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: gemini::Role::User,
                        parts,
                    });
                }
            }
            anthropic::Role::Assistant => {
                let parts = convert_assistant_parts(message.content);
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: gemini::Role::Model,
                        parts,
                    });
                }
            }
        }
    }

    if !system_parts.is_empty() {
        let text = format!("[System Instructions]\n{}", system_parts.join("\n"));
        contents.insert(
            0,
            gemini::Content {
                role: gemini::Role::User,
                parts: vec![gemini::Part::text(text)],
            },
        );
    }

    let tools = convert_tools(request.tools);

    gemini::GenerateContentRequest {
        contents,
        system_instruction: None,
        generation_config: Some(gemini::GenerationConfig {
            max_output_tokens: Some(request.max_tokens.unwrap_or(MAX_OUTPUT_TOKENS).min(MAX_OUTPUT_TOKENS)),
            temperature: request.temperature.map(|t| t.clamp(0.0, 2.0)),
            top_p: request.top_p,
            top_k: request.top_k,
            stop_sequences: request.stop_sequences,
        }),
        tools,
    }
}

fn convert_user_parts(content: anthropic::MessageContent, id_to_name: &HashMap<String, String>) -> Vec<gemini::Part> {
    let blocks = match content {
        anthropic::MessageContent::Text(text) => return vec![gemini::Part::text(text)],
        anthropic::MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text } => parts.push(gemini::Part::text(text)),
            anthropic::ContentBlock::ToolResult { tool_use_id, content } => {
                let name = id_to_name.get(&tool_use_id).cloned().unwrap_or_else(|| {
                    log::warn!("tool_result references unknown tool_use id {tool_use_id}");
                    "unknown_function".to_string()
                });

                parts.push(gemini::Part {
                    function_response: Some(gemini::FunctionResponse {
                        name,
                        response: wrap_response_object(content.joined_text()),
                    }),
                    ..Default::default()
                });
            }
            // A tool_use inside a user turn is malformed; skip it.
            anthropic::ContentBlock::ToolUse { .. } => {}
        }
    }

    parts
}

fn convert_assistant_parts(content: anthropic::MessageContent) -> Vec<gemini::Part> {
    let blocks = match content {
        anthropic::MessageContent::Text(text) => return vec![gemini::Part::text(text)],
        anthropic::MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text } => parts.push(gemini::Part::text(text)),
            anthropic::ContentBlock::ToolUse { name, input, .. } => {
                parts.push(gemini::Part {
                    function_call: Some(gemini::FunctionCall { name, args: input }),
                    ..Default::default()
                });
            }
            anthropic::ContentBlock::ToolResult { .. } => {}
        }
    }

    parts
}

/// Gemini requires `functionResponse.response` to be a JSON object.
fn wrap_response_object(text: String) -> Value {
    match serde_json::from_str::<Value>(&text) {
        Ok(value) if value.is_object() => value,
        _ => serde_json::json!({"result": text}),
    }
}

fn convert_tools(tools: Option<Vec<anthropic::Tool>>) -> Option<Vec<gemini::Tool>> {
    let tools = tools?;

    let declarations: Vec<gemini::FunctionDeclaration> = tools
        .into_iter()
        .filter_map(|tool| {
            let Some(name) = sanitize_tool_name(&tool.name) else {
                log::warn!("dropping tool with unsalvageable name {:?}", tool.name);
                return None;
            };

            Some(gemini::FunctionDeclaration {
                name,
                description: (!tool.description.is_empty()).then_some(tool.description),
                parameters: Some(strip_unsupported_schema_fields(tool.input_schema)),
            })
        })
        .collect();

    (!declarations.is_empty()).then_some(vec![gemini::Tool {
        function_declarations: declarations,
    }])
}
