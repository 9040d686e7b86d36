use serde_json::{Value, json};

use crate::messages::{anthropic, openai};

/// Translate an Anthropic messages request into an OpenAI chat completion
/// request.
///
/// Block sequences collapse into joined strings, `tool_use` blocks become
/// `tool_calls` on the assistant message, and `tool_result` blocks become
/// separate role=tool messages carrying the `tool_call_id`.
pub fn anthropic_to_openai(request: anthropic::ChatRequest) -> openai::ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system {
        messages.push(openai::ChatMessage {
            role: openai::ChatRole::System,
            content: Some(system),
            ..Default::default()
        });
    }

    for message in request.messages {
        convert_message(message, &mut messages);
    }

    let tools = request.tools.map(|tools| tools.into_iter().map(convert_tool).collect());

    openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        stream: request.stream,
        tools,
        tool_choice: request.tool_choice.map(convert_tool_choice),
    }
}

fn convert_message(message: anthropic::Message, out: &mut Vec<openai::ChatMessage>) {
    let role = match message.role {
        anthropic::Role::System => openai::ChatRole::System,
        anthropic::Role::User => openai::ChatRole::User,
        anthropic::Role::Assistant => openai::ChatRole::Assistant,
        anthropic::Role::Tool => openai::ChatRole::Tool,
    };

    let blocks = match message.content {
        anthropic::MessageContent::Text(text) => {
            out.push(openai::ChatMessage {
                role,
                content: Some(text),
                ..Default::default()
            });
            return;
        }
        anthropic::MessageContent::Blocks(blocks) => blocks,
    };

    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text } => texts.push(text),
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id,
                    r#type: "function".to_string(),
                    function: openai::FunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            anthropic::ContentBlock::ToolResult { tool_use_id, content } => {
                // Tool results leave the enclosing message entirely; OpenAI
                // models them as standalone role=tool messages.
                out.push(openai::ChatMessage {
                    role: openai::ChatRole::Tool,
                    content: Some(content.joined_text()),
                    tool_call_id: Some(tool_use_id),
                    ..Default::default()
                });
            }
        }
    }

    let content = (!texts.is_empty()).then(|| texts.join("\n"));

    if content.is_none() && tool_calls.is_empty() {
        return;
    }

    out.push(openai::ChatMessage {
        role,
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..Default::default()
    });
}

fn convert_tool(tool: anthropic::Tool) -> openai::Tool {
    openai::Tool {
        r#type: "function".to_string(),
        function: openai::FunctionDef {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        },
    }
}

fn convert_tool_choice(choice: anthropic::ToolChoice) -> Value {
    match choice {
        anthropic::ToolChoice::Auto => json!("auto"),
        anthropic::ToolChoice::Any => json!("required"),
        anthropic::ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}
