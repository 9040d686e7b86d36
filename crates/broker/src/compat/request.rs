//! Request-direction adaptation for OpenAI-protocol upstreams.
//!
//! Operates on the serialized request body rather than typed structs: the
//! pass-through endpoint forwards caller-supplied JSON, and the repairs
//! here must tolerate shapes the typed layer would reject.

use config::{CompatProfileId, Toggles};
use serde_json::{Map, Value, json};

use crate::transform::sanitize_tool_name;

/// Apply the universal rules plus the provider profile to an outgoing
/// OpenAI-protocol request body.
pub fn adapt(body: &mut Value, profile: CompatProfileId, gemini_backed: bool, toggles: &Toggles) {
    if !toggles.unified_preprocessing {
        return;
    }

    normalize_message_content(body, toggles);
    repair_tool_array(body, toggles);

    match profile {
        CompatProfileId::Glm => {
            default_field(body, "temperature", json!(0.8));
        }
        CompatProfileId::Qwen3Coder => {
            default_field(body, "temperature", json!(0.7));
            name_system_messages(body);
        }
        CompatProfileId::ModelScope => {
            default_field(body, "max_tokens", json!(4096));
            default_field(body, "temperature", json!(0.7));
            default_field(body, "stream", json!(true));
            synthesize_prompt(body);
        }
        CompatProfileId::LmStudio | CompatProfileId::Generic => {}
    }

    if gemini_backed {
        sanitize_tool_names(body);
    }
}

/// Unwrap lone-object message contents: `{type:"text", text}` becomes the
/// string, anything else is JSON-stringified. Mandatory before contacting
/// any OpenAI-compatible endpoint.
fn normalize_message_content(body: &mut Value, toggles: &Toggles) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };

    for message in messages {
        let Some(content) = message.get_mut("content") else {
            continue;
        };

        if content.is_string() || content.is_array() || content.is_null() {
            continue;
        }

        let replacement = match content.pointer("/text").and_then(Value::as_str) {
            Some(text) if content.get("type").and_then(Value::as_str) == Some("text") => text.to_string(),
            _ => content.to_string(),
        };

        if toggles.preprocessing_debug {
            log::debug!("normalized lone-object message content to string");
        }

        *content = Value::String(replacement);
    }
}

/// Drop unusable tool entries and rewrite the rest to the OpenAI shape.
fn repair_tool_array(body: &mut Value, toggles: &Toggles) {
    let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };

    let mut repaired: Vec<Value> = Vec::with_capacity(tools.len());

    for entry in tools.drain(..) {
        let object = match entry {
            Value::Object(object) => object,
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(object)) => object,
                _ => {
                    log::warn!("dropping unparseable string tool entry");
                    continue;
                }
            },
            _ => {
                log::warn!("dropping non-object tool entry");
                continue;
            }
        };

        let Some(rewritten) = rewrite_tool(object) else {
            log::warn!("dropping tool entry without a usable name");
            continue;
        };

        if toggles.preprocessing_debug {
            log::debug!("tool entry rewritten to OpenAI function shape");
        }

        repaired.push(rewritten);
    }

    *tools = repaired;
}

/// Detect the shape of one tool entry and rewrite it to
/// `{type:"function", function:{name, description, parameters}}`.
fn rewrite_tool(entry: Map<String, Value>) -> Option<Value> {
    // Already OpenAI-shaped: type=function with a function object.
    if let Some(function) = entry.get("function").and_then(Value::as_object) {
        let name = function.get("name").and_then(Value::as_str)?;

        return Some(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": function.get("description").and_then(Value::as_str).unwrap_or_default(),
                "parameters": function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
            }
        }));
    }

    // Anthropic-shaped or mixed: a top-level name with input_schema or
    // parameters.
    let name = entry.get("name").and_then(Value::as_str)?;

    let parameters = entry
        .get("input_schema")
        .or_else(|| entry.get("parameters"))
        .cloned()
        .unwrap_or_else(|| json!({"type": "object"}));

    Some(json!({
        "type": "function",
        "function": {
            "name": name,
            "description": entry.get("description").and_then(Value::as_str).unwrap_or_default(),
            "parameters": parameters,
        }
    }))
}

fn default_field(body: &mut Value, field: &str, default: Value) {
    let Some(object) = body.as_object_mut() else {
        return;
    };

    if object.get(field).map(Value::is_null).unwrap_or(true) {
        object.insert(field.to_string(), default);
    }
}

/// Qwen3-Coder expects system messages to carry an explicit name.
fn name_system_messages(body: &mut Value) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };

    for message in messages {
        if message.get("role").and_then(Value::as_str) == Some("system")
            && let Some(object) = message.as_object_mut()
        {
            object.entry("name").or_insert(json!("system"));
        }
    }
}

/// Fallback `prompt` field for endpoints that ignore `messages`:
/// `"<Role>: <content>"` joined by blank lines.
fn synthesize_prompt(body: &mut Value) {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return;
    };

    let lines: Vec<String> = messages
        .iter()
        .filter_map(|message| {
            let role = message.get("role").and_then(Value::as_str)?;
            let content = message.get("content").and_then(Value::as_str)?;

            let mut role = role.to_string();
            if let Some(first) = role.get_mut(0..1) {
                first.make_ascii_uppercase();
            }

            Some(format!("{role}: {content}"))
        })
        .collect();

    if let Some(object) = body.as_object_mut() {
        object.insert("prompt".to_string(), json!(lines.join("\n\n")));
    }
}

/// Enforce Gemini's tool-name grammar on a provider that fronts a Gemini
/// backend; names that cannot be sanitized drop the tool.
fn sanitize_tool_names(body: &mut Value) {
    let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };

    tools.retain_mut(|tool| {
        let Some(name) = tool.pointer("/function/name").and_then(Value::as_str) else {
            return false;
        };

        match sanitize_tool_name(name) {
            Some(sanitized) => {
                if let Some(slot) = tool.pointer_mut("/function/name") {
                    *slot = Value::String(sanitized);
                }
                true
            }
            None => {
                log::warn!("dropping tool with unsalvageable name for Gemini backend");
                false
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toggles() -> Toggles {
        Toggles::default()
    }

    #[test]
    fn lone_object_text_content_unwraps() {
        let mut body = json!({
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "hello"}},
                {"role": "user", "content": {"custom": 1}}
            ]
        });

        adapt(&mut body, CompatProfileId::Generic, false, &toggles());

        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["messages"][1]["content"], r#"{"custom":1}"#);
    }

    #[test]
    fn tool_array_repair_drops_junk_and_rewrites_shapes() {
        let mut body = json!({
            "messages": [],
            "tools": [
                42,
                "not json either",
                {"no_name": true},
                {"name": "anthropic_tool", "description": "a", "input_schema": {"type": "object"}},
                {"type": "function", "function": {"name": "openai_tool", "parameters": {"type": "object"}}},
                "{\"name\":\"stringly\",\"input_schema\":{\"type\":\"object\"}}"
            ]
        });

        adapt(&mut body, CompatProfileId::Generic, false, &toggles());

        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 3);

        for tool in tools {
            assert_eq!(tool["type"], "function");
            assert!(tool["function"]["name"].is_string());
        }

        assert_eq!(tools[0]["function"]["name"], "anthropic_tool");
        assert_eq!(tools[0]["function"]["parameters"]["type"], "object");
        assert_eq!(tools[2]["function"]["name"], "stringly");
    }

    #[test]
    fn glm_profile_defaults_temperature() {
        let mut body = json!({"messages": []});
        adapt(&mut body, CompatProfileId::Glm, false, &toggles());
        assert_eq!(body["temperature"], 0.8);

        let mut explicit = json!({"messages": [], "temperature": 0.1});
        adapt(&mut explicit, CompatProfileId::Glm, false, &toggles());
        assert_eq!(explicit["temperature"], 0.1);
    }

    #[test]
    fn qwen3_coder_profile_names_system_messages() {
        let mut body = json!({
            "messages": [
                {"role": "system", "content": "rules"},
                {"role": "user", "content": "hi"}
            ]
        });

        adapt(&mut body, CompatProfileId::Qwen3Coder, false, &toggles());

        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["messages"][0]["name"], "system");
        assert!(body["messages"][1].get("name").is_none());
    }

    #[test]
    fn model_scope_profile_synthesizes_prompt() {
        let mut body = json!({
            "messages": [
                {"role": "system", "content": "be kind"},
                {"role": "user", "content": "hello"}
            ]
        });

        adapt(&mut body, CompatProfileId::ModelScope, false, &toggles());

        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["stream"], true);
        assert_eq!(body["prompt"], "System: be kind\n\nUser: hello");
    }

    #[test]
    fn gemini_backend_sanitizes_tool_names() {
        let mut body = json!({
            "messages": [],
            "tools": [
                {"type": "function", "function": {"name": "fs.read-file", "parameters": {"type": "object"}}},
                {"type": "function", "function": {"name": "9begin", "parameters": {"type": "object"}}},
                {"type": "function", "function": {"name": "@@@", "parameters": {"type": "object"}}}
            ]
        });

        adapt(&mut body, CompatProfileId::Generic, true, &toggles());

        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["function"]["name"], "fs_read_file");
        assert_eq!(tools[1]["function"]["name"], "tool_9begin");
    }

    #[test]
    fn disabled_preprocessing_leaves_body_alone() {
        let mut toggles = toggles();
        toggles.unified_preprocessing = false;

        let mut body = json!({"messages": [{"role": "user", "content": {"odd": true}}]});
        let before = body.clone();

        adapt(&mut body, CompatProfileId::ModelScope, true, &toggles);

        assert_eq!(body, before);
    }
}
