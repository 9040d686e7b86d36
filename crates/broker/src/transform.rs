//! Bidirectional wire-format translation.
//!
//! Every map in this module is a pure function over its input: no process
//! globals, no clocks, no configuration. Request direction translates the
//! canonical Anthropic shape into what the upstream protocol expects;
//! response direction translates upstream bodies back into the Anthropic
//! shape.

mod from_gemini;
mod from_openai;
mod request_in;
mod response_out;
mod to_gemini;
mod to_openai;

pub use from_gemini::gemini_to_anthropic;
pub use from_openai::{map_finish_reason as openai_finish_to_stop, openai_to_anthropic};
pub use request_in::{gemini_request_to_anthropic, openai_request_to_anthropic};
pub use response_out::{anthropic_response_to_gemini, anthropic_response_to_openai};
pub use to_gemini::anthropic_to_gemini;
pub use to_openai::anthropic_to_openai;

use serde_json::Value;

/// Maximum length of a Gemini tool name (one leading alpha plus 63 more).
const GEMINI_NAME_MAX: usize = 64;

/// JSON-Schema fields Gemini's function declarations reject.
const UNSUPPORTED_SCHEMA_FIELDS: [&str; 12] = [
    "additionalProperties",
    "pattern",
    "minLength",
    "maxLength",
    "format",
    "const",
    "enum",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "$schema",
];

/// Sanitize a tool name for a Gemini-backed provider.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, runs of `_` collapse, and
/// a name whose first character is not alphabetic gets a `tool_` prefix.
/// Returns `None` when nothing salvageable remains (an all-symbol name).
pub fn sanitize_tool_name(name: &str) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    if !collapsed.chars().any(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let mut sanitized = if collapsed.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        collapsed
    } else {
        format!("tool_{collapsed}")
    };

    sanitized.truncate(GEMINI_NAME_MAX);

    is_valid_gemini_tool_name(&sanitized).then_some(sanitized)
}

/// Whether a name already satisfies `^[A-Za-z][A-Za-z0-9_]{0,63}$`.
pub fn is_valid_gemini_tool_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };

    first.is_ascii_alphabetic() && name.len() <= GEMINI_NAME_MAX && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Recursively remove JSON-Schema fields Gemini does not accept.
pub fn strip_unsupported_schema_fields(mut value: Value) -> Value {
    if let Some(object) = value.as_object_mut() {
        for field in UNSUPPORTED_SCHEMA_FIELDS {
            object.remove(field);
        }

        if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
            for (_, property) in properties.iter_mut() {
                *property = strip_unsupported_schema_fields(property.take());
            }
        }

        if let Some(items) = object.get_mut("items") {
            *items = strip_unsupported_schema_fields(items.take());
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitizes_dots_and_hyphens() {
        assert_eq!(sanitize_tool_name("fs.read-file").as_deref(), Some("fs_read_file"));
    }

    #[test]
    fn prefixes_leading_non_alpha() {
        assert_eq!(sanitize_tool_name("9lives").as_deref(), Some("tool_9lives"));
        assert_eq!(sanitize_tool_name("_private").as_deref(), Some("tool__private"));
    }

    #[test]
    fn drops_all_symbol_names() {
        assert_eq!(sanitize_tool_name("@#$%"), None);
        assert_eq!(sanitize_tool_name(""), None);
    }

    #[test]
    fn truncates_to_sixty_four() {
        let long = "a".repeat(100);
        let sanitized = sanitize_tool_name(&long).unwrap();
        assert_eq!(sanitized.len(), 64);
        assert!(is_valid_gemini_tool_name(&sanitized));
    }

    #[test]
    fn valid_names_pass_through_unchanged() {
        assert_eq!(sanitize_tool_name("get_weather").as_deref(), Some("get_weather"));
    }

    #[test]
    fn strips_unsupported_fields_recursively() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "mode": {"type": "string", "enum": ["a", "b"], "pattern": "^a"},
                "nested": {
                    "type": "object",
                    "properties": {"id": {"type": "string", "format": "uuid"}},
                    "not": {"type": "null"}
                },
                "list": {"type": "array", "items": {"type": "string", "minLength": 1}}
            }
        });

        let cleaned = strip_unsupported_schema_fields(schema);

        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["mode"].get("enum").is_none());
        assert!(cleaned["properties"]["mode"].get("pattern").is_none());
        assert!(cleaned["properties"]["nested"].get("not").is_none());
        assert!(cleaned["properties"]["nested"]["properties"]["id"].get("format").is_none());
        assert!(cleaned["properties"]["list"]["items"].get("minLength").is_none());
        assert_eq!(cleaned["type"], "object");
    }
}
