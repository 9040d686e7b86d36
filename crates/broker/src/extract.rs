//! Extraction of tool calls embedded in response text.
//!
//! Several providers emit tool invocations as plain text instead of
//! structured fields: GLM writes `Tool call: Name({…})`, LM Studio wraps
//! calls in channel markers, and some models echo raw `tool_use` JSON.
//! This module scans text blocks with a sliding window and recovers real
//! tool calls from four textual patterns plus the LM Studio marker form.
//!
//! Windows are 500 code units with 100 units of overlap so a pattern head
//! never falls through a window seam; the balanced-JSON capture that
//! follows a head always runs against the full text, so argument objects
//! larger than a window are captured whole.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const WINDOW: usize = 500;
const OVERLAP: usize = 100;

/// Identifier-like names that are JavaScript builtins rather than tools.
const RESERVED_NAMES: [&str; 7] = ["console", "json", "object", "array", "string", "math", "date"];

/// A tool call recovered from text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCall {
    /// Tool name as written in the text.
    pub name: String,
    /// Parsed argument object; `{}` when the captured JSON did not parse.
    pub input: Value,
    /// Byte span of the full capture in the original text.
    pub span: Range<usize>,
}

/// Result of scanning one text block.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Calls in starting-position order.
    pub calls: Vec<ExtractedCall>,
    /// The text with all captured spans removed.
    pub remaining: String,
}

impl Extraction {
    /// Whether anything was extracted.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

fn tool_call_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Tool call:\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\(").unwrap())
}

fn tool_use_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{\s*"type"\s*:\s*"tool_use""#).unwrap())
}

fn direct_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*\{").unwrap())
}

fn function_call_fragment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""function_call"\s*:\s*\{"#).unwrap())
}

fn lm_studio_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"<\|start\|>assistant<\|channel\|>commentary to=functions\.([A-Za-z_][A-Za-z0-9_\-]*)\s*<\|constrain\|>JSON<\|message\|>",
        )
        .unwrap()
    })
}

/// Scan `text` for embedded tool calls.
///
/// Matches are emitted in the order of their starting positions; captures
/// overlapping an earlier capture are dropped.
pub fn extract_tool_calls(text: &str) -> Extraction {
    let mut candidates: BTreeMap<usize, ExtractedCall> = BTreeMap::new();

    for window in windows(text) {
        scan_window(text, window, &mut candidates);
    }

    // Left-to-right, dropping captures that overlap a kept one.
    let mut calls: Vec<ExtractedCall> = Vec::new();

    for (_, call) in candidates {
        let overlaps = calls
            .last()
            .is_some_and(|kept: &ExtractedCall| call.span.start < kept.span.end);

        if overlaps {
            continue;
        }

        calls.push(call);
    }

    let remaining = remove_spans(text, calls.iter().map(|call| call.span.clone()));

    Extraction { calls, remaining }
}

/// Byte ranges of the sliding windows, snapped to char boundaries.
fn windows(text: &str) -> Vec<Range<usize>> {
    let indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total = indices.len();

    if total == 0 {
        return Vec::new();
    }

    let mut ranges = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + WINDOW).min(total);
        let byte_start = indices[start];
        let byte_end = if end == total { text.len() } else { indices[end] };
        ranges.push(byte_start..byte_end);

        if end == total {
            break;
        }

        start = end - OVERLAP;
    }

    ranges
}

fn scan_window(text: &str, window: Range<usize>, candidates: &mut BTreeMap<usize, ExtractedCall>) {
    let slice = &text[window.clone()];
    let base = window.start;

    // LM Studio channel markers take priority over the generic patterns.
    for captures in lm_studio_re().captures_iter(slice) {
        let whole = captures.get(0).expect("regex match");
        let name = captures.get(1).expect("name group").as_str().to_string();
        let payload_start = base + whole.end();

        let (input, end) = match find_json_start(text, payload_start).and_then(|start| capture_json(text, start)) {
            Some((value, end)) => (value, end),
            // Marker payloads can be truncated; take the remainder verbatim.
            None => (parse_or_empty(text[payload_start..].trim()), text.len()),
        };

        insert_candidate(candidates, ExtractedCall { name, input, span: base + whole.start()..end });
    }

    for captures in tool_call_prefix_re().captures_iter(slice) {
        let whole = captures.get(0).expect("regex match");
        let name = captures.get(1).expect("name group").as_str().to_string();

        let Some(json_start) = find_json_start(text, base + whole.end()) else {
            continue;
        };
        let Some((input, json_end)) = capture_json(text, json_start) else {
            continue;
        };

        let end = consume_close_paren(text, json_end);
        insert_candidate(candidates, ExtractedCall { name, input, span: base + whole.start()..end });
    }

    for m in tool_use_json_re().find_iter(slice) {
        let start = base + m.start();

        let Some((value, end)) = capture_json(text, start) else {
            continue;
        };

        let name = value.get("name").and_then(Value::as_str).map(str::to_string);
        let Some(name) = name else {
            continue;
        };

        let input = value.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        insert_candidate(candidates, ExtractedCall { name, input, span: start..end });
    }

    for captures in direct_call_re().captures_iter(slice) {
        let whole = captures.get(0).expect("regex match");
        let name = captures.get(1).expect("name group").as_str();

        if RESERVED_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }

        // Skip method calls like `JSON.parse({…})`.
        if base + whole.start() > 0 && text.as_bytes()[base + whole.start() - 1] == b'.' {
            continue;
        }

        // The opening brace is the last byte of the match.
        let json_start = base + whole.end() - 1;
        let Some((input, json_end)) = capture_json(text, json_start) else {
            continue;
        };

        let end = consume_close_paren(text, json_end);
        insert_candidate(
            candidates,
            ExtractedCall {
                name: name.to_string(),
                input,
                span: base + whole.start()..end,
            },
        );
    }

    for m in function_call_fragment_re().find_iter(slice) {
        let start = base + m.start();

        // The opening brace is the last byte of the match.
        let Some((value, end)) = capture_json(text, base + m.end() - 1) else {
            continue;
        };

        let Some(name) = value.get("name").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };

        let input = match value.get("arguments") {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(Value::String(raw)) => parse_or_empty(raw),
            _ => Value::Object(Default::default()),
        };

        insert_candidate(candidates, ExtractedCall { name, input, span: start..end });
    }
}

fn insert_candidate(candidates: &mut BTreeMap<usize, ExtractedCall>, call: ExtractedCall) {
    match candidates.get(&call.span.start) {
        // Overlapping windows rediscover the same capture; keep the longer.
        Some(existing) if existing.span.end >= call.span.end => {}
        _ => {
            candidates.insert(call.span.start, call);
        }
    }
}

/// Find the first `{` at or after `from`, skipping whitespace only.
fn find_json_start(text: &str, from: usize) -> Option<usize> {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace() && *c != '(')
        .and_then(|(i, c)| (c == '{').then_some(from + i))
}

/// Capture a balanced JSON object starting at a `{`, respecting strings
/// and escapes. Returns the parsed value (or `{}` on parse failure) and the
/// byte index one past the closing brace.
fn capture_json(text: &str, start: usize) -> Option<(Value, usize)> {
    let bytes = text.as_bytes();

    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    let raw = &text[start..end];
                    return Some((parse_or_empty(raw), end));
                }
            }
            _ => {}
        }
    }

    None
}

fn parse_or_empty(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => {
            log::warn!("captured tool arguments are not an object: {other}");
            Value::Object(Default::default())
        }
        Err(error) => {
            log::warn!("captured tool arguments failed to parse: {error}");
            Value::Object(Default::default())
        }
    }
}

/// Swallow an optional `)` (plus whitespace) after a captured argument
/// object, so `Name({…})` is removed in full.
fn consume_close_paren(text: &str, from: usize) -> usize {
    let mut end = from;

    for (i, c) in text[from..].char_indices() {
        if c.is_whitespace() {
            continue;
        }
        if c == ')' {
            end = from + i + c.len_utf8();
        }
        break;
    }

    end
}

fn remove_spans(text: &str, spans: impl Iterator<Item = Range<usize>>) -> String {
    let mut remaining = String::with_capacity(text.len());
    let mut cursor = 0usize;

    for span in spans {
        remaining.push_str(&text[cursor..span.start]);
        cursor = span.end;
    }

    remaining.push_str(&text[cursor..]);
    remaining.trim_end().to_string()
}
