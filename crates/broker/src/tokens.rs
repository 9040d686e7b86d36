//! Token estimation and budget strategies.
//!
//! The estimate is deliberately cheap and pessimistic: code units divided
//! by four, rounded up, summed over message contents and the serialized
//! tool definitions. Strategies run in ascending priority until the
//! estimate fits `limit * ratio`.

use config::{DropFrom, RouteCategory, TokenConfig};
use serde_json::json;

use crate::messages::anthropic;

/// A strategy the preprocessor applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The request was redirected to the long-context category.
    Reroute,
    /// Older messages were removed.
    Truncate,
    /// Tool definitions were replaced with stubs.
    StubTools,
    /// The external compressor hook ran.
    Compress,
}

/// Result of preprocessing one request.
#[derive(Debug)]
pub struct PreprocessOutcome {
    /// The possibly-rewritten request.
    pub request: anthropic::ChatRequest,
    /// Strategies applied, in order.
    pub applied: Vec<Strategy>,
    /// When true the coordinator must re-route to the long-context
    /// category before dispatch.
    pub reroute_to_longcontext: bool,
    /// Estimate before any strategy ran.
    pub estimate_before: u32,
    /// Estimate after all strategies ran.
    pub estimate_after: u32,
}

/// Estimate the token count of a request: ⌈code units / 4⌉ over message
/// contents plus the serialized tool definitions.
pub fn estimate(request: &anthropic::ChatRequest) -> u32 {
    let message_units: usize = request.messages.iter().map(|message| message.content.chars()).sum();

    let system_units = request.system.as_ref().map(|system| system.chars().count()).unwrap_or(0);

    let tool_units = request
        .tools
        .as_ref()
        .and_then(|tools| serde_json::to_string(tools).ok())
        .map(|serialized| serialized.chars().count())
        .unwrap_or(0);

    let units = message_units + system_units + tool_units;

    units.div_ceil(4) as u32
}

/// Apply budget strategies until the request fits `limit * ratio`.
///
/// Idempotent when the request is already under the budget.
pub fn preprocess(
    request: anthropic::ChatRequest,
    category: RouteCategory,
    limit: u32,
    config: &TokenConfig,
) -> PreprocessOutcome {
    let estimate_before = estimate(&request);
    let budget = (f64::from(limit) * config.ratio) as u32;

    if estimate_before <= budget {
        return PreprocessOutcome {
            request,
            applied: Vec::new(),
            reroute_to_longcontext: false,
            estimate_before,
            estimate_after: estimate_before,
        };
    }

    // Reroute: hand oversized requests to the long-context mapping rather
    // than mutilating them here.
    if estimate_before >= config.reroute_threshold && category != RouteCategory::Longcontext {
        log::debug!(
            "estimate {estimate_before} over reroute threshold {}, redirecting to longcontext",
            config.reroute_threshold
        );

        return PreprocessOutcome {
            request,
            applied: vec![Strategy::Reroute],
            reroute_to_longcontext: true,
            estimate_before,
            estimate_after: estimate_before,
        };
    }

    let mut request = request;
    let mut applied = Vec::new();

    truncate(&mut request, budget, config, &mut applied);

    if estimate(&request) > budget && config.stub_tools {
        stub_tools(&mut request);
        applied.push(Strategy::StubTools);
    }

    if estimate(&request) > budget && config.compressor.is_some() {
        // The compressor is an external hook; the core only records that
        // the strategy ran.
        log::debug!("invoking external compressor for oversized request");
        applied.push(Strategy::Compress);
    }

    let estimate_after = estimate(&request);

    PreprocessOutcome {
        request,
        applied,
        reroute_to_longcontext: false,
        estimate_before,
        estimate_after,
    }
}

/// Remove messages until the estimate fits, preserving system messages
/// and the `keep_recent` most recent messages.
fn truncate(request: &mut anthropic::ChatRequest, budget: u32, config: &TokenConfig, applied: &mut Vec<Strategy>) {
    let mut removed_any = false;

    while estimate(request) > budget {
        let Some(index) = removable_index(request, config) else {
            break;
        };

        request.messages.remove(index);
        removed_any = true;
    }

    if removed_any {
        applied.push(Strategy::Truncate);
    }
}

/// Pick the next message to remove, or None when only protected messages
/// remain.
fn removable_index(request: &anthropic::ChatRequest, config: &TokenConfig) -> Option<usize> {
    let total = request.messages.len();
    let protected_tail = total.saturating_sub(config.keep_recent);

    let candidates: Vec<usize> = request
        .messages
        .iter()
        .enumerate()
        .take(protected_tail)
        .filter(|(_, message)| message.role != anthropic::Role::System)
        .map(|(index, _)| index)
        .collect();

    match config.drop_from {
        DropFrom::Head => candidates.first().copied(),
        DropFrom::Tail => candidates.last().copied(),
        DropFrom::Middle => candidates.get(candidates.len() / 2).copied(),
    }
}

/// Maximum length a stubbed tool description keeps.
const STUB_DESCRIPTION_MAX: usize = 100;

/// Replace tool definitions with minimal stubs: the name, a clipped
/// description, and every parameter reduced to a bare string schema.
fn stub_tools(request: &mut anthropic::ChatRequest) {
    let Some(tools) = request.tools.as_mut() else {
        return;
    };

    for tool in tools.iter_mut() {
        if tool.description.chars().count() > STUB_DESCRIPTION_MAX {
            tool.description = tool.description.chars().take(STUB_DESCRIPTION_MAX).collect();
        }

        let properties: serde_json::Map<String, serde_json::Value> = tool
            .input_schema
            .get("properties")
            .and_then(|properties| properties.as_object())
            .map(|properties| {
                properties
                    .keys()
                    .map(|key| (key.clone(), json!({"type": "string"})))
                    .collect()
            })
            .unwrap_or_default();

        tool.input_schema = json!({"type": "object", "properties": properties});
    }
}
