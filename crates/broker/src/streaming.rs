//! SSE translation for streaming responses.
//!
//! OpenAI-protocol chunks are reshaped into Anthropic stream events as
//! they arrive: text deltas forward immediately, tool-call deltas build
//! `tool_use` blocks, and the accumulated text is scanned for embedded
//! tool-call syntax once the last delta is seen. The terminal event's
//! stop reason is decided only at that point, so a tool call discovered
//! in text still yields `stop_reason: tool_use`.

use config::Toggles;
use futures::StreamExt;

use crate::extract;
use crate::messages::{anthropic, openai};
use crate::provider::SseStream;
use crate::request::RequestContext;

/// Translate an upstream OpenAI SSE stream into Anthropic stream events.
///
/// Takes ownership of the request context: the context must live as long
/// as the stream, and dropping it (client disconnect) cancels the
/// upstream consumption.
pub fn openai_sse_to_anthropic(
    upstream: SseStream,
    model: String,
    toggles: Toggles,
    context: RequestContext,
) -> impl futures::Stream<Item = anthropic::StreamEvent> {
    let (tx, rx) = tokio::sync::mpsc::channel::<anthropic::StreamEvent>(32);

    tokio::spawn(async move {
        let mut upstream = upstream;
        let mut state = StreamState::new(model);
        let cancellation = context.cancellation();

        loop {
            let payload = tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                payload = upstream.next() => payload,
            };

            let Some(payload) = payload else {
                break;
            };

            let data = match payload {
                Ok(data) => data,
                Err(error) => {
                    log::warn!("request {} stream error: {error}", context.request_id());
                    continue;
                }
            };

            let Ok(chunk) = sonic_rs::from_str::<openai::StreamChunk>(&data) else {
                log::warn!("request {} received unparseable stream chunk", context.request_id());
                continue;
            };

            for event in state.absorb(chunk) {
                if tx.send(event).await.is_err() {
                    // Client went away; partial data is discarded.
                    return;
                }
            }
        }

        for event in state.finish(&toggles) {
            if tx.send(event).await.is_err() {
                return;
            }
        }

        log::debug!(
            "request {} stream complete in {:?}",
            context.request_id(),
            context.elapsed()
        );
    });

    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
}

/// Emit the event sequence of a complete response as one synthetic
/// stream. Used when the upstream provider cannot stream but the caller
/// asked for SSE.
pub fn synthesize_events(response: anthropic::ChatResponse) -> Vec<anthropic::StreamEvent> {
    let mut events = vec![anthropic::StreamEvent::MessageStart {
        message: anthropic::StreamMessageStart {
            id: response.id.clone(),
            message_type: "message".into(),
            role: anthropic::Role::Assistant,
            content: Vec::new(),
            model: response.model.clone(),
            usage: anthropic::Usage {
                input_tokens: response.usage.input_tokens,
                output_tokens: 0,
            },
        },
    }];

    for (index, block) in response.content.iter().enumerate() {
        let index = index as u32;

        match block {
            anthropic::ContentBlock::Text { text } => {
                events.push(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: anthropic::ContentBlock::Text { text: String::new() },
                });
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::TextDelta { text: text.clone() },
                });
            }
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                events.push(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::json!({}),
                    },
                });
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
            }
            anthropic::ContentBlock::ToolResult { .. } => continue,
        }

        events.push(anthropic::StreamEvent::ContentBlockStop { index });
    }

    events.push(anthropic::StreamEvent::MessageDelta {
        delta: anthropic::MessageDelta {
            stop_reason: response.stop_reason,
            stop_sequence: response.stop_sequence,
        },
        usage: response.usage,
    });
    events.push(anthropic::StreamEvent::MessageStop);

    events
}

/// One tool call being assembled from streaming deltas.
struct StreamingToolCall {
    block_index: u32,
    arguments: String,
}

/// Translation state across chunks.
struct StreamState {
    model: String,
    message_id: Option<String>,
    text_block_open: bool,
    accumulated_text: String,
    next_block_index: u32,
    open_tool: Option<StreamingToolCall>,
    tool_blocks: u32,
    finish_reason: Option<openai::FinishReason>,
    usage: Option<openai::Usage>,
}

impl StreamState {
    fn new(model: String) -> Self {
        Self {
            model,
            message_id: None,
            text_block_open: false,
            accumulated_text: String::new(),
            next_block_index: 0,
            open_tool: None,
            tool_blocks: 0,
            finish_reason: None,
            usage: None,
        }
    }

    fn ensure_started(&mut self, chunk_id: &str, events: &mut Vec<anthropic::StreamEvent>) {
        if self.message_id.is_some() {
            return;
        }

        let id = if chunk_id.is_empty() {
            format!("msg_{}", uuid::Uuid::new_v4().simple())
        } else {
            chunk_id.to_string()
        };

        events.push(anthropic::StreamEvent::MessageStart {
            message: anthropic::StreamMessageStart {
                id: id.clone(),
                message_type: "message".into(),
                role: anthropic::Role::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                usage: anthropic::Usage::default(),
            },
        });

        self.message_id = Some(id);
    }

    fn absorb(&mut self, chunk: openai::StreamChunk) -> Vec<anthropic::StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        self.ensure_started(&chunk.id, &mut events);

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            if !self.text_block_open && self.open_tool.is_none() {
                events.push(anthropic::StreamEvent::ContentBlockStart {
                    index: self.next_block_index,
                    content_block: anthropic::ContentBlock::Text { text: String::new() },
                });
                self.text_block_open = true;
            }

            if self.text_block_open {
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index: self.next_block_index,
                    delta: anthropic::ContentDelta::TextDelta { text: text.clone() },
                });
            }

            self.accumulated_text.push_str(&text);
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            self.absorb_tool_delta(delta, &mut events);
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        events
    }

    fn absorb_tool_delta(&mut self, delta: openai::ToolCallDelta, events: &mut Vec<anthropic::StreamEvent>) {
        let starts_new_call = delta.id.is_some()
            || delta
                .function
                .as_ref()
                .is_some_and(|function| function.name.is_some());

        if starts_new_call {
            self.close_text_block(events);
            self.close_tool_block(events);

            let id = delta
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let name = delta
                .function
                .as_ref()
                .and_then(|function| function.name.clone())
                .unwrap_or_default();

            events.push(anthropic::StreamEvent::ContentBlockStart {
                index: self.next_block_index,
                content_block: anthropic::ContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::json!({}),
                },
            });

            self.open_tool = Some(StreamingToolCall {
                block_index: self.next_block_index,
                arguments: String::new(),
            });
            self.tool_blocks += 1;
        }

        if let (Some(open), Some(function)) = (self.open_tool.as_mut(), delta.function) {
            if let Some(fragment) = function.arguments
                && !fragment.is_empty()
            {
                open.arguments.push_str(&fragment);
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index: open.block_index,
                    delta: anthropic::ContentDelta::InputJsonDelta { partial_json: fragment },
                });
            }
        }
    }

    fn close_text_block(&mut self, events: &mut Vec<anthropic::StreamEvent>) {
        if self.text_block_open {
            events.push(anthropic::StreamEvent::ContentBlockStop {
                index: self.next_block_index,
            });
            self.text_block_open = false;
            self.next_block_index += 1;
        }
    }

    fn close_tool_block(&mut self, events: &mut Vec<anthropic::StreamEvent>) {
        if let Some(open) = self.open_tool.take() {
            events.push(anthropic::StreamEvent::ContentBlockStop {
                index: open.block_index,
            });
            self.next_block_index += 1;
        }
    }

    /// Emit the terminal events once the last delta is seen.
    fn finish(mut self, toggles: &Toggles) -> Vec<anthropic::StreamEvent> {
        let mut events = Vec::new();

        if self.message_id.is_none() {
            // Nothing arrived at all.
            let had_output = self.usage.is_some_and(|usage| usage.completion_tokens > 0);

            if had_output {
                events.push(anthropic::StreamEvent::Error {
                    error: anthropic::ErrorDetails {
                        error_type: "abnormal_response".into(),
                        message: "missing_finish_reason: stream ended with output tokens but no events".into(),
                    },
                });
            }

            return events;
        }

        self.close_text_block(&mut events);
        self.close_tool_block(&mut events);

        // Sliding-window extraction over everything that streamed as text.
        let mut extracted_tools = 0u32;

        if (toggles.patches.lmstudio || toggles.patches.text_tool_call) && !self.accumulated_text.is_empty() {
            let extraction = extract::extract_tool_calls(&self.accumulated_text);

            for call in extraction.calls {
                let index = self.next_block_index;

                events.push(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                        name: call.name,
                        input: serde_json::json!({}),
                    },
                });
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::InputJsonDelta {
                        partial_json: call.input.to_string(),
                    },
                });
                events.push(anthropic::StreamEvent::ContentBlockStop { index });

                self.next_block_index += 1;
                extracted_tools += 1;
            }
        }

        let output_tokens = self.usage.map(|usage| usage.completion_tokens).unwrap_or(0);
        let any_tools = self.tool_blocks > 0 || extracted_tools > 0;

        let stop_reason = if any_tools && toggles.patches.finish_reason {
            Some(anthropic::StopReason::ToolUse)
        } else {
            match self.finish_reason.take() {
                Some(reason) => crate::transform::openai_finish_to_stop(reason),
                None if output_tokens > 0 => {
                    // Provider closed the stream without a finish reason:
                    // abnormal, never silently normalized.
                    events.push(anthropic::StreamEvent::Error {
                        error: anthropic::ErrorDetails {
                            error_type: "abnormal_response".into(),
                            message: format!(
                                "missing_finish_reason: stream ended with {output_tokens} output tokens but no finish reason"
                            ),
                        },
                    });
                    return events;
                }
                None => Some(anthropic::StopReason::EndTurn),
            }
        };

        events.push(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDelta {
                stop_reason,
                stop_sequence: None,
            },
            usage: anthropic::Usage {
                input_tokens: self.usage.map(|usage| usage.prompt_tokens).unwrap_or(0),
                output_tokens,
            },
        });
        events.push(anthropic::StreamEvent::MessageStop);

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: serde_json::Value) -> openai::StreamChunk {
        serde_json::from_value(value).unwrap()
    }

    fn collect_types(events: &[anthropic::StreamEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|event| match event {
                anthropic::StreamEvent::MessageStart { .. } => "message_start",
                anthropic::StreamEvent::ContentBlockStart { .. } => "content_block_start",
                anthropic::StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
                anthropic::StreamEvent::ContentBlockStop { .. } => "content_block_stop",
                anthropic::StreamEvent::MessageDelta { .. } => "message_delta",
                anthropic::StreamEvent::MessageStop => "message_stop",
                anthropic::StreamEvent::Ping => "ping",
                anthropic::StreamEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[test]
    fn text_chunks_forward_immediately() {
        let mut state = StreamState::new("m".into());

        let events = state.absorb(chunk(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}}]
        })));

        assert_eq!(
            collect_types(&events),
            ["message_start", "content_block_start", "content_block_delta"]
        );

        let more = state.absorb(chunk(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "delta": {"content": "lo"}}]
        })));

        assert_eq!(collect_types(&more), ["content_block_delta"]);
    }

    #[test]
    fn plain_text_stream_ends_with_end_turn() {
        let mut state = StreamState::new("m".into());

        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "hi"}}]
        })));
        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        })));

        let events = state.finish(&Toggles::default());
        let types = collect_types(&events);

        assert_eq!(types, ["content_block_stop", "message_delta", "message_stop"]);

        let anthropic::StreamEvent::MessageDelta { delta, .. } = &events[1] else {
            unreachable!("expected message delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::EndTurn));
    }

    #[test]
    fn structured_tool_call_streams_as_tool_use_block() {
        let mut state = StreamState::new("m".into());

        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {"role": "assistant"}}]
        })));

        let events = state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "function": {"name": "Read", "arguments": "{\"pa"}
            }]}}]
        })));

        assert_eq!(collect_types(&events), ["content_block_start", "content_block_delta"]);

        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "th\":\"/x\"}"}
            }]}}]
        })));

        let events = state.finish(&Toggles::default());

        let anthropic::StreamEvent::MessageDelta { delta, .. } = events
            .iter()
            .find(|event| matches!(event, anthropic::StreamEvent::MessageDelta { .. }))
            .unwrap()
        else {
            unreachable!("expected message delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[test]
    fn embedded_tool_call_in_streamed_text_overrides_stop_reason() {
        let mut state = StreamState::new("m".into());

        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Tool call: Edit({\"file\":\"/a\"})"}}]
        })));
        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        })));

        let events = state.finish(&Toggles::default());

        // The extracted call becomes a tool_use block after the text.
        assert!(
            events
                .iter()
                .any(|event| matches!(event, anthropic::StreamEvent::ContentBlockStart {
                    content_block: anthropic::ContentBlock::ToolUse { .. },
                    ..
                }))
        );

        let anthropic::StreamEvent::MessageDelta { delta, .. } = events
            .iter()
            .find(|event| matches!(event, anthropic::StreamEvent::MessageDelta { .. }))
            .unwrap()
        else {
            unreachable!("expected message delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[test]
    fn missing_finish_reason_with_output_is_abnormal() {
        let mut state = StreamState::new("m".into());

        state.absorb(chunk(json!({
            "id": "c",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "partial"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 7, "total_tokens": 8}
        })));

        let events = state.finish(&Toggles::default());

        assert!(
            events
                .iter()
                .any(|event| matches!(event, anthropic::StreamEvent::Error { .. }))
        );
    }

    #[test]
    fn synthesized_stream_covers_all_blocks() {
        let response = anthropic::ChatResponse {
            id: "msg_1".into(),
            r#type: "message".into(),
            role: anthropic::Role::Assistant,
            content: vec![
                anthropic::ContentBlock::Text { text: "hi".into() },
                anthropic::ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "Read".into(),
                    input: json!({"path": "/x"}),
                },
            ],
            model: "m".into(),
            stop_reason: Some(anthropic::StopReason::ToolUse),
            stop_sequence: None,
            usage: anthropic::Usage {
                input_tokens: 3,
                output_tokens: 4,
            },
        };

        let events = synthesize_events(response);
        let types = collect_types(&events);

        assert_eq!(
            types,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
    }
}
