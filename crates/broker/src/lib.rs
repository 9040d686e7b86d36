//! Multi-provider LLM request router and format broker.
//!
//! Accepts requests in the Anthropic messages wire format (plus OpenAI,
//! Gemini, and auto-detected pass-through surfaces), classifies and routes
//! them to a configured upstream provider, translates wire formats in both
//! directions, and repairs provider-specific shape drift so the caller
//! always observes a stable Anthropic-shaped response.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use serde_json::Value;

pub mod compat;
mod coordinator;
pub mod credentials;
pub mod detect;
pub mod error;
pub mod extract;
pub mod messages;
pub mod pipeline;
pub mod provider;
pub mod request;
pub mod routing;
mod server;
pub mod streaming;
pub mod tokens;
pub mod transform;

pub use error::{AnthropicErrorResponse, AnthropicResult, BrokerError, BrokerResult, TaggedError};
pub use server::{BrokerServer, PortRegistry};

/// Handler-level result carrying request-tagged errors.
type HandlerResult<T> = std::result::Result<T, TaggedError>;

use messages::{anthropic, gemini, openai};
use request::RequestContext;
use server::BrokerServerBuilder;

/// Build the per-port server state from a configuration snapshot.
pub fn build_server(config: &config::Config, toggles: config::Toggles, port: u16) -> anyhow::Result<Arc<BrokerServer>> {
    let server = BrokerServerBuilder::new(config, toggles, port)
        .build()
        .map_err(|error| anyhow::anyhow!("failed to initialize broker: {error}"))?;

    Ok(Arc::new(server))
}

/// Creates an axum router over an already-built server.
pub fn routes(server: Arc<BrokerServer>) -> Router {
    Router::new()
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1beta/models/{model}/generateContent", post(gemini_generate))
        .route("/v1/proxy/{provider}/{model}", post(proxy))
        .route("/v1/models", get(list_models))
        .with_state(server)
}

/// Convenience: build the server and its router in one call.
pub fn router(config: &config::Config, toggles: config::Toggles, port: u16) -> anyhow::Result<Router> {
    Ok(routes(build_server(config, toggles, port)?))
}

/// Handle Anthropic messages requests.
///
/// Supports both streaming (SSE) and non-streaming responses.
async fn anthropic_messages(
    State(server): State<Arc<BrokerServer>>,
    Sonic(request): Sonic<anthropic::ChatRequest>,
) -> AnthropicResult<axum::response::Response> {
    let context = RequestContext::new(server_port(&server));

    log::debug!(
        "request {} on /v1/messages for model {} ({} message(s), streaming: {})",
        context.request_id(),
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    if request.stream.unwrap_or(false) {
        let stream = server
            .handle_stream(request, context)
            .await
            .map_err(AnthropicErrorResponse::from)?;

        let events = stream.map(|event| {
            let json = sonic_rs::to_string(&event).unwrap_or_else(|error| {
                log::error!("failed to serialize stream event: {error}");
                r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_string()
            });

            Ok::<_, Infallible>(Event::default().data(json))
        });

        return Ok(Sse::new(events).into_response());
    }

    let response = server.handle(request, &context).await.map_err(|error| {
        log_failure(&context, &error);
        AnthropicErrorResponse::from(error)
    })?;

    log::debug!("request {} completed in {:?}", context.request_id(), context.elapsed());

    Ok(Json(response).into_response())
}

/// Handle OpenAI chat completion requests by converting through the
/// canonical Anthropic shape.
async fn chat_completions(
    State(server): State<Arc<BrokerServer>>,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> HandlerResult<axum::response::Response> {
    let context = RequestContext::new(server_port(&server));
    let streaming = request.stream.unwrap_or(false);

    log::debug!(
        "request {} on /v1/chat/completions for model {}",
        context.request_id(),
        request.model
    );

    let canonical = transform::openai_request_to_anthropic(request);

    let response = server.handle(canonical, &context).await.map_err(|error| {
        log_failure(&context, &error);
        tagged(error, &context)
    })?;

    let response = transform::anthropic_response_to_openai(response);

    if streaming {
        let events = openai_chunk_events(response);
        return Ok(Sse::new(futures::stream::iter(events)).into_response());
    }

    Ok(Json(response).into_response())
}

/// Handle Gemini generateContent requests.
async fn gemini_generate(
    State(server): State<Arc<BrokerServer>>,
    Path(model): Path<String>,
    Sonic(request): Sonic<gemini::GenerateContentRequest>,
) -> HandlerResult<axum::response::Response> {
    let context = RequestContext::new(server_port(&server));

    log::debug!(
        "request {} on /v1beta generateContent for model {model}",
        context.request_id()
    );

    let canonical = transform::gemini_request_to_anthropic(request, &model);

    let response = server.handle(canonical, &context).await.map_err(|error| {
        log_failure(&context, &error);
        tagged(error, &context)
    })?;

    Ok(Json(transform::anthropic_response_to_gemini(response)).into_response())
}

/// Handle pass-through requests with format auto-detection.
async fn proxy(
    State(server): State<Arc<BrokerServer>>,
    Path((provider, model)): Path<(String, String)>,
    Sonic(body): Sonic<Value>,
) -> HandlerResult<axum::response::Response> {
    let context = RequestContext::new(server_port(&server));
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    log::debug!(
        "request {} on /v1/proxy/{provider}/{model} (streaming: {streaming})",
        context.request_id()
    );

    if streaming {
        let stream = server
            .handle_proxy_stream(&provider, &model, body, context)
            .await
            .map_err(Into::<TaggedError>::into)?;

        let events = stream.map(|event| {
            let json = sonic_rs::to_string(&event).unwrap_or_else(|error| {
                log::error!("failed to serialize stream event: {error}");
                r#"{"type":"error"}"#.to_string()
            });

            Ok::<_, Infallible>(Event::default().data(json))
        });

        return Ok(Sse::new(events).into_response());
    }

    let response = server
        .handle_proxy(&provider, &model, body, &context)
        .await
        .map_err(|error| {
            log_failure(&context, &error);
            tagged(error, &context)
        })?;

    Ok(Json(response).into_response())
}

/// Handle list models requests.
async fn list_models(State(server): State<Arc<BrokerServer>>) -> HandlerResult<impl IntoResponse> {
    let response = server.models();

    log::debug!("returning {} model(s)", response.data.len());
    Ok(Json(response))
}

fn server_port(server: &BrokerServer) -> u16 {
    server.port()
}

fn tagged(error: BrokerError, context: &RequestContext) -> TaggedError {
    TaggedError {
        error,
        provider: context
            .metadata()
            .get("provider")
            .and_then(Value::as_str)
            .map(str::to_string),
        model: None,
        request_id: Some(context.request_id().to_string()),
        stage: Some(context.stage().to_string()),
    }
}

fn log_failure(context: &RequestContext, error: &BrokerError) {
    log::error!(
        "request {} failed in stage {} after {:?}: {} ({})",
        context.request_id(),
        context.stage(),
        context.elapsed(),
        error::sanitize(&error.to_string()),
        error.code(),
    );
}

/// Synthesize the OpenAI streaming chunk sequence for a completed
/// response: one content chunk, one terminal chunk, then `[DONE]`.
fn openai_chunk_events(response: openai::ChatCompletionResponse) -> Vec<std::result::Result<Event, Infallible>> {
    let mut events = Vec::new();

    let finish_reason = response.choices.first().and_then(|choice| choice.finish_reason.clone());
    let message = response.choices.into_iter().next().map(|choice| choice.message);

    let content_chunk = openai::StreamChunk {
        id: response.id.clone(),
        model: response.model.clone(),
        choices: vec![openai::StreamChoice {
            index: 0,
            delta: openai::Delta {
                role: Some(openai::ChatRole::Assistant),
                content: message.as_ref().and_then(|message| message.content.clone()),
                tool_calls: message.and_then(|message| message.tool_calls).map(|calls| {
                    calls
                        .into_iter()
                        .enumerate()
                        .map(|(index, call)| openai::ToolCallDelta {
                            index,
                            id: Some(call.id),
                            function: Some(openai::FunctionCallDelta {
                                name: Some(call.function.name),
                                arguments: Some(call.function.arguments),
                            }),
                        })
                        .collect()
                }),
            },
            finish_reason: None,
        }],
        usage: None,
    };

    let terminal_chunk = openai::StreamChunk {
        id: response.id,
        model: response.model,
        choices: vec![openai::StreamChoice {
            index: 0,
            delta: openai::Delta::default(),
            finish_reason,
        }],
        usage: response.usage,
    };

    for chunk in [content_chunk, terminal_chunk] {
        let json = sonic_rs::to_string(&chunk).unwrap_or_else(|error| {
            log::error!("failed to serialize chunk: {error}");
            r#"{"error":"serialization failed"}"#.to_string()
        });
        events.push(Ok(Event::default().data(json)));
    }

    events.push(Ok(Event::default().data("[DONE]")));
    events
}
