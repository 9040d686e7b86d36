//! Per-request stage wiring.
//!
//! One request runs through six stages in strict order: router → token
//! preprocessor → transformer → server-compat → upstream I/O → response
//! pipeline. The coordinator owns the request context and the final
//! assembly for both the unary and the streaming paths.

use config::{Protocol, RouteCategory};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};

use crate::compat;
use crate::detect;
use crate::error::{BrokerError, BrokerResult};
use crate::messages::anthropic;
use crate::request::RequestContext;
use crate::routing::RoutingDecision;
use crate::server::BrokerServer;
use crate::streaming;
use crate::tokens;
use crate::transform;

impl BrokerServer {
    /// Body validation performed before anything contacts an upstream.
    pub(crate) fn validate(request: &anthropic::ChatRequest) -> BrokerResult<()> {
        if request.messages.is_empty() {
            return Err(BrokerError::Validation("messages must be present and non-empty".into()));
        }

        Ok(())
    }

    /// Router and token-preprocessor stages: classify, budget, and
    /// possibly redirect to the long-context mapping.
    fn prepare(
        &self,
        request: anthropic::ChatRequest,
        context: &RequestContext,
    ) -> BrokerResult<(anthropic::ChatRequest, RoutingDecision)> {
        Self::validate(&request)?;

        context.set_stage("router");
        let decision = self.engine.route(&request, context.request_id())?;

        let outcome = tokens::preprocess(request, decision.category, decision.max_input_tokens, &self.tokens);

        let decision = if outcome.reroute_to_longcontext {
            self.engine.reroute(RouteCategory::Longcontext, decision.category)?
        } else {
            decision
        };

        if !outcome.applied.is_empty() {
            context.insert_metadata(
                "token_strategies",
                json!(outcome.applied.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>()),
            );
            log::debug!(
                "request {} token estimate {} -> {} via {:?}",
                context.request_id(),
                outcome.estimate_before,
                outcome.estimate_after,
                outcome.applied
            );
        }

        context.insert_metadata("category", json!(decision.category.as_str()));
        context.insert_metadata("provider", json!(decision.provider));

        Ok((outcome.request, decision))
    }

    /// Transformer stage: canonical request to the protocol body of the
    /// selected provider.
    fn protocol_body(&self, request: anthropic::ChatRequest, decision: &RoutingDecision) -> BrokerResult<Value> {
        let body = match decision.protocol {
            Protocol::Openai => serde_json::to_value(transform::anthropic_to_openai(request)),
            Protocol::Gemini => serde_json::to_value(transform::anthropic_to_gemini(request)),
            Protocol::Anthropic => serde_json::to_value(&request),
        };

        body.map_err(|error| BrokerError::Internal(Some(format!("request serialization failed: {error}"))))
    }

    /// Stages three through six for a prepared request.
    async fn dispatch(
        &self,
        mut request: anthropic::ChatRequest,
        decision: &RoutingDecision,
        context: &RequestContext,
    ) -> BrokerResult<anthropic::ChatResponse> {
        let caller_model = request.model.clone();
        request.model = decision.model.clone();

        context.set_stage("transformer");
        let mut body = self.protocol_body(request, decision)?;

        context.set_stage("server-compat");
        if decision.protocol == Protocol::Openai {
            compat::request::adapt(
                &mut body,
                decision.profile,
                compat::is_gemini_backed(&decision.provider, &decision.model),
                &self.toggles,
            );
        }

        context.set_stage("upstream");
        let provider = self.provider(&decision.provider)?;
        let raw = provider.send(&decision.model, body, context).await?;

        context.set_stage("response-pipeline");
        let mut response = self.pipeline.run(raw, decision, context)?;

        // The caller sees the model name it asked for.
        response.model = caller_model;

        Ok(response)
    }

    /// Non-streaming request path.
    pub async fn handle(
        &self,
        request: anthropic::ChatRequest,
        context: &RequestContext,
    ) -> BrokerResult<anthropic::ChatResponse> {
        let (request, decision) = self.prepare(request, context)?;
        self.dispatch(request, &decision, context).await
    }

    /// Streaming request path. Takes ownership of the context: it must
    /// outlive the returned stream, and dropping the stream cancels the
    /// upstream consumption through the context's cancellation token.
    pub async fn handle_stream(
        &self,
        request: anthropic::ChatRequest,
        context: RequestContext,
    ) -> BrokerResult<BoxStream<'static, anthropic::StreamEvent>> {
        let (mut request, decision) = self.prepare(request, &context)?;
        let caller_model = request.model.clone();

        let provider = self.provider(&decision.provider)?;

        if provider.supports_streaming() && decision.protocol == Protocol::Openai {
            request.model = decision.model.clone();

            context.set_stage("transformer");
            let mut body = self.protocol_body(request, &decision)?;

            context.set_stage("server-compat");
            compat::request::adapt(
                &mut body,
                decision.profile,
                compat::is_gemini_backed(&decision.provider, &decision.model),
                &self.toggles,
            );

            context.set_stage("upstream");
            let upstream = provider.send_stream(&decision.model, body, &context).await?;

            context.set_stage("response-pipeline");
            let events = streaming::openai_sse_to_anthropic(upstream, caller_model, self.toggles.clone(), context);

            return Ok(Box::pin(events));
        }

        // Providers without streaming support get a unary call and a
        // synthesized event sequence.
        let response = self.dispatch(request, &decision, &context).await?;
        let events = streaming::synthesize_events(response);

        Ok(Box::pin(futures::stream::iter(events)))
    }

    /// Pass-through path: the caller names provider and model; the body
    /// format is auto-detected.
    pub async fn handle_proxy(
        &self,
        provider_id: &str,
        model: &str,
        body: Value,
        context: &RequestContext,
    ) -> BrokerResult<anthropic::ChatResponse> {
        let request = match detect::detect_request(&body) {
            detect::RequestKind::Anthropic => serde_json::from_value::<anthropic::ChatRequest>(body)
                .map_err(|error| BrokerError::Validation(format!("malformed Anthropic body: {error}")))?,
            detect::RequestKind::OpenAi => {
                let parsed = serde_json::from_value(body)
                    .map_err(|error| BrokerError::Validation(format!("malformed OpenAI body: {error}")))?;
                transform::openai_request_to_anthropic(parsed)
            }
            detect::RequestKind::Gemini => {
                let parsed = serde_json::from_value(body)
                    .map_err(|error| BrokerError::Validation(format!("malformed Gemini body: {error}")))?;
                transform::gemini_request_to_anthropic(parsed, model)
            }
        };

        Self::validate(&request)?;

        context.set_stage("router");
        let decision = self.engine.route_direct(provider_id, model)?;

        self.dispatch(request, &decision, context).await
    }

    /// Streaming variant of the pass-through path.
    pub async fn handle_proxy_stream(
        &self,
        provider_id: &str,
        model: &str,
        body: Value,
        context: RequestContext,
    ) -> BrokerResult<BoxStream<'static, anthropic::StreamEvent>> {
        let response = self.handle_proxy(provider_id, model, body, &context).await?;
        Ok(futures::stream::iter(streaming::synthesize_events(response)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, SseStream};
    use crate::server::BrokerServerBuilder;
    use async_trait::async_trait;
    use config::{Config, Toggles};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Provider stub that records calls and replays a canned body.
    struct StubProvider {
        name: String,
        body: Value,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, model: &str, _body: Value, _context: &RequestContext) -> BrokerResult<Value> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{model}", self.name));
            Ok(self.body.clone())
        }

        async fn send_stream(&self, _model: &str, _body: Value, _context: &RequestContext) -> BrokerResult<SseStream> {
            Err(BrokerError::Internal(None))
        }

        fn supports_streaming(&self) -> bool {
            false
        }
    }

    fn test_config() -> Config {
        toml::from_str(indoc::indoc! {r#"
            [providers.shuaihong-openai]
            type = "openai"
            api_key = "sk-test"

            [providers.glm]
            type = "openai"
            api_key = "sk-test"
            profile = "glm"

            [routing.categories.default]
            provider = "glm"
            model = "glm-4"

            [routing.categories.longcontext]
            provider = "shuaihong-openai"
            model = "gemini-2-pro"
        "#})
        .unwrap()
    }

    fn server_with_stub(body: Value, calls: Arc<Mutex<Vec<String>>>) -> BrokerServer {
        let config = test_config();
        let mut server = BrokerServerBuilder::new(&config, Toggles::default(), 5511)
            .build()
            .unwrap();

        for name in ["shuaihong-openai", "glm"] {
            server.providers.insert(
                name.to_string(),
                Arc::new(StubProvider {
                    name: name.to_string(),
                    body: body.clone(),
                    calls: calls.clone(),
                }),
            );
        }

        server
    }

    fn text_body() -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })
    }

    #[tokio::test]
    async fn long_context_requests_reach_the_longcontext_provider() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let server = server_with_stub(text_body(), calls.clone());

        let request: anthropic::ChatRequest = serde_json::from_value(json!({
            "model": "claude-3-sonnet",
            "messages": [{"role": "user", "content": "x".repeat(60_000)}]
        }))
        .unwrap();

        let context = RequestContext::new(5511);
        let response = server.handle(request, &context).await.unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), ["shuaihong-openai:gemini-2-pro"]);
        // Model echo: the caller sees the name it asked for.
        assert_eq!(response.model, "claude-3-sonnet");
        assert_eq!(context.metadata().get("category"), Some(&json!("longcontext")));
    }

    #[tokio::test]
    async fn glm_text_tool_call_round_trips_to_tool_use() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Tool call: Edit({\"file_path\":\"/a\",\"text\":\"hi\"})"
                },
                "finish_reason": "stop"
            }]
        });
        let server = server_with_stub(body, calls);

        let request: anthropic::ChatRequest = serde_json::from_value(json!({
            "model": "claude-3-sonnet",
            "messages": [{"role": "user", "content": "edit the file"}]
        }))
        .unwrap();

        let context = RequestContext::new(5511);
        let response = server.handle(request, &context).await.unwrap();

        assert_eq!(response.content.len(), 1);

        let anthropic::ContentBlock::ToolUse { name, input, .. } = &response.content[0] else {
            unreachable!("expected tool use block");
        };
        assert_eq!(name, "Edit");
        assert_eq!(input, &json!({"file_path": "/a", "text": "hi"}));
        assert_eq!(response.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[tokio::test]
    async fn empty_messages_fail_validation_before_any_upstream_call() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let server = server_with_stub(text_body(), calls.clone());

        let request: anthropic::ChatRequest =
            serde_json::from_value(json!({"model": "m", "messages": []})).unwrap();

        let context = RequestContext::new(5511);
        let error = server.handle(request, &context).await.unwrap_err();

        assert_eq!(error.code(), "validation-error");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn proxy_path_detects_openai_bodies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let server = server_with_stub(text_body(), calls.clone());

        let body = json!({
            "model": "anything",
            "messages": [
                {"role": "tool", "content": "result", "tool_call_id": "call_1"},
                {"role": "user", "content": "continue"}
            ]
        });

        let context = RequestContext::new(5511);
        let response = server
            .handle_proxy("glm", "glm-4", body, &context)
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), ["glm:glm-4"]);
        assert_eq!(response.content, vec![anthropic::ContentBlock::Text { text: "hello".into() }]);
    }

    #[tokio::test]
    async fn proxy_with_unknown_provider_fails() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let server = server_with_stub(text_body(), calls);

        let body = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});

        let context = RequestContext::new(5511);
        let error = server.handle_proxy("ghost", "m", body, &context).await.unwrap_err();

        assert_eq!(error.code(), "no-routing-config");
    }

    #[tokio::test]
    async fn streaming_falls_back_to_synthesized_events() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let server = server_with_stub(text_body(), calls);

        let request: anthropic::ChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .unwrap();

        let context = RequestContext::new(5511);
        let events: Vec<_> = server
            .handle_stream(request, context)
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(events.first(), Some(anthropic::StreamEvent::MessageStart { .. })));
        assert!(matches!(events.last(), Some(anthropic::StreamEvent::MessageStop)));
    }
}
