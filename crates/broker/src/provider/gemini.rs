use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::error::{BrokerError, BrokerResult};
use crate::provider::{Provider, SseStream, read_json_body, send_with_retries};
use crate::request::RequestContext;
use crate::routing::AuthRef;

const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini generateContent protocol.
///
/// Streaming callers are served by the coordinator from a full response;
/// the provider itself only does unary calls.
pub(crate) struct GeminiProvider {
    name: String,
    base_url: String,
    auth: AuthRef,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn new(
        name: String,
        base_url: Option<String>,
        auth: AuthRef,
        client: reqwest::Client,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            name,
            base_url: base_url.unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string()),
            auth,
            client,
            timeout,
            max_retries,
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn send(&self, model: &str, body: Value, context: &RequestContext) -> BrokerResult<Value> {
        let AuthRef::ApiKey(key) = &self.auth else {
            return Err(BrokerError::Internal(Some(format!(
                "Gemini provider '{}' requires an api_key",
                self.name
            ))));
        };

        let url = format!(
            "{}/models/{model}:generateContent?key={}",
            self.base_url,
            key.expose_secret()
        );

        let payload = sonic_rs::to_vec(&body)
            .map_err(|error| BrokerError::Internal(Some(format!("failed to serialize request: {error}"))))?;

        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(payload);

        let response = send_with_retries(builder, self.timeout, self.max_retries, context).await?;
        read_json_body(response).await
    }

    async fn send_stream(&self, _model: &str, _body: Value, _context: &RequestContext) -> BrokerResult<SseStream> {
        Err(BrokerError::Internal(Some(
            "Gemini providers do not stream; the coordinator synthesizes events".into(),
        )))
    }
}
