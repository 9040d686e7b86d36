use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::credentials::{QWEN_USER_AGENT, QwenCredentialStore};
use crate::error::{BrokerError, BrokerResult};
use crate::provider::{Provider, SseStream, read_json_body, send_with_retries};
use crate::request::RequestContext;
use crate::routing::AuthRef;

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Additional headers the Qwen portal expects alongside the bearer token.
const QWEN_API_CLIENT: &str = "gl-node/22.17.0";
const QWEN_CLIENT_METADATA: &str = "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI";

/// Client for every OpenAI-protocol upstream: OpenAI-compatible services,
/// LM Studio, ModelScope, GLM variants, and Qwen OAuth2 endpoints.
pub(crate) struct OpenAiProvider {
    name: String,
    base_url: Option<String>,
    auth: AuthRef,
    credentials: Option<Arc<QwenCredentialStore>>,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiProvider {
    pub fn new(
        name: String,
        base_url: Option<String>,
        auth: AuthRef,
        credentials: Option<Arc<QwenCredentialStore>>,
        client: reqwest::Client,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            name,
            base_url,
            auth,
            credentials,
            client,
            timeout,
            max_retries,
        }
    }

    /// Resolve the base URL and auth headers for one call. Qwen providers
    /// consult the credential store, which may refresh the token; the
    /// request's cancellation signal propagates into that refresh.
    async fn prepare(&self, context: &RequestContext) -> BrokerResult<(String, Vec<(&'static str, String)>)> {
        match &self.auth {
            AuthRef::None => Ok((self.effective_base_url(None), Vec::new())),
            AuthRef::ApiKey(key) => Ok((
                self.effective_base_url(None),
                vec![("authorization", format!("Bearer {}", key.expose_secret()))],
            )),
            AuthRef::AuthFile(auth_file) => {
                let store = self.credentials.as_ref().ok_or_else(|| {
                    BrokerError::Internal(Some(format!(
                        "provider '{}' references an auth file but has no credential store",
                        self.name
                    )))
                })?;

                let access = store.get(auth_file, &context.cancellation()).await?;
                let base = self.effective_base_url(Some(access.base_url()));

                Ok((
                    base,
                    vec![
                        ("authorization", format!("Bearer {}", access.access_token)),
                        ("user-agent", QWEN_USER_AGENT.to_string()),
                        ("x-goog-api-client", QWEN_API_CLIENT.to_string()),
                        ("client-metadata", QWEN_CLIENT_METADATA.to_string()),
                    ],
                ))
            }
        }
    }

    fn effective_base_url(&self, derived: Option<String>) -> String {
        self.base_url
            .clone()
            .or(derived)
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string())
    }

    async fn post(&self, body: &Value, context: &RequestContext) -> BrokerResult<reqwest::Response> {
        let (base_url, headers) = self.prepare(context).await?;
        let url = format!("{base_url}/chat/completions");

        let payload = sonic_rs::to_vec(body)
            .map_err(|error| BrokerError::Internal(Some(format!("failed to serialize request: {error}"))))?;

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header(ACCEPT, "application/json")
            .body(payload);

        for (name, value) in headers {
            builder = match name {
                "authorization" => builder.header(AUTHORIZATION, value),
                "user-agent" => builder.header(USER_AGENT, value),
                other => builder.header(other, value),
            };
        }

        send_with_retries(builder, self.timeout, self.max_retries, context).await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _model: &str, mut body: Value, context: &RequestContext) -> BrokerResult<Value> {
        if let Some(object) = body.as_object_mut() {
            object.insert("stream".to_string(), json!(false));
        }

        let response = self.post(&body, context).await?;
        read_json_body(response).await
    }

    async fn send_stream(&self, _model: &str, mut body: Value, context: &RequestContext) -> BrokerResult<SseStream> {
        if let Some(object) = body.as_object_mut() {
            object.insert("stream".to_string(), json!(true));
        }

        let response = self.post(&body, context).await?;
        let provider = self.name.clone();

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(move |event| {
                let provider = provider.clone();

                async move {
                    let event = match event {
                        Ok(event) => event,
                        Err(error) => {
                            log::warn!("SSE parsing error from '{provider}': {error}");
                            return None;
                        }
                    };

                    if event.data == "[DONE]" {
                        return None;
                    }

                    Some(Ok(event.data))
                }
            });

        Ok(Box::pin(stream))
    }
}
