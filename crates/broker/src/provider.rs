//! Upstream provider clients.
//!
//! A provider takes a protocol-shaped request body (already translated and
//! compat-adapted), performs the HTTPS call with retries and the
//! per-provider deadline, and hands back the raw response body for the
//! response pipeline to repair and translate.

pub(crate) mod gemini;
pub(crate) mod openai;

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{BrokerError, BrokerResult, sanitize};
use crate::request::RequestContext;

pub(crate) use gemini::GeminiProvider;
pub(crate) use openai::OpenAiProvider;

/// Shared HTTP client so provider calls reuse connections.
///
/// The overall client timeout stays generous; per-provider deadlines are
/// enforced by [`send_with_retries`]. The short pool-idle timeout keeps a
/// long-lived broker process honest about DNS changes on provider hosts.
pub(crate) fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            let mut headers = axum::http::HeaderMap::new();
            headers.insert(
                axum::http::header::CONNECTION,
                axum::http::HeaderValue::from_static("keep-alive"),
            );

            reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .default_headers(headers)
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}

/// Raw SSE data payloads from an upstream stream, `[DONE]` filtered out.
pub type SseStream = BoxStream<'static, BrokerResult<String>>;

/// An upstream LLM service endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id as configured.
    fn name(&self) -> &str;

    /// Whether the provider can stream responses.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Send a non-streaming request and return the raw response body.
    async fn send(&self, model: &str, body: Value, context: &RequestContext) -> BrokerResult<Value>;

    /// Send a streaming request and return the SSE payload stream.
    async fn send_stream(&self, model: &str, body: Value, context: &RequestContext) -> BrokerResult<SseStream>;
}

/// Base delay of the exponential backoff between retries.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Execute a request with the retry policy: retryable failures (network
/// errors, timeouts, 502/503, 429 carrying Retry-After) back off
/// exponentially up to `max_retries`; terminal statuses map straight to
/// errors without disabling the provider.
pub(crate) async fn send_with_retries(
    builder: reqwest::RequestBuilder,
    timeout: Duration,
    max_retries: u32,
    context: &RequestContext,
) -> BrokerResult<reqwest::Response> {
    let cancellation = context.cancellation();
    let mut last_error = BrokerError::Internal(None);

    for attempt in 0..=max_retries {
        let Some(request) = builder.try_clone() else {
            return Err(BrokerError::Internal(Some("request body is not retryable".into())));
        };

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                log::debug!("request {} cancelled during upstream call", context.request_id());
                return Err(BrokerError::Connection("request cancelled".into()));
            }
            outcome = tokio::time::timeout(timeout, request.send()) => outcome,
        };

        let response = match outcome {
            Err(_) => {
                last_error = BrokerError::Timeout(timeout.as_secs());
                if attempt < max_retries {
                    backoff(attempt, None).await;
                }
                continue;
            }
            Ok(Err(error)) => {
                last_error = BrokerError::Connection(sanitize(&error.to_string()));
                if attempt < max_retries {
                    backoff(attempt, None).await;
                }
                continue;
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);

        let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        let message = sanitize(&text);

        let retryable = matches!(status.as_u16(), 502 | 503) || (status.as_u16() == 429 && retry_after.is_some());

        if retryable && attempt < max_retries {
            log::warn!("upstream returned {status}, retrying (attempt {})", attempt + 1);
            last_error = BrokerError::Upstream {
                status: status.as_u16(),
                message,
            };
            backoff(attempt, retry_after).await;
            continue;
        }

        log::error!("upstream error ({status}): {message}");

        return Err(BrokerError::Upstream {
            status: status.as_u16(),
            message,
        });
    }

    Err(last_error)
}

async fn backoff(attempt: u32, retry_after: Option<Duration>) {
    let delay = retry_after.unwrap_or_else(|| BACKOFF_BASE * 2u32.saturating_pow(attempt));
    tokio::time::sleep(delay).await;
}

/// Parse a response body into JSON, mapping failures to connection-class
/// errors.
pub(crate) async fn read_json_body(response: reqwest::Response) -> BrokerResult<Value> {
    let text = response
        .text()
        .await
        .map_err(|error| BrokerError::Connection(format!("failed to read upstream body: {error}")))?;

    sonic_rs::from_str(&text).map_err(|error| {
        log::error!("unparseable upstream body ({} bytes): {error}", text.len());
        BrokerError::abnormal(format!("upstream body is not valid JSON: {error}"))
    })
}
