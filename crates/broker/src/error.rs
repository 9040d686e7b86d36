use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::messages::anthropic;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Upper bound on the human-readable reason attached to an abnormal
/// response.
const ABNORMAL_REASON_MAX: usize = 500;

/// Broker errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed inbound body: missing messages, bad role, bad field.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The caller named a routing category that does not exist.
    #[error("Unknown routing category: {0}")]
    UnknownCategory(String),

    /// The routing table has no entry for the computed category.
    #[error("No routing configured for category '{0}'")]
    NoRoutingConfig(String),

    /// The selected provider is temporarily disabled.
    #[error("Provider '{0}' is not available")]
    NoProviderAvailable(String),

    /// The credential file backing a provider is missing.
    #[error("Auth file '{0}' not found. Re-authenticate with: rcc auth qwen --name {0}")]
    AuthFileMissing(String),

    /// The refresh token was rejected with invalid_grant.
    #[error("Refresh token for '{0}' has expired. Re-authenticate with: rcc auth qwen --name {0}")]
    RefreshTokenExpired(String),

    /// A refresh attempt failed for a transient reason.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// A provider returned an HTTP error status.
    #[error("Provider API error ({status}): {message}")]
    Upstream {
        /// Upstream HTTP status.
        status: u16,
        /// Sanitized upstream error text.
        message: String,
    },

    /// Network-level failure talking to a provider.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The per-request deadline elapsed.
    #[error("Upstream request timed out after {0} seconds")]
    Timeout(u64),

    /// A 200 response whose shape cannot be normalized.
    #[error("Abnormal upstream response: {0}")]
    AbnormalResponse(String),

    /// Internal error. Some(message) came from a provider and can be
    /// shown; None must not leak details.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl BrokerError {
    /// Build an abnormal-response error, clipping the reason to the
    /// allowed length.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        let mut reason: String = reason.into();

        if reason.chars().count() > ABNORMAL_REASON_MAX {
            reason = reason.chars().take(ABNORMAL_REASON_MAX).collect();
        }

        BrokerError::AbnormalResponse(reason)
    }

    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthFileMissing(_) | Self::RefreshTokenExpired(_) | Self::RefreshFailed(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::UnknownCategory(_) | Self::NoRoutingConfig(_) | Self::NoProviderAvailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Connection(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::AbnormalResponse(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable machine-readable code carried in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation-error",
            Self::UnknownCategory(_) => "unknown-category",
            Self::NoRoutingConfig(_) => "no-routing-config",
            Self::NoProviderAvailable(_) => "no-provider-available",
            Self::AuthFileMissing(_) => "auth-file-missing",
            Self::RefreshTokenExpired(_) => "refresh-token-expired",
            Self::RefreshFailed(_) => "refresh-failed",
            Self::Upstream { .. } | Self::Connection(_) | Self::Timeout(_) => "upstream-error",
            Self::AbnormalResponse(_) => "abnormal-response",
            Self::Internal(_) => "internal-error",
        }
    }

    /// Get the error type string for the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::AuthFileMissing(_) | Self::RefreshTokenExpired(_) | Self::RefreshFailed(_) => {
                "authentication_error"
            }
            Self::Upstream { .. } | Self::Connection(_) | Self::Timeout(_) => "api_error",
            _ => "internal_error",
        }
    }

    /// Whether an in-request retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Upstream { status, .. } => matches!(status, 429 | 502 | 503),
            _ => false,
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(provider_message)) => provider_message.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Mask credentials in text destined for logs or error payloads.
///
/// `key=` query parameters and `Authorization` header values are replaced
/// wholesale; bare bearer tokens are masked too.
pub fn sanitize(input: &str) -> String {
    use std::sync::OnceLock;

    static KEY_RE: OnceLock<regex::Regex> = OnceLock::new();
    static AUTH_RE: OnceLock<regex::Regex> = OnceLock::new();

    let key_re = KEY_RE.get_or_init(|| regex::Regex::new(r"(?i)\bkey=[^&\s]+").unwrap());
    let auth_re = AUTH_RE
        .get_or_init(|| regex::Regex::new(r"(?i)\b(authorization\s*:\s*(?:bearer\s+)?|bearer\s+)[^\s,;]+").unwrap());

    let masked = key_re.replace_all(input, "key=***");
    auth_re.replace_all(&masked, "$1***").into_owned()
}

/// Error response format compatible with the OpenAI API, extended with the
/// broker's structured fields.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        TaggedError::from(self).into_response()
    }
}

/// A broker error annotated with the request it failed in.
#[derive(Debug)]
pub struct TaggedError {
    /// The failure itself.
    pub error: BrokerError,
    /// Selected provider, when routing got that far.
    pub provider: Option<String>,
    /// Upstream model, when routing got that far.
    pub model: Option<String>,
    /// The inbound request id.
    pub request_id: Option<String>,
    /// Pipeline stage the failure surfaced in.
    pub stage: Option<String>,
}

impl From<BrokerError> for TaggedError {
    fn from(error: BrokerError) -> Self {
        TaggedError {
            error,
            provider: None,
            model: None,
            request_id: None,
            stage: None,
        }
    }
}

impl TaggedError {
    fn details(&self) -> ErrorDetails {
        ErrorDetails {
            message: sanitize(&self.error.client_message()),
            r#type: self.error.error_type().to_string(),
            code: self.error.code().to_string(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            request_id: self.request_id.clone(),
            stage: self.stage.clone(),
        }
    }
}

impl IntoResponse for TaggedError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse { error: self.details() };

        (status, Json(body)).into_response()
    }
}

/// Anthropic-shaped error response for the /v1/messages surface.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<BrokerError> for AnthropicErrorResponse {
    fn from(error: BrokerError) -> Self {
        let status = error.status_code();

        let body = anthropic::ErrorResponse {
            error_type: "error".to_string(),
            error: anthropic::ErrorDetails {
                error_type: error.error_type().to_string(),
                message: sanitize(&error.client_message()),
            },
        };

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_table() {
        assert_eq!(
            BrokerError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BrokerError::AuthFileMissing("qwen-auth-1".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            BrokerError::NoProviderAvailable("p".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BrokerError::Upstream {
                status: 503,
                message: "busy".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(BrokerError::Connection("reset".into()).is_retryable());
        assert!(BrokerError::Timeout(120).is_retryable());
        assert!(
            BrokerError::Upstream {
                status: 429,
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(
            !BrokerError::Upstream {
                status: 401,
                message: "denied".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn auth_errors_carry_reauth_hint() {
        let message = BrokerError::AuthFileMissing("qwen-auth-1".into()).to_string();
        assert!(message.contains("rcc auth qwen"));
    }

    #[test]
    fn abnormal_reason_is_clipped() {
        let error = BrokerError::abnormal("x".repeat(1000));
        let BrokerError::AbnormalResponse(reason) = &error else {
            unreachable!("expected abnormal response");
        };
        assert_eq!(reason.chars().count(), 500);
    }

    #[test]
    fn sanitizer_masks_keys_and_bearer_tokens() {
        let masked = sanitize("GET /v1/models?key=sk-secret123 Authorization: Bearer abc.def.ghi");
        assert!(!masked.contains("sk-secret123"));
        assert!(!masked.contains("abc.def.ghi"));
        assert!(masked.contains("key=***"));
    }

    #[test]
    fn internal_error_without_message_does_not_leak() {
        assert_eq!(BrokerError::Internal(None).client_message(), "Internal server error");
    }
}
