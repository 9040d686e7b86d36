//! Upstream provider configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Wire protocol spoken by an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Anthropic messages wire format.
    Anthropic,
    /// OpenAI chat completions wire format.
    Openai,
    /// Google Gemini generateContent wire format.
    Gemini,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Anthropic => write!(f, "anthropic"),
            Protocol::Openai => write!(f, "openai"),
            Protocol::Gemini => write!(f, "gemini"),
        }
    }
}

/// Server-compatibility profile applied to requests and responses of a
/// provider.
///
/// Profiles bundle the request defaults and response repairs a provider
/// class needs. `Generic` applies only the universal rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompatProfileId {
    /// Universal OpenAI-compatible rules only.
    #[default]
    Generic,
    /// GLM-hosted models (temperature default 0.8).
    Glm,
    /// Qwen3-Coder endpoints (temperature default 0.7, named system messages).
    Qwen3Coder,
    /// ModelScope-hosted endpoints (request defaults plus prompt fallback).
    ModelScope,
    /// LM Studio local endpoints (channel-marker tool extraction).
    LmStudio,
}

/// Provider definition, tagged by upstream type.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// An OpenAI-compatible HTTPS endpoint (OpenAI, LM Studio, ModelScope,
    /// GLM and similar).
    Openai(ApiProviderConfig),
    /// Google Gemini generateContent endpoint.
    Gemini(ApiProviderConfig),
    /// Qwen OAuth2-backed endpoint; speaks the OpenAI protocol but derives
    /// its credentials from an auth file instead of a static key.
    Qwen(QwenProviderConfig),
}

impl ProviderConfig {
    /// The wire protocol this provider speaks.
    pub fn protocol(&self) -> Protocol {
        match self {
            ProviderConfig::Openai(_) | ProviderConfig::Qwen(_) => Protocol::Openai,
            ProviderConfig::Gemini(_) => Protocol::Gemini,
        }
    }

    /// The compatibility profile applied to this provider.
    pub fn profile(&self) -> CompatProfileId {
        match self {
            ProviderConfig::Openai(config) | ProviderConfig::Gemini(config) => config.profile,
            ProviderConfig::Qwen(config) => config.profile,
        }
    }

    /// Wall-clock deadline for a single upstream call.
    pub fn timeout(&self) -> Duration {
        let timeout = match self {
            ProviderConfig::Openai(config) | ProviderConfig::Gemini(config) => config.timeout,
            ProviderConfig::Qwen(config) => config.timeout,
        };

        timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Maximum in-request retries for retryable upstream failures.
    pub fn max_retries(&self) -> u32 {
        let retries = match self {
            ProviderConfig::Openai(config) | ProviderConfig::Gemini(config) => config.max_retries,
            ProviderConfig::Qwen(config) => config.max_retries,
        };

        retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }
}

/// Default per-request deadline when the provider does not override it.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default retry budget for retryable upstream failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for a provider authenticated with a static API key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiProviderConfig {
    /// API key sent as a bearer token (OpenAI protocol) or query key
    /// (Gemini protocol).
    pub api_key: Option<SecretString>,

    /// Base URL override. Defaults depend on the provider type.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Compatibility profile for this provider.
    #[serde(default)]
    pub profile: CompatProfileId,

    /// Per-request deadline, e.g. `"120s"`.
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub timeout: Option<Duration>,

    /// Retry budget override.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Configuration for a Qwen OAuth2 provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QwenProviderConfig {
    /// Name of the credential file under the auth directory, without the
    /// `.json` extension.
    pub auth_file: String,

    /// Compatibility profile; Qwen endpoints default to the Qwen3-Coder
    /// rules.
    #[serde(default = "default_qwen_profile")]
    pub profile: CompatProfileId,

    /// Per-request deadline, e.g. `"120s"`.
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub timeout: Option<Duration>,

    /// Retry budget override.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_qwen_profile() -> CompatProfileId {
    CompatProfileId::Qwen3Coder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        provider: ProviderConfig,
    }

    #[test]
    fn openai_provider_defaults() {
        let Wrapper { provider } = toml::from_str(indoc::indoc! {r#"
            [provider]
            type = "openai"
            api_key = "sk-test"
        "#})
        .unwrap();

        assert_eq!(provider.protocol(), Protocol::Openai);
        assert_eq!(provider.profile(), CompatProfileId::Generic);
        assert_eq!(provider.timeout(), Duration::from_secs(120));
        assert_eq!(provider.max_retries(), 3);
    }

    #[test]
    fn qwen_provider_defaults_to_qwen3_coder_profile() {
        let Wrapper { provider } = toml::from_str(indoc::indoc! {r#"
            [provider]
            type = "qwen"
            auth_file = "qwen-auth-1"
        "#})
        .unwrap();

        assert_eq!(provider.protocol(), Protocol::Openai);
        assert_eq!(provider.profile(), CompatProfileId::Qwen3Coder);
    }

    #[test]
    fn profile_and_timeout_overrides() {
        let Wrapper { provider } = toml::from_str(indoc::indoc! {r#"
            [provider]
            type = "openai"
            api_key = "sk-test"
            profile = "lm-studio"
            timeout = "30s"
            max_retries = 1
        "#})
        .unwrap();

        assert_eq!(provider.profile(), CompatProfileId::LmStudio);
        assert_eq!(provider.timeout(), Duration::from_secs(30));
        assert_eq!(provider.max_retries(), 1);
    }
}
