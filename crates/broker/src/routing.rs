//! Request classification and provider selection.
//!
//! The engine inspects category signals in strict order, resolves the
//! category against the configured routing table, and produces an
//! immutable [`RoutingDecision`]. It never downgrades: a disabled or
//! missing provider is a hard routing failure.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use config::{CompatProfileId, Config, Protocol, ProviderConfig, RouteCategory, RoutingConfig};
use indexmap::IndexMap;
use secrecy::SecretString;

use crate::error::{BrokerError, BrokerResult};
use crate::messages::anthropic;

/// How the selected provider authenticates upstream.
#[derive(Debug, Clone)]
pub enum AuthRef {
    /// No credentials (local endpoints such as LM Studio).
    None,
    /// Static API key.
    ApiKey(SecretString),
    /// Qwen OAuth2 credential file name.
    AuthFile(String),
}

/// The immutable outcome of routing one request.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// The category the request classified into.
    pub category: RouteCategory,
    /// Set when the token preprocessor redirected the original category.
    pub redirected_from: Option<RouteCategory>,
    /// Selected provider id.
    pub provider: String,
    /// Upstream model name.
    pub model: String,
    /// Base URL override, when configured.
    pub endpoint: Option<String>,
    /// Credential reference.
    pub auth: AuthRef,
    /// Wire protocol of the provider.
    pub protocol: Protocol,
    /// Compatibility profile of the provider.
    pub profile: CompatProfileId,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Retry budget for retryable upstream failures.
    pub max_retries: u32,
    /// Input token budget of the selected model.
    pub max_input_tokens: u32,
}

/// Per-category and per-provider routing counters.
#[derive(Debug, Clone, Default)]
pub struct RoutingCounts {
    /// Requests routed per category.
    pub per_category: BTreeMap<RouteCategory, u64>,
    /// Requests routed per provider id.
    pub per_provider: HashMap<String, u64>,
}

/// The routing engine. One instance per listening port; the disable set is
/// the only mutable state shared between requests.
pub struct RoutingEngine {
    routing: RoutingConfig,
    providers: IndexMap<String, ProviderConfig>,
    disabled: Mutex<HashSet<String>>,
    counts: Mutex<RoutingCounts>,
}

impl RoutingEngine {
    /// Build an engine from a configuration snapshot.
    pub fn new(config: &Config) -> Self {
        Self {
            routing: config.routing.clone(),
            providers: config.providers.clone(),
            disabled: Mutex::new(HashSet::new()),
            counts: Mutex::new(RoutingCounts::default()),
        }
    }

    /// Classify a request and resolve it to a provider and model.
    pub fn route(&self, request: &anthropic::ChatRequest, request_id: &str) -> BrokerResult<RoutingDecision> {
        let category = self.classify(request)?;

        log::debug!("request {request_id} classified as {category}");

        self.resolve(category, None)
    }

    /// Resolve an explicit category, recording where the request was
    /// originally routed. Used by the token preprocessor's reroute
    /// strategy.
    pub fn reroute(&self, category: RouteCategory, from: RouteCategory) -> BrokerResult<RoutingDecision> {
        self.resolve(category, Some(from))
    }

    /// Strict-order category classification.
    fn classify(&self, request: &anthropic::ChatRequest) -> BrokerResult<RouteCategory> {
        let metadata = request.metadata.as_ref();

        if let Some(explicit) = metadata.and_then(|metadata| metadata.category.as_deref()) {
            return RouteCategory::parse(explicit)
                .ok_or_else(|| BrokerError::UnknownCategory(explicit.to_string()));
        }

        if metadata.is_some_and(|metadata| metadata.thinking == Some(true)) {
            return Ok(RouteCategory::Thinking);
        }

        if !request.messages.is_empty() && request.content_chars() >= self.routing.longcontext_threshold {
            return Ok(RouteCategory::Longcontext);
        }

        Ok(RouteCategory::Default)
    }

    fn resolve(&self, category: RouteCategory, redirected_from: Option<RouteCategory>) -> BrokerResult<RoutingDecision> {
        let Some(target) = self.routing.target(category) else {
            return Err(BrokerError::NoRoutingConfig(category.to_string()));
        };

        let Some(provider) = self.providers.get(&target.provider) else {
            return Err(BrokerError::NoRoutingConfig(category.to_string()));
        };

        if self.is_disabled(&target.provider) {
            return Err(BrokerError::NoProviderAvailable(target.provider.clone()));
        }

        self.record(category, &target.provider);

        let (endpoint, auth) = match provider {
            ProviderConfig::Openai(api) | ProviderConfig::Gemini(api) => (
                api.base_url.clone(),
                api.api_key.clone().map(AuthRef::ApiKey).unwrap_or(AuthRef::None),
            ),
            ProviderConfig::Qwen(qwen) => (None, AuthRef::AuthFile(qwen.auth_file.clone())),
        };

        Ok(RoutingDecision {
            category,
            redirected_from,
            provider: target.provider.clone(),
            model: target.model.clone(),
            endpoint,
            auth,
            protocol: provider.protocol(),
            profile: provider.profile(),
            timeout: provider.timeout(),
            max_retries: provider.max_retries(),
            max_input_tokens: target.max_tokens,
        })
    }

    fn record(&self, category: RouteCategory, provider: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.per_category.entry(category).or_default() += 1;
        *counts.per_provider.entry(provider.to_string()).or_default() += 1;
    }

    fn is_disabled(&self, provider: &str) -> bool {
        self.disabled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(provider)
    }

    /// Build a decision for the pass-through endpoint: the caller names
    /// provider and model directly, bypassing category mapping.
    pub fn route_direct(&self, provider_id: &str, model: &str) -> BrokerResult<RoutingDecision> {
        let Some(provider) = self.providers.get(provider_id) else {
            return Err(BrokerError::NoRoutingConfig(format!("provider '{provider_id}'")));
        };

        if self.is_disabled(provider_id) {
            return Err(BrokerError::NoProviderAvailable(provider_id.to_string()));
        }

        self.record(RouteCategory::Default, provider_id);

        let (endpoint, auth) = match provider {
            ProviderConfig::Openai(api) | ProviderConfig::Gemini(api) => (
                api.base_url.clone(),
                api.api_key.clone().map(AuthRef::ApiKey).unwrap_or(AuthRef::None),
            ),
            ProviderConfig::Qwen(qwen) => (None, AuthRef::AuthFile(qwen.auth_file.clone())),
        };

        Ok(RoutingDecision {
            category: RouteCategory::Default,
            redirected_from: None,
            provider: provider_id.to_string(),
            model: model.to_string(),
            endpoint,
            auth,
            protocol: provider.protocol(),
            profile: provider.profile(),
            timeout: provider.timeout(),
            max_retries: provider.max_retries(),
            max_input_tokens: 65_536,
        })
    }

    /// Remove a provider from routing until a matching enable call.
    pub fn temporarily_disable_provider(&self, provider: &str) {
        log::warn!("provider '{provider}' temporarily disabled");
        self.disabled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider.to_string());
    }

    /// Restore a previously disabled provider.
    pub fn enable_provider(&self, provider: &str) {
        log::info!("provider '{provider}' re-enabled");
        self.disabled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(provider);
    }

    /// Snapshot of the routing counters.
    pub fn counts(&self) -> RoutingCounts {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(toml: &str) -> RoutingEngine {
        let config: Config = toml::from_str(toml).expect("valid config");
        RoutingEngine::new(&config)
    }

    fn request(value: serde_json::Value) -> anthropic::ChatRequest {
        serde_json::from_value(value).unwrap()
    }

    fn base_config() -> &'static str {
        indoc::indoc! {r#"
            [providers.shuaihong-openai]
            type = "openai"
            api_key = "sk-test"

            [providers.qwen]
            type = "qwen"
            auth_file = "qwen-auth-1"

            [routing.categories.default]
            provider = "qwen"
            model = "qwen3-coder-plus"

            [routing.categories.longcontext]
            provider = "shuaihong-openai"
            model = "gemini-2-pro"

            [routing.categories.thinking]
            provider = "qwen"
            model = "qwen3-thinking"
        "#}
    }

    #[test]
    fn sixty_thousand_chars_route_to_longcontext() {
        let engine = engine(base_config());
        let body = "x".repeat(60_000);

        let decision = engine
            .route(&request(json!({"model": "m", "messages": [{"role": "user", "content": body}]})), "req-1")
            .unwrap();

        assert_eq!(decision.category, RouteCategory::Longcontext);
        assert_eq!(decision.provider, "shuaihong-openai");
        assert_eq!(decision.model, "gemini-2-pro");
    }

    #[test]
    fn explicit_category_wins_over_length() {
        let engine = engine(base_config());
        let body = "x".repeat(60_000);

        let decision = engine
            .route(
                &request(json!({
                    "model": "m",
                    "messages": [{"role": "user", "content": body}],
                    "metadata": {"category": "default"}
                })),
                "req-1",
            )
            .unwrap();

        assert_eq!(decision.category, RouteCategory::Default);
    }

    #[test]
    fn thinking_flag_routes_to_thinking() {
        let engine = engine(base_config());

        let decision = engine
            .route(
                &request(json!({
                    "model": "m",
                    "messages": [{"role": "user", "content": "hi"}],
                    "metadata": {"thinking": true}
                })),
                "req-1",
            )
            .unwrap();

        assert_eq!(decision.category, RouteCategory::Thinking);
        assert_eq!(decision.model, "qwen3-thinking");
    }

    #[test]
    fn unknown_explicit_category_fails() {
        let engine = engine(base_config());

        let error = engine
            .route(
                &request(json!({
                    "model": "m",
                    "messages": [{"role": "user", "content": "hi"}],
                    "metadata": {"category": "urgent"}
                })),
                "req-1",
            )
            .unwrap_err();

        assert_eq!(error.code(), "unknown-category");
    }

    #[test]
    fn missing_category_config_fails() {
        let engine = engine(indoc::indoc! {r#"
            [providers.p]
            type = "openai"
            api_key = "k"

            [routing.categories.default]
            provider = "p"
            model = "m"
        "#});

        let error = engine
            .route(
                &request(json!({
                    "model": "m",
                    "messages": [{"role": "user", "content": "hi"}],
                    "metadata": {"thinking": true}
                })),
                "req-1",
            )
            .unwrap_err();

        assert_eq!(error.code(), "no-routing-config");
    }

    #[test]
    fn disabled_provider_fails_without_downgrade() {
        let engine = engine(base_config());
        engine.temporarily_disable_provider("qwen");

        let error = engine
            .route(&request(json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})), "req-1")
            .unwrap_err();

        assert_eq!(error.code(), "no-provider-available");

        engine.enable_provider("qwen");
        let decision = engine
            .route(&request(json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})), "req-1")
            .unwrap();
        assert_eq!(decision.provider, "qwen");
    }

    #[test]
    fn empty_messages_classify_as_default() {
        let engine = engine(base_config());

        let decision = engine
            .route(&request(json!({"model": "m", "messages": []})), "req-1")
            .unwrap();

        assert_eq!(decision.category, RouteCategory::Default);
    }

    #[test]
    fn routing_is_deterministic_for_a_config_snapshot() {
        let engine = engine(base_config());
        let body = request(json!({"model": "m", "messages": [{"role": "user", "content": "hello"}]}));

        let first = engine.route(&body, "req-1").unwrap();
        let second = engine.route(&body, "req-2").unwrap();

        assert_eq!(first.category, second.category);
        assert_eq!(first.provider, second.provider);
        assert_eq!(first.model, second.model);
    }

    #[test]
    fn counters_track_categories_and_providers() {
        let engine = engine(base_config());
        let body = request(json!({"model": "m", "messages": [{"role": "user", "content": "hello"}]}));

        engine.route(&body, "req-1").unwrap();
        engine.route(&body, "req-2").unwrap();

        let counts = engine.counts();
        assert_eq!(counts.per_category.get(&RouteCategory::Default), Some(&2));
        assert_eq!(counts.per_provider.get("qwen"), Some(&2));
    }
}
