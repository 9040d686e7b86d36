//! Constructs the per-port server state from a configuration snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ProviderConfig, Toggles};

use crate::credentials::QwenCredentialStore;
use crate::error::{BrokerError, BrokerResult};
use crate::pipeline::ResponsePipeline;
use crate::provider::{GeminiProvider, OpenAiProvider, Provider, http_client};
use crate::routing::{AuthRef, RoutingEngine};
use crate::server::BrokerServer;

pub(crate) struct BrokerServerBuilder<'a> {
    config: &'a Config,
    toggles: Toggles,
    port: u16,
}

impl<'a> BrokerServerBuilder<'a> {
    pub fn new(config: &'a Config, toggles: Toggles, port: u16) -> Self {
        Self { config, toggles, port }
    }

    pub fn build(self) -> BrokerResult<BrokerServer> {
        log::debug!(
            "initializing broker on port {} with {} provider(s)",
            self.port,
            self.config.providers.len()
        );

        if self.config.providers.is_empty() {
            return Err(BrokerError::Internal(Some("no providers configured".into())));
        }

        let client = http_client();

        // The refresh lock timeout mirrors the longest upstream deadline.
        let refresh_timeout = self
            .config
            .providers
            .values()
            .map(|provider| provider.timeout())
            .max()
            .unwrap_or(Duration::from_secs(120));

        let credentials = Arc::new(QwenCredentialStore::new(
            self.config.auth.directory(),
            client.clone(),
            refresh_timeout,
        ));

        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

        for (name, provider_config) in &self.config.providers {
            log::debug!("initializing provider: {name}");

            let provider: Arc<dyn Provider> = match provider_config {
                ProviderConfig::Openai(api) => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    api.base_url.clone(),
                    api.api_key.clone().map(AuthRef::ApiKey).unwrap_or(AuthRef::None),
                    None,
                    client.clone(),
                    provider_config.timeout(),
                    provider_config.max_retries(),
                )),
                ProviderConfig::Qwen(qwen) => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    None,
                    AuthRef::AuthFile(qwen.auth_file.clone()),
                    Some(credentials.clone()),
                    client.clone(),
                    provider_config.timeout(),
                    provider_config.max_retries(),
                )),
                ProviderConfig::Gemini(api) => Arc::new(GeminiProvider::new(
                    name.clone(),
                    api.base_url.clone(),
                    api.api_key.clone().map(AuthRef::ApiKey).unwrap_or(AuthRef::None),
                    client.clone(),
                    provider_config.timeout(),
                    provider_config.max_retries(),
                )),
            };

            providers.insert(name.clone(), provider);
        }

        Ok(BrokerServer {
            engine: RoutingEngine::new(self.config),
            providers,
            pipeline: ResponsePipeline::new(&self.config.pipeline, self.toggles.clone()),
            credentials,
            toggles: self.toggles,
            tokens: self.config.tokens.clone(),
            config: self.config.clone(),
            port: self.port,
        })
    }
}
