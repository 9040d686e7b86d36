//! Broker configuration structures to map the rcc.toml configuration.

#![deny(missing_docs)]

mod auth;
mod loader;
mod pipeline;
mod providers;
mod routing;
mod server;
mod toggles;
mod tokens;

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

pub use auth::AuthConfig;
pub use pipeline::PipelineConfig;
pub use providers::{ApiProviderConfig, CompatProfileId, Protocol, ProviderConfig, QwenProviderConfig};
pub use routing::{RouteCategory, RouteTarget, RoutingConfig};
pub use server::ServerConfig;
pub use toggles::{PatchToggles, Toggles};
pub use tokens::{DropFrom, TokenConfig};

/// Main configuration structure for the broker.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Credential storage configuration.
    pub auth: AuthConfig,
    /// Category-to-provider routing table.
    pub routing: RoutingConfig,
    /// Token preprocessor settings.
    pub tokens: TokenConfig,
    /// Response pipeline settings.
    pub pipeline: PipelineConfig,
    /// Upstream provider definitions, keyed by provider id.
    pub providers: IndexMap<String, ProviderConfig>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the routing table against the configured providers.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Look up a provider definition by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }
}
