//! Server state: providers, routing engine, credential store, pipeline.

mod builder;

pub(crate) use builder::BrokerServerBuilder;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use config::{Config, TokenConfig, Toggles};

use crate::credentials::QwenCredentialStore;
use crate::error::{BrokerError, BrokerResult};
use crate::messages::openai::{Model, ModelsResponse};
use crate::pipeline::ResponsePipeline;
use crate::provider::Provider;
use crate::routing::RoutingEngine;

/// Everything a request needs, owned per listening port.
pub struct BrokerServer {
    pub(crate) engine: RoutingEngine,
    pub(crate) providers: HashMap<String, Arc<dyn Provider>>,
    pub(crate) pipeline: ResponsePipeline,
    pub(crate) credentials: Arc<QwenCredentialStore>,
    pub(crate) toggles: Toggles,
    pub(crate) tokens: TokenConfig,
    pub(crate) config: Config,
    pub(crate) port: u16,
}

impl BrokerServer {
    /// The port this server state belongs to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Look up a provider instance by id.
    pub(crate) fn provider(&self, id: &str) -> BrokerResult<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::NoProviderAvailable(id.to_string()))
    }

    /// The routing engine, for runtime disable/enable operations.
    pub fn routing_engine(&self) -> &RoutingEngine {
        &self.engine
    }

    /// The credential store, for cache observability.
    pub fn credential_store(&self) -> &QwenCredentialStore {
        &self.credentials
    }

    /// Models known to this port: the routing targets of every category.
    pub fn models(&self) -> ModelsResponse {
        let mut seen = std::collections::HashSet::new();
        let mut data = Vec::new();

        for target in self.config.routing.categories.values() {
            if seen.insert((target.provider.clone(), target.model.clone())) {
                data.push(Model {
                    id: target.model.clone(),
                    object: "model".to_string(),
                    owned_by: target.provider.clone(),
                });
            }
        }

        ModelsResponse {
            object: "list".to_string(),
            data,
        }
    }
}

/// Explicit registry of per-port server state, owned by the HTTP frame.
///
/// State isolation per listening port without hidden globals: the frame
/// registers each server under its port and passes handles down.
#[derive(Default)]
pub struct PortRegistry {
    servers: Mutex<HashMap<u16, Arc<BrokerServer>>>,
}

impl PortRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the server for a port, replacing any previous entry.
    pub fn register(&self, port: u16, server: Arc<BrokerServer>) {
        self.servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(port, server);
    }

    /// The server bound to a port, if any.
    pub fn get(&self, port: u16) -> Option<Arc<BrokerServer>> {
        self.servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&port)
            .cloned()
    }
}
