//! Per-request context threaded through every stage.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Runtime context for one inbound request.
///
/// Created at acceptance and borrowed by every stage. Stages get read
/// access plus a narrow metadata-write capability; the coordinator owns
/// the context itself. Dropping the context cancels everything started on
/// its behalf: the upstream call, streaming consumption, and a credential
/// refresh this request initiated.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    started_at: Instant,
    port: u16,
    cancellation: CancellationToken,
    stage: Mutex<&'static str>,
    metadata: Mutex<HashMap<String, Value>>,
}

impl RequestContext {
    /// Create a context for a request accepted on the given port.
    pub fn new(port: u16) -> Self {
        Self {
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            started_at: Instant::now(),
            port,
            cancellation: CancellationToken::new(),
            stage: Mutex::new("accept"),
            metadata: Mutex::new(HashMap::new()),
        }
    }

    /// The unique request id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The port the request arrived on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Elapsed wall time since acceptance.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Cancellation signal for work done on behalf of this request.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Tag the stage currently processing the request.
    pub fn set_stage(&self, stage: &'static str) {
        *self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = stage;
    }

    /// The stage currently processing the request.
    pub fn stage(&self) -> &'static str {
        *self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a metadata value.
    pub fn insert_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), value);
    }

    /// Snapshot of the metadata map.
    pub fn metadata(&self) -> HashMap<String, Value> {
        self.metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_and_metadata_are_tracked() {
        let context = RequestContext::new(5511);

        assert_eq!(context.stage(), "accept");
        context.set_stage("router");
        assert_eq!(context.stage(), "router");

        context.insert_metadata("category", json!("default"));
        assert_eq!(context.metadata().get("category"), Some(&json!("default")));
    }

    #[test]
    fn drop_cancels_child_work() {
        let context = RequestContext::new(5511);
        let token = context.cancellation();

        assert!(!token.is_cancelled());
        drop(context);
        assert!(token.is_cancelled());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = RequestContext::new(1);
        let b = RequestContext::new(1);
        assert_ne!(a.request_id(), b.request_id());
    }
}
