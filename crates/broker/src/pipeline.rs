//! Staged post-processing of upstream responses.
//!
//! Stages run strictly in order: preprocessing (protocol-level repairs) →
//! transformation (to the Anthropic shape) → postprocessing (final
//! repairs). The streaming stage of the design runs inline in the
//! coordinator, chunk by chunk, so it does not appear here. A stage that
//! fails logs the error and passes its input through unchanged; the
//! request only fails if no Anthropic response materialized by the end.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use config::{PipelineConfig, Protocol, Toggles};
use serde_json::{Value, json};

use crate::compat;
use crate::error::{BrokerError, BrokerResult};
use crate::messages::anthropic;
use crate::request::RequestContext;
use crate::routing::RoutingDecision;
use crate::transform;

/// The pipeline stages that run for a non-streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Protocol-level response repair.
    Preprocessing,
    /// Translation into the Anthropic shape.
    Transformation,
    /// Final repairs on the Anthropic response.
    Postprocessing,
}

impl StageKind {
    fn as_str(self) -> &'static str {
        match self {
            StageKind::Preprocessing => "preprocessing",
            StageKind::Transformation => "transformation",
            StageKind::Postprocessing => "postprocessing",
        }
    }
}

/// Data flowing between stages: the raw protocol body until the
/// transformation stage converts it.
#[derive(Debug, Clone)]
pub enum PipelineData {
    /// Raw upstream body in the provider's protocol.
    Protocol(Value),
    /// Assembled Anthropic response.
    Anthropic(anthropic::ChatResponse),
}

impl PipelineData {
    fn cache_fragment(&self) -> String {
        let serialized = match self {
            PipelineData::Protocol(value) => value.to_string(),
            PipelineData::Anthropic(response) => serde_json::to_string(response).unwrap_or_default(),
        };

        serialized.chars().take(100).collect()
    }
}

/// The response pipeline. One instance per listening port.
pub struct ResponsePipeline {
    toggles: Toggles,
    cache: Option<Mutex<FifoCache>>,
}

impl ResponsePipeline {
    /// Build the pipeline; the cache is enabled by configuration or the
    /// `RCC_CACHE_PREPROCESSING` toggle.
    pub fn new(config: &PipelineConfig, toggles: Toggles) -> Self {
        let cache = (config.cache || toggles.cache_preprocessing)
            .then(|| Mutex::new(FifoCache::new(config.cache_capacity)));

        Self { toggles, cache }
    }

    /// Run the staged pipeline over a raw upstream body.
    pub fn run(
        &self,
        body: Value,
        decision: &RoutingDecision,
        context: &RequestContext,
    ) -> BrokerResult<anthropic::ChatResponse> {
        // Abnormal bodies surface as errors before any repair touches a
        // finish reason.
        if let Some(error) = compat::response::classify_abnormal(&body, &self.toggles) {
            return Err(error);
        }

        let mut data = PipelineData::Protocol(body);

        for stage in [StageKind::Preprocessing, StageKind::Transformation, StageKind::Postprocessing] {
            let started = Instant::now();
            data = self.run_stage(stage, data, decision);

            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            context.insert_metadata(format!("stage_ms_{}", stage.as_str()), json!(elapsed_ms));

            log::debug!(
                "request {} stage {} took {elapsed_ms:.2}ms",
                context.request_id(),
                stage.as_str()
            );
        }

        match data {
            PipelineData::Anthropic(response) => Ok(response),
            PipelineData::Protocol(_) => Err(BrokerError::abnormal(
                "upstream response could not be translated to the Anthropic shape",
            )),
        }
    }

    /// Run one stage with cache lookup and failure passthrough.
    fn run_stage(&self, stage: StageKind, data: PipelineData, decision: &RoutingDecision) -> PipelineData {
        let key = self.cache.as_ref().map(|_| {
            format!(
                "{}:{}:{}:{}",
                stage.as_str(),
                decision.provider,
                decision.model,
                data.cache_fragment()
            )
        });

        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && let Some(hit) = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).get(key)
        {
            return hit;
        }

        let result = match self.apply(stage, &data, decision) {
            Ok(output) => output,
            Err(error) => {
                // Stage failure is not request failure: log and hand the
                // input to the next stage untouched.
                log::error!("pipeline stage {} failed: {error}", stage.as_str());
                data
            }
        };

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key, result.clone());
        }

        result
    }

    fn apply(&self, stage: StageKind, data: &PipelineData, decision: &RoutingDecision) -> Result<PipelineData, String> {
        match (stage, data) {
            (StageKind::Preprocessing, PipelineData::Protocol(body)) => {
                let mut body = body.clone();

                if decision.protocol == Protocol::Openai {
                    compat::response::repair_openai_body(&mut body, &self.toggles);
                }

                Ok(PipelineData::Protocol(body))
            }
            (StageKind::Transformation, PipelineData::Protocol(body)) => {
                let response = match decision.protocol {
                    Protocol::Openai => {
                        let parsed: crate::messages::openai::ChatCompletionResponse =
                            serde_json::from_value(body.clone()).map_err(|error| error.to_string())?;
                        transform::openai_to_anthropic(parsed, &decision.model)
                    }
                    Protocol::Gemini => {
                        let parsed: crate::messages::gemini::GenerateContentResponse =
                            serde_json::from_value(body.clone()).map_err(|error| error.to_string())?;
                        transform::gemini_to_anthropic(parsed, &decision.model)
                    }
                    Protocol::Anthropic => {
                        serde_json::from_value(body.clone()).map_err(|error| error.to_string())?
                    }
                };

                Ok(PipelineData::Anthropic(response))
            }
            (StageKind::Postprocessing, PipelineData::Anthropic(response)) => {
                let mut response = response.clone();
                compat::response::repair_anthropic_response(&mut response, &self.toggles);
                Ok(PipelineData::Anthropic(response))
            }
            // A stage that does not apply to the current data shape passes
            // it through (e.g. postprocessing after a failed transform).
            _ => Ok(data.clone()),
        }
    }
}

/// Bounded FIFO cache for stage results.
struct FifoCache {
    capacity: usize,
    map: HashMap<String, PipelineData>,
    order: VecDeque<String>,
}

impl FifoCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<PipelineData> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: PipelineData) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }
}
