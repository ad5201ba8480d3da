//! Batch classification by tag prefix

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

pub const DEFAULT_ACCUMULATE_PREFIX: &str = "kubehealth.DaemonSet";
pub const DEFAULT_TRIGGER_PREFIX: &str = "kubehealth.ReplicaSet";
pub const DEFAULT_PASSTHROUGH_PREFIX: &str = "kubehealth.AgentCollectionTime";

/// A batch of raw rows as delivered by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputBatch {
    pub tag: String,
    #[serde(default)]
    pub records: Vec<Value>,
}

impl InputBatch {
    pub fn new(tag: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            tag: tag.into(),
            records,
        }
    }
}

/// What a batch asks the pipeline to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Sub-batch of the current cycle, buffer it
    Accumulate,
    /// Final sub-batch, buffer it and evaluate the cycle
    Trigger,
    /// Not health data, hand it back untouched
    PassThrough,
}

/// Tag prefixes used to classify batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRouter {
    pub accumulate_prefix: String,
    pub trigger_prefix: String,
    pub passthrough_prefix: String,
}

impl Default for BatchRouter {
    fn default() -> Self {
        Self {
            accumulate_prefix: DEFAULT_ACCUMULATE_PREFIX.to_string(),
            trigger_prefix: DEFAULT_TRIGGER_PREFIX.to_string(),
            passthrough_prefix: DEFAULT_PASSTHROUGH_PREFIX.to_string(),
        }
    }
}

impl BatchRouter {
    pub fn classify(&self, tag: &str) -> Result<BatchKind, PipelineError> {
        if tag.starts_with(&self.accumulate_prefix) {
            Ok(BatchKind::Accumulate)
        } else if tag.starts_with(&self.trigger_prefix) {
            Ok(BatchKind::Trigger)
        } else if tag.starts_with(&self.passthrough_prefix) {
            Ok(BatchKind::PassThrough)
        } else {
            Err(PipelineError::InvalidBatch(tag.to_string()))
        }
    }

    /// Tag emitted records are written under
    pub fn output_tag(&self) -> &str {
        &self.passthrough_prefix
    }
}
