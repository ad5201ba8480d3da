//! Immutable pipeline configuration, resolved once at startup

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ingest::BatchRouter;
use crate::model::AggregationPolicy;
use crate::signals::{KubeApiDownHandler, SilencePolicy};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// When false every batch is acknowledged and ignored
    pub enabled: bool,
    pub cluster_id: String,
    pub cluster_labels: BTreeMap<String, String>,
    pub router: BatchRouter,
    /// Snapshot file; `None` keeps state in memory only
    pub state_path: Option<PathBuf>,
    pub silence_policy: SilencePolicy,
    pub kube_api: KubeApiDownHandler,
    pub aggregation: AggregationPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cluster_id: String::new(),
            cluster_labels: BTreeMap::new(),
            router: BatchRouter::default(),
            state_path: None,
            silence_policy: SilencePolicy::default(),
            kube_api: KubeApiDownHandler::default(),
            aggregation: AggregationPolicy::default(),
        }
    }
}
