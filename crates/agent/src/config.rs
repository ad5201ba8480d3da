//! Agent configuration

use anyhow::{Context, Result};
use health_lib::ingest::BatchRouter;
use health_lib::ingest::batch::{
    DEFAULT_ACCUMULATE_PREFIX, DEFAULT_PASSTHROUGH_PREFIX, DEFAULT_TRIGGER_PREFIX,
};
use health_lib::model::AggregationPolicy;
use health_lib::signals::{
    AffectedMonitors, KubeApiAction, KubeApiDownHandler, SilencePolicy, KUBE_API_MONITOR_ID,
};
use health_lib::{MonitorState, PipelineSettings};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "HEALTH_AGENT_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Cluster identity stamped on every emitted record
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Labels added to every monitor instance
    #[serde(default)]
    pub cluster_labels: BTreeMap<String, String>,

    /// When false the agent acknowledges batches without evaluating them
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Monitor topology (JSON array)
    #[serde(default = "default_definition_path")]
    pub definition_path: PathBuf,

    /// Per-monitor configuration (JSON object)
    #[serde(default)]
    pub monitor_config_path: Option<PathBuf>,

    /// State snapshot file; unset keeps state in memory only
    #[serde(default = "default_state_path")]
    pub state_path: Option<PathBuf>,

    /// Inventory document refreshed from disk
    #[serde(default)]
    pub inventory_path: Option<PathBuf>,

    #[serde(default = "default_inventory_refresh")]
    pub inventory_refresh_secs: u64,

    #[serde(default)]
    pub silence_policy: SilencePolicy,

    #[serde(default = "default_kube_api_monitor")]
    pub kube_api_monitor_id: String,

    #[serde(default)]
    pub kube_api_affected: AffectedMonitors,

    #[serde(default)]
    pub kube_api_action: KubeApiAction,

    /// Worst-first state ordering used by aggregates
    #[serde(default)]
    pub state_precedence: Option<Vec<MonitorState>>,

    #[serde(default = "default_accumulate_tag")]
    pub accumulate_tag: String,

    #[serde(default = "default_trigger_tag")]
    pub trigger_tag: String,

    #[serde(default = "default_passthrough_tag")]
    pub passthrough_tag: String,

    /// Consecutive failed cycles before the agent reports unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_cluster_id() -> String {
    std::env::var("CLUSTER_ID").unwrap_or_else(|_| "local".to_string())
}

fn default_enabled() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

fn default_definition_path() -> PathBuf {
    PathBuf::from("/etc/health-agent/health_model_definition.json")
}

fn default_state_path() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/health-agent/health_state.json"))
}

fn default_inventory_refresh() -> u64 {
    60
}

fn default_kube_api_monitor() -> String {
    KUBE_API_MONITOR_ID.to_string()
}

fn default_accumulate_tag() -> String {
    DEFAULT_ACCUMULATE_PREFIX.to_string()
}

fn default_trigger_tag() -> String {
    DEFAULT_TRIGGER_PREFIX.to_string()
}

fn default_passthrough_tag() -> String {
    DEFAULT_PASSTHROUGH_PREFIX.to_string()
}

fn default_failure_threshold() -> u32 {
    3
}

impl AgentConfig {
    /// Load configuration from the optional config file, then the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("HEALTH_AGENT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kube_api_affected")
                    .with_list_parse_key("state_precedence"),
            )
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    /// Resolve the immutable pipeline settings
    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        let aggregation = match &self.state_precedence {
            Some(order) => AggregationPolicy::from_precedence(order)
                .context("Invalid state_precedence")?,
            None => AggregationPolicy::default(),
        };

        Ok(PipelineSettings {
            enabled: self.enabled,
            cluster_id: self.cluster_id.clone(),
            cluster_labels: self.cluster_labels.clone(),
            router: BatchRouter {
                accumulate_prefix: self.accumulate_tag.clone(),
                trigger_prefix: self.trigger_tag.clone(),
                passthrough_prefix: self.passthrough_tag.clone(),
            },
            state_path: self.state_path.clone(),
            silence_policy: self.silence_policy,
            kube_api: KubeApiDownHandler::new(
                self.kube_api_monitor_id.clone(),
                self.kube_api_affected.clone(),
                self.kube_api_action,
            ),
            aggregation,
        })
    }
}
