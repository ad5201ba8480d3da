//! Per-monitor configuration, label resolution and output rendering

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{DefinitionError, PipelineError};
use crate::ingest::RawRecord;
use crate::inventory::ClusterInventory;
use crate::model::MonitorNode;
use crate::models::{labels, monitor_instance_id, MonitorState, ResourceScope};
use crate::state::MonitorStateRecord;

pub const WARN_THRESHOLD_KEY: &str = "WarnThresholdPercentage";
pub const FAIL_THRESHOLD_KEY: &str = "FailThresholdPercentage";
pub const CONSECUTIVE_SAMPLES_KEY: &str = "ConsecutiveSamplesForStateTransition";

/// Resolved configuration of one monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorConfig {
    #[serde(rename = "WarnThresholdPercentage", skip_serializing_if = "Option::is_none")]
    pub warn_threshold_percentage: Option<f64>,
    #[serde(rename = "FailThresholdPercentage", skip_serializing_if = "Option::is_none")]
    pub fail_threshold_percentage: Option<f64>,
    /// Consecutive differing samples required before the state changes
    #[serde(rename = "ConsecutiveSamplesForStateTransition")]
    pub consecutive_samples: u32,
    /// Keys the pipeline does not interpret, kept for rendering
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            warn_threshold_percentage: None,
            fail_threshold_percentage: None,
            consecutive_samples: 1,
            extra: Map::new(),
        }
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl MonitorConfig {
    /// Build a config from a JSON object, tolerating stringly-typed numbers.
    /// A zero or malformed sample count falls back to 1.
    pub fn from_value(value: &Value) -> Self {
        let mut config = Self::default();
        let Some(object) = value.as_object() else {
            return config;
        };

        for (key, v) in object {
            match key.as_str() {
                WARN_THRESHOLD_KEY => config.warn_threshold_percentage = lenient_f64(v),
                FAIL_THRESHOLD_KEY => config.fail_threshold_percentage = lenient_f64(v),
                CONSECUTIVE_SAMPLES_KEY => {
                    config.consecutive_samples = lenient_f64(v)
                        .filter(|n| n.is_finite() && *n >= 1.0)
                        .map(|n| n as u32)
                        .unwrap_or(1);
                }
                _ => {
                    config.extra.insert(key.clone(), v.clone());
                }
            }
        }
        config
    }

    pub fn required_samples(&self) -> u32 {
        self.consecutive_samples.max(1)
    }
}

/// A rendered record for one emitted monitor instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub cluster_id: String,
    pub monitor_id: String,
    pub monitor_instance_id: String,
    pub parent_monitor_instance_id: Option<String>,
    pub old_state: Option<MonitorState>,
    pub new_state: MonitorState,
    pub details: Value,
    pub monitor_labels: BTreeMap<String, String>,
    pub monitor_config: Value,
    pub time_first_observed: DateTime<Utc>,
    pub time_generated: DateTime<Utc>,
}

/// Pure lookups over cluster identity and per-monitor configuration
#[derive(Debug, Clone, Default)]
pub struct MonitorConfigProvider {
    cluster_id: String,
    cluster_labels: BTreeMap<String, String>,
    configs: HashMap<String, MonitorConfig>,
}

impl MonitorConfigProvider {
    pub fn new(
        cluster_id: impl Into<String>,
        cluster_labels: BTreeMap<String, String>,
        configs: HashMap<String, MonitorConfig>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cluster_labels,
            configs,
        }
    }

    /// Parse a `{monitor_id: {key: value}}` configuration document
    pub fn parse_configs(content: &str) -> Result<HashMap<String, MonitorConfig>, DefinitionError> {
        let raw: HashMap<String, Value> =
            serde_json::from_str(content).map_err(|source| DefinitionError::Parse {
                what: "monitor configuration".to_string(),
                source,
            })?;
        Ok(raw
            .iter()
            .map(|(id, value)| (id.clone(), MonitorConfig::from_value(value)))
            .collect())
    }

    pub fn load_configs(path: &Path) -> Result<HashMap<String, MonitorConfig>, DefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let configs = Self::parse_configs(&content)?;
        info!(path = %path.display(), monitors = configs.len(), "Loaded monitor configuration");
        Ok(configs)
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn cluster_labels(&self) -> &BTreeMap<String, String> {
        &self.cluster_labels
    }

    /// Config for a monitor, defaults when none is configured
    pub fn config(&self, monitor_id: &str) -> MonitorConfig {
        self.configs.get(monitor_id).cloned().unwrap_or_default()
    }

    /// Instance id of a unit monitor bound to `scope`
    pub fn instance_id(&self, monitor_id: &str, scope: &ResourceScope) -> String {
        match scope {
            ResourceScope::Node { name } => {
                monitor_instance_id(monitor_id, &[self.cluster_id.as_str(), name.as_str()])
            }
            ResourceScope::Workload { namespace, name } => monitor_instance_id(
                monitor_id,
                &[self.cluster_id.as_str(), namespace.as_str(), name.as_str()],
            ),
            ResourceScope::Cluster | ResourceScope::Unresolved(_) => monitor_id.to_string(),
        }
    }

    /// Labels for an incoming record: cluster labels, the record's own,
    /// inventory labels of its node and workload identity from its details
    pub fn labels(&self, record: &RawRecord, inventory: &ClusterInventory) -> BTreeMap<String, String> {
        let mut resolved = self.cluster_labels.clone();
        resolved.extend(record.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(node) = record.node_name() {
            self.add_node_labels(&mut resolved, &node, inventory);
        }

        let inner = record.details.get("details").unwrap_or(&Value::Null);
        for (field, key) in [
            ("namespace", labels::NAMESPACE),
            ("workloadName", labels::WORKLOAD_NAME),
            ("workloadKind", labels::WORKLOAD_KIND),
        ] {
            if let Some(value) = inner.get(field).and_then(Value::as_str) {
                resolved.insert(key.to_string(), value.to_string());
            }
        }

        resolved
    }

    /// Labels for an instance synthesized from inventory alone
    pub fn scope_labels(
        &self,
        scope: &ResourceScope,
        inventory: &ClusterInventory,
    ) -> BTreeMap<String, String> {
        let mut resolved = self.cluster_labels.clone();
        match scope {
            ResourceScope::Node { name } => self.add_node_labels(&mut resolved, name, inventory),
            ResourceScope::Workload { namespace, name } => {
                resolved.insert(labels::NAMESPACE.to_string(), namespace.clone());
                resolved.insert(labels::WORKLOAD_NAME.to_string(), name.clone());
                if let Some(kind) = inventory
                    .workload(namespace, name)
                    .and_then(|w| w.kind.clone())
                {
                    resolved.insert(labels::WORKLOAD_KIND.to_string(), kind);
                }
            }
            ResourceScope::Cluster | ResourceScope::Unresolved(_) => {}
        }
        resolved
    }

    fn add_node_labels(
        &self,
        resolved: &mut BTreeMap<String, String>,
        node: &str,
        inventory: &ClusterInventory,
    ) {
        if let Some(info) = inventory.node(node) {
            resolved.extend(info.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        } else {
            debug!(node = %node, "Node missing from inventory, no node labels added");
        }
        resolved.insert(labels::HOSTNAME.to_string(), node.to_string());
    }

    /// Render an emitted monitor instance
    pub fn render(
        &self,
        node: &MonitorNode,
        parent_instance_id: Option<&str>,
        state: &MonitorStateRecord,
        now: DateTime<Utc>,
    ) -> Result<OutputRecord, PipelineError> {
        let details = match state.recent_details.len() {
            0 => node.details.clone(),
            1 => state.recent_details[0].clone(),
            _ => Value::Array(state.recent_details.iter().cloned().collect()),
        };

        Ok(OutputRecord {
            cluster_id: self.cluster_id.clone(),
            monitor_id: node.monitor_id.clone(),
            monitor_instance_id: node.monitor_instance_id.clone(),
            parent_monitor_instance_id: parent_instance_id.map(str::to_string),
            old_state: state.old_state,
            new_state: state.new_state,
            details,
            monitor_labels: node.labels.clone(),
            monitor_config: serde_json::to_value(self.config(&node.monitor_id))?,
            time_first_observed: state.time_first_observed,
            time_generated: now,
        })
    }
}
