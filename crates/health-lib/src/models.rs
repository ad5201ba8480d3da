//! Core data models for the health model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::provider::MonitorConfig;

/// Health state of a monitor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Pass,
    Warning,
    Fail,
    /// No data has ever been observed for the instance
    None,
    /// Data was expected but could not be trusted or did not arrive
    Unknown,
}

impl MonitorState {
    pub const ALL: [MonitorState; 5] = [
        MonitorState::Fail,
        MonitorState::Warning,
        MonitorState::Unknown,
        MonitorState::None,
        MonitorState::Pass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Pass => "pass",
            MonitorState::Warning => "warning",
            MonitorState::Fail => "fail",
            MonitorState::None => "none",
            MonitorState::Unknown => "unknown",
        }
    }

    /// Parse a probe-reported state, mapping anything unrecognized to `Unknown`
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(MonitorState::Unknown)
    }

    /// Stable ordinal used for the cluster state gauge
    pub fn ordinal(&self) -> i64 {
        match self {
            MonitorState::Pass => 0,
            MonitorState::None => 1,
            MonitorState::Unknown => 2,
            MonitorState::Warning => 3,
            MonitorState::Fail => 4,
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" | "ok" | "healthy" => Ok(MonitorState::Pass),
            "warning" | "warn" => Ok(MonitorState::Warning),
            "fail" | "error" | "critical" => Ok(MonitorState::Fail),
            "none" => Ok(MonitorState::None),
            "unknown" => Ok(MonitorState::Unknown),
            other => Err(format!("unrecognized monitor state '{}'", other)),
        }
    }
}

/// Kind of resource a unit monitor observes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Cluster,
    Node,
    Workload,
}

/// The Kubernetes resource backing a monitor instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceScope {
    Cluster,
    Node { name: String },
    Workload { namespace: String, name: String },
    /// A node or workload monitor whose resource label was missing
    Unresolved(ResourceKind),
}

impl ResourceScope {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceScope::Cluster => ResourceKind::Cluster,
            ResourceScope::Node { .. } => ResourceKind::Node,
            ResourceScope::Workload { .. } => ResourceKind::Workload,
            ResourceScope::Unresolved(kind) => *kind,
        }
    }
}

/// A health signal for one monitor instance, built fresh each cycle
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSignal {
    pub monitor_id: String,
    pub monitor_instance_id: String,
    pub time_first_observed: DateTime<Utc>,
    pub state: MonitorState,
    pub labels: BTreeMap<String, String>,
    pub config: MonitorConfig,
    pub details: Value,
    pub scope: ResourceScope,
}

impl HealthSignal {
    /// Set the state, keeping the `state` field of the detail payload in sync
    pub fn set_state(&mut self, state: MonitorState) {
        self.state = state;
        if let Some(details) = self.details.as_object_mut() {
            details.insert("state".to_string(), Value::String(state.as_str().to_string()));
        }
    }
}

/// Well-known label keys
pub mod labels {
    pub const HOSTNAME: &str = "kubernetes.io/hostname";
    pub const ROLE: &str = "kubernetes.io/role";
    pub const NAMESPACE: &str = "monitor.k8s/namespace";
    pub const WORKLOAD_NAME: &str = "monitor.k8s/workload-name";
    pub const WORKLOAD_KIND: &str = "monitor.k8s/workload-kind";
}

/// Derive a monitor instance id from a monitor id and its scope parts.
///
/// With no parts the monitor id itself is the instance id, which is how
/// cluster-wide instances (including the root) are keyed.
pub fn monitor_instance_id<S: AsRef<str>>(monitor_id: &str, parts: &[S]) -> String {
    if parts.is_empty() {
        return monitor_id.to_string();
    }

    let joined = parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join("/");
    let digest = Sha256::digest(joined.as_bytes());
    format!("{}-{}", monitor_id, hex::encode(&digest[..16]))
}
