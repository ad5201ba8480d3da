//! Neutralizes signals corrupted by control-plane unavailability
//!
//! When the API-connectivity monitor reports Fail, monitors computed from
//! API server data only see stale objects. Their signals are coerced to
//! Unknown (or dropped) so a control-plane outage cannot masquerade as a
//! fleet of failing nodes and workloads.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{HealthSignal, MonitorState};

pub const KUBE_API_MONITOR_ID: &str = "kube_api_status";

pub const DEFAULT_AFFECTED_MONITORS: [&str; 5] = [
    "node_condition",
    "user_workload_pods_ready",
    "system_workload_pods_ready",
    "subscribed_capacity_cpu",
    "subscribed_capacity_memory",
];

/// What happens to affected signals during an outage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KubeApiAction {
    #[default]
    CoerceUnknown,
    Drop,
}

/// Wire form of [`AffectedMonitors`]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AffectedSpec {
    Keyword(String),
    List(Vec<String>),
}

/// Monitors whose signals depend on the API server; `"all"` or a list of ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AffectedSpec", into = "AffectedSpec")]
pub enum AffectedMonitors {
    All,
    Only(BTreeSet<String>),
}

impl TryFrom<AffectedSpec> for AffectedMonitors {
    type Error = String;

    fn try_from(value: AffectedSpec) -> Result<Self, Self::Error> {
        match value {
            AffectedSpec::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(AffectedMonitors::All),
            AffectedSpec::List(ids) if ids.len() == 1 && ids[0].eq_ignore_ascii_case("all") => {
                Ok(AffectedMonitors::All)
            }
            AffectedSpec::Keyword(k) => Err(format!("expected \"all\" or a list, got \"{}\"", k)),
            AffectedSpec::List(ids) => Ok(AffectedMonitors::Only(ids.into_iter().collect())),
        }
    }
}

impl From<AffectedMonitors> for AffectedSpec {
    fn from(affected: AffectedMonitors) -> Self {
        match affected {
            AffectedMonitors::All => AffectedSpec::Keyword("all".to_string()),
            AffectedMonitors::Only(ids) => AffectedSpec::List(ids.into_iter().collect()),
        }
    }
}

impl Default for AffectedMonitors {
    fn default() -> Self {
        AffectedMonitors::Only(DEFAULT_AFFECTED_MONITORS.iter().map(|s| s.to_string()).collect())
    }
}

impl AffectedMonitors {
    pub fn contains(&self, monitor_id: &str) -> bool {
        match self {
            AffectedMonitors::All => true,
            AffectedMonitors::Only(ids) => ids.contains(monitor_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KubeApiDownHandler {
    api_monitor_id: String,
    affected: AffectedMonitors,
    action: KubeApiAction,
}

impl Default for KubeApiDownHandler {
    fn default() -> Self {
        Self::new(KUBE_API_MONITOR_ID, AffectedMonitors::default(), KubeApiAction::default())
    }
}

impl KubeApiDownHandler {
    pub fn new(
        api_monitor_id: impl Into<String>,
        affected: AffectedMonitors,
        action: KubeApiAction,
    ) -> Self {
        Self {
            api_monitor_id: api_monitor_id.into(),
            affected,
            action,
        }
    }

    pub fn api_monitor_id(&self) -> &str {
        &self.api_monitor_id
    }

    /// Whether this cycle's signals show the API server as unreachable
    pub fn is_api_down(&self, signals: &[HealthSignal]) -> bool {
        signals
            .iter()
            .any(|s| s.monitor_id == self.api_monitor_id && s.state == MonitorState::Fail)
    }

    /// Signals an outage would neutralize
    pub fn affected_count(&self, signals: &[HealthSignal]) -> usize {
        signals
            .iter()
            .filter(|s| s.monitor_id != self.api_monitor_id && self.affected.contains(&s.monitor_id))
            .count()
    }

    pub fn handle(&self, signals: Vec<HealthSignal>) -> Vec<HealthSignal> {
        if !self.is_api_down(&signals) {
            return signals;
        }

        signals
            .into_iter()
            .filter_map(|mut signal| {
                if signal.monitor_id == self.api_monitor_id
                    || !self.affected.contains(&signal.monitor_id)
                {
                    return Some(signal);
                }
                match self.action {
                    KubeApiAction::Drop => None,
                    KubeApiAction::CoerceUnknown => {
                        signal.set_state(MonitorState::Unknown);
                        Some(signal)
                    }
                }
            })
            .collect()
    }
}
