//! Raw probe rows and their resolution into health signals

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::inventory::ClusterInventory;
use crate::model::HealthModelDefinition;
use crate::models::{labels, HealthSignal, MonitorState, ResourceKind, ResourceScope};
use crate::provider::MonitorConfigProvider;

/// One probe result as delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(alias = "MonitorId")]
    pub monitor_id: String,
    #[serde(default, alias = "MonitorInstanceId")]
    pub monitor_instance_id: String,
    #[serde(default, alias = "TimeFirstObserved")]
    pub time_first_observed: Option<String>,
    #[serde(default, alias = "Details")]
    pub details: Value,
    #[serde(default, alias = "NodeName")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl RawRecord {
    /// Node the record was collected for, from `node_name` or the hostname label
    pub fn node_name(&self) -> Option<String> {
        self.node_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.labels.get(labels::HOSTNAME).cloned())
    }

    /// Reported state; missing or unrecognized values are `Unknown`
    pub fn state(&self) -> MonitorState {
        self.details
            .get("state")
            .and_then(Value::as_str)
            .map(MonitorState::parse_lenient)
            .unwrap_or(MonitorState::Unknown)
    }

    /// Collection time, falling back to `now` when absent or unparsable
    pub fn observed_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.time_first_observed
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now)
    }
}

/// Decode raw rows, skipping the malformed ones
pub fn parse_rows(rows: Vec<Value>) -> Vec<RawRecord> {
    let total = rows.len();
    let mut records = Vec::with_capacity(total);

    for row in rows {
        match serde_json::from_value::<RawRecord>(row) {
            Ok(mut record) if !record.monitor_id.is_empty() => {
                // Some collectors ship details as an embedded JSON string
                if let Value::String(raw) = &record.details {
                    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                        record.details = parsed;
                    }
                }
                records.push(record);
            }
            Ok(_) => warn!("Skipping signal row without monitor_id"),
            Err(e) => warn!(error = %e, "Skipping malformed signal row"),
        }
    }

    if records.len() < total {
        debug!(total, parsed = records.len(), "Parsed signal rows");
    }
    records
}

/// Resource a unit monitor of `kind` is bound to, given its resolved labels
pub fn resolve_scope(kind: ResourceKind, resolved: &BTreeMap<String, String>) -> ResourceScope {
    match kind {
        ResourceKind::Cluster => ResourceScope::Cluster,
        ResourceKind::Node => match resolved.get(labels::HOSTNAME) {
            Some(name) => ResourceScope::Node { name: name.clone() },
            None => ResourceScope::Unresolved(ResourceKind::Node),
        },
        ResourceKind::Workload => match (
            resolved.get(labels::NAMESPACE),
            resolved.get(labels::WORKLOAD_NAME),
        ) {
            (Some(namespace), Some(name)) => ResourceScope::Workload {
                namespace: namespace.clone(),
                name: name.clone(),
            },
            _ => ResourceScope::Unresolved(ResourceKind::Workload),
        },
    }
}

/// Turns raw records into health signals for one cycle
pub struct SignalResolver<'a> {
    definition: &'a HealthModelDefinition,
    provider: &'a MonitorConfigProvider,
    inventory: &'a ClusterInventory,
    now: DateTime<Utc>,
}

impl<'a> SignalResolver<'a> {
    pub fn new(
        definition: &'a HealthModelDefinition,
        provider: &'a MonitorConfigProvider,
        inventory: &'a ClusterInventory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            definition,
            provider,
            inventory,
            now,
        }
    }

    pub fn resolve_all(&self, records: Vec<RawRecord>) -> Vec<HealthSignal> {
        records
            .into_iter()
            .filter_map(|record| self.resolve(record))
            .collect()
    }

    /// Resolve one record. Records for unknown or aggregate monitors are skipped.
    pub fn resolve(&self, record: RawRecord) -> Option<HealthSignal> {
        let Some(monitor) = self.definition.get(&record.monitor_id) else {
            warn!(monitor_id = %record.monitor_id, "Signal for unknown monitor, skipping");
            return None;
        };
        let Some(kind) = monitor.resource_kind() else {
            warn!(monitor_id = %record.monitor_id, "Signal reported for aggregate monitor, skipping");
            return None;
        };

        let resolved = self.provider.labels(&record, self.inventory);
        let scope = resolve_scope(kind, &resolved);
        // Resolved scopes always key by the derived id so synthesis and
        // state tracking agree with whatever the collector supplied
        let monitor_instance_id = match &scope {
            ResourceScope::Unresolved(_) if !record.monitor_instance_id.is_empty() => {
                record.monitor_instance_id.clone()
            }
            _ => self.provider.instance_id(&record.monitor_id, &scope),
        };

        Some(HealthSignal {
            time_first_observed: record.observed_at(self.now),
            state: record.state(),
            config: self.provider.config(&record.monitor_id),
            monitor_id: record.monitor_id,
            monitor_instance_id,
            labels: resolved,
            details: record.details,
            scope,
        })
    }
}
