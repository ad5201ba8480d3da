//! Synthesis of signals for expected-but-silent monitor instances
//!
//! The expected universe is the unit monitor catalog crossed with the
//! inventory, plus every previously received instance whose resource still
//! exists. Expected instances without a signal this cycle get one: `None`
//! when nothing is known about them, `Unknown` when they went silent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::inventory::ClusterInventory;
use crate::model::{HealthModelDefinition, MonitorKind};
use crate::models::{HealthSignal, MonitorState, ResourceKind, ResourceScope};
use crate::provider::MonitorConfigProvider;

/// When a silent, previously received instance is reported as Unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilencePolicy {
    /// Only if it was received in the immediately preceding cycle;
    /// longer silence decays to None
    #[default]
    LastCycle,
    /// For as long as it stays silent while its resource exists
    Sticky,
}

struct Expected {
    monitor_instance_id: String,
    monitor_id: String,
    scope: ResourceScope,
}

#[derive(Debug, Clone)]
pub struct MissingSignalGenerator {
    definition: Arc<HealthModelDefinition>,
    policy: SilencePolicy,
    last_seen: HashMap<String, HealthSignal>,
    last_cycle: HashSet<String>,
}

impl MissingSignalGenerator {
    pub fn new(definition: Arc<HealthModelDefinition>, policy: SilencePolicy) -> Self {
        Self {
            definition,
            policy,
            last_seen: HashMap::new(),
            last_cycle: HashSet::new(),
        }
    }

    pub fn policy(&self) -> SilencePolicy {
        self.policy
    }

    /// Number of instances the generator remembers
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    /// Signals for every expected instance absent from `received`
    pub fn missing(
        &mut self,
        received: &[HealthSignal],
        inventory: &ClusterInventory,
        provider: &MonitorConfigProvider,
        now: DateTime<Utc>,
    ) -> Vec<HealthSignal> {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, signal| inventory.is_present(&signal.scope));
        if self.last_seen.len() < before {
            debug!(
                pruned = before - self.last_seen.len(),
                "Forgot instances whose resources left the inventory"
            );
        }

        let present: HashSet<&str> = received
            .iter()
            .map(|s| s.monitor_instance_id.as_str())
            .collect();

        self.expected(inventory, provider)
            .into_iter()
            .filter(|e| !present.contains(e.monitor_instance_id.as_str()))
            .map(|e| self.synthesize(e, inventory, provider, now))
            .collect()
    }

    /// Remember this cycle's received signals for the next cycle
    pub fn update_last_received(&mut self, received: &[HealthSignal]) {
        self.last_cycle = received
            .iter()
            .map(|s| s.monitor_instance_id.clone())
            .collect();
        for signal in received {
            self.last_seen
                .insert(signal.monitor_instance_id.clone(), signal.clone());
        }
    }

    fn expected(
        &self,
        inventory: &ClusterInventory,
        provider: &MonitorConfigProvider,
    ) -> Vec<Expected> {
        let mut seen = HashSet::new();
        let mut expected = Vec::new();
        let mut push = |monitor_id: &str, scope: ResourceScope| {
            let monitor_instance_id = provider.instance_id(monitor_id, &scope);
            if seen.insert(monitor_instance_id.clone()) {
                expected.push(Expected {
                    monitor_instance_id,
                    monitor_id: monitor_id.to_string(),
                    scope,
                });
            }
        };

        for monitor in self.definition.unit_monitors() {
            let MonitorKind::Unit {
                resource_kind,
                workload_scope,
                synthesize_missing,
            } = &monitor.kind
            else {
                continue;
            };
            if !synthesize_missing {
                continue;
            }

            match resource_kind {
                ResourceKind::Cluster => push(&monitor.monitor_id, ResourceScope::Cluster),
                ResourceKind::Node => {
                    for node in inventory.nodes() {
                        push(
                            &monitor.monitor_id,
                            ResourceScope::Node {
                                name: node.name.clone(),
                            },
                        );
                    }
                }
                ResourceKind::Workload => {
                    for workload in inventory
                        .workloads()
                        .filter(|w| workload_scope.includes(&w.namespace))
                    {
                        push(
                            &monitor.monitor_id,
                            ResourceScope::Workload {
                                namespace: workload.namespace.clone(),
                                name: workload.name.clone(),
                            },
                        );
                    }
                }
            }
        }

        // Previously received instances the catalog does not cover
        let mut remembered: Vec<&HealthSignal> = self.last_seen.values().collect();
        remembered.sort_by(|a, b| a.monitor_instance_id.cmp(&b.monitor_instance_id));
        for signal in remembered {
            if seen.insert(signal.monitor_instance_id.clone()) {
                expected.push(Expected {
                    monitor_instance_id: signal.monitor_instance_id.clone(),
                    monitor_id: signal.monitor_id.clone(),
                    scope: signal.scope.clone(),
                });
            }
        }

        expected
    }

    fn synthesize(
        &self,
        expected: Expected,
        inventory: &ClusterInventory,
        provider: &MonitorConfigProvider,
        now: DateTime<Utc>,
    ) -> HealthSignal {
        let silent_since_last_cycle = self.last_cycle.contains(&expected.monitor_instance_id);
        let previous = self
            .last_seen
            .get(&expected.monitor_instance_id)
            .filter(|_| silent_since_last_cycle || self.policy == SilencePolicy::Sticky);

        match previous {
            Some(previous) => {
                let mut signal = previous.clone();
                signal.time_first_observed = now;
                signal.set_state(MonitorState::Unknown);
                if let Some(details) = signal.details.as_object_mut() {
                    details.insert(
                        "reason".to_string(),
                        Value::String("no signal received this cycle".to_string()),
                    );
                }
                signal
            }
            None => HealthSignal {
                labels: provider.scope_labels(&expected.scope, inventory),
                config: provider.config(&expected.monitor_id),
                details: json!({
                    "state": MonitorState::None.as_str(),
                    "timestamp": now.to_rfc3339(),
                    "reason": "no signal has been received",
                }),
                monitor_id: expected.monitor_id,
                monitor_instance_id: expected.monitor_instance_id,
                time_first_observed: now,
                state: MonitorState::None,
                scope: expected.scope,
            },
        }
    }
}
