//! Deduplication and stale-object pruning

use std::collections::HashMap;

use tracing::debug;

use crate::inventory::ClusterInventory;
use crate::models::HealthSignal;

/// Collapses a cycle's signals to one per monitor instance
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalReducer;

impl SignalReducer {
    pub fn new() -> Self {
        Self
    }

    /// Keep the latest signal per instance and drop signals whose resource
    /// left the inventory. Output keeps first-appearance order.
    pub fn reduce(&self, signals: Vec<HealthSignal>, inventory: &ClusterInventory) -> Vec<HealthSignal> {
        let received = signals.len();
        let mut reduced: Vec<HealthSignal> = Vec::with_capacity(received);
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(received);
        let mut gone = 0usize;

        for signal in signals {
            if !inventory.is_present(&signal.scope) {
                debug!(
                    monitor_instance_id = %signal.monitor_instance_id,
                    scope = ?signal.scope,
                    "Dropping signal for resource missing from inventory"
                );
                gone += 1;
                continue;
            }

            match positions.get(&signal.monitor_instance_id) {
                Some(&i) => {
                    if signal.time_first_observed > reduced[i].time_first_observed {
                        reduced[i] = signal;
                    }
                }
                None => {
                    positions.insert(signal.monitor_instance_id.clone(), reduced.len());
                    reduced.push(signal);
                }
            }
        }

        debug!(received, reduced = reduced.len(), gone, "Reduced signals");
        reduced
    }
}
