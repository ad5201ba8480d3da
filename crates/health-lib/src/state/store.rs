//! Authoritative per-instance transition state
//!
//! The store is the only component that survives across cycles. Each
//! instance is updated at most once per cycle, so the `new_state` written in
//! one cycle becomes the `old_state` of the next exactly once.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::MonitorState;
use crate::provider::MonitorConfig;

/// Persisted transition state of one monitor instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStateRecord {
    /// State before this cycle's update; `None` on first observation
    pub old_state: Option<MonitorState>,
    pub new_state: MonitorState,
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Collection time of the sample that produced `new_state`
    pub time_first_observed: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub should_send: bool,
    /// Differing state currently building a streak
    pub pending_state: Option<MonitorState>,
    pub streak: u32,
    pub occurrences: u64,
    /// Latest sample details, bounded to the transition sample count
    pub recent_details: VecDeque<Value>,
}

impl Default for MonitorStateRecord {
    fn default() -> Self {
        Self {
            old_state: None,
            new_state: MonitorState::None,
            last_transition_time: None,
            time_first_observed: DateTime::<Utc>::default(),
            last_updated: None,
            should_send: false,
            pending_state: None,
            streak: 0,
            occurrences: 0,
            recent_details: VecDeque::new(),
        }
    }
}

/// One observation handed to [`MonitorStateStore::update`]
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub state: MonitorState,
    pub observed_at: DateTime<Utc>,
    pub details: &'a Value,
    pub config: &'a MonitorConfig,
}

#[derive(Debug, Clone, Default)]
pub struct MonitorStateStore {
    states: BTreeMap<String, MonitorStateRecord>,
    root_instance_id: String,
}

impl MonitorStateStore {
    pub fn new(root_instance_id: impl Into<String>) -> Self {
        Self {
            states: BTreeMap::new(),
            root_instance_id: root_instance_id.into(),
        }
    }

    /// Replace the in-memory state with a restored snapshot
    pub fn load(&mut self, states: BTreeMap<String, MonitorStateRecord>) {
        debug!(instances = states.len(), "Loaded monitor state");
        self.states = states;
    }

    pub fn root_instance_id(&self) -> &str {
        &self.root_instance_id
    }

    /// Record of an instance, or the default record when it was never seen
    pub fn get(&self, monitor_instance_id: &str) -> MonitorStateRecord {
        self.states
            .get(monitor_instance_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, monitor_instance_id: &str) -> bool {
        self.states.contains_key(monitor_instance_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Records ordered by instance id
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MonitorStateRecord)> {
        self.states.iter()
    }

    pub fn states(&self) -> &BTreeMap<String, MonitorStateRecord> {
        &self.states
    }

    /// Apply one cycle's observation and return the updated record
    pub fn update(
        &mut self,
        monitor_instance_id: &str,
        observation: Observation<'_>,
        now: DateTime<Utc>,
    ) -> &MonitorStateRecord {
        let required = observation.config.required_samples();
        let is_root = monitor_instance_id == self.root_instance_id;

        let record = self
            .states
            .entry(monitor_instance_id.to_string())
            .or_insert_with(|| first_observation(&observation, required, now));

        if record.occurrences > 0 {
            record.old_state = Some(record.new_state);

            if observation.state == record.new_state {
                record.pending_state = None;
                record.streak = 0;
            } else {
                if record.pending_state == Some(observation.state) {
                    record.streak += 1;
                } else {
                    record.pending_state = Some(observation.state);
                    record.streak = 1;
                }

                if record.streak >= required {
                    debug!(
                        monitor_instance_id = %monitor_instance_id,
                        from = %record.new_state,
                        to = %observation.state,
                        "Monitor state transition"
                    );
                    record.new_state = observation.state;
                    record.time_first_observed = observation.observed_at;
                    record.last_transition_time = Some(now);
                    record.pending_state = None;
                    record.streak = 0;
                }
            }
        }

        record.recent_details.push_back(observation.details.clone());
        while record.recent_details.len() > required as usize {
            record.recent_details.pop_front();
        }
        record.occurrences += 1;
        record.last_updated = Some(now);
        record.should_send = record.old_state != Some(record.new_state) || is_root;
        record
    }
}

fn first_observation(
    observation: &Observation<'_>,
    required: u32,
    now: DateTime<Utc>,
) -> MonitorStateRecord {
    if required <= 1 {
        MonitorStateRecord {
            new_state: observation.state,
            time_first_observed: observation.observed_at,
            last_transition_time: Some(now),
            ..Default::default()
        }
    } else {
        MonitorStateRecord {
            new_state: MonitorState::None,
            time_first_observed: observation.observed_at,
            pending_state: Some(observation.state),
            streak: 1,
            ..Default::default()
        }
    }
}
