//! Diagnostic side channel for cluster root transitions

use serde::{Deserialize, Serialize};

use crate::models::MonitorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStateChanged {
    pub old_state: MonitorState,
    pub new_state: MonitorState,
    pub monitor_count: usize,
}

/// Announces each distinct root transition at most once
#[derive(Debug, Clone, Default)]
pub struct ClusterStateAnnouncer {
    last: Option<(MonitorState, MonitorState)>,
}

impl ClusterStateAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `old_state` is `None` on the root's first observation, which is not a transition
    pub fn observe(
        &mut self,
        old_state: Option<MonitorState>,
        new_state: MonitorState,
        monitor_count: usize,
    ) -> Option<ClusterStateChanged> {
        let old_state = old_state?;
        if old_state == new_state || self.last == Some((old_state, new_state)) {
            return None;
        }

        self.last = Some((old_state, new_state));
        Some(ClusterStateChanged {
            old_state,
            new_state,
            monitor_count,
        })
    }
}
