//! Cycle-scoped monitor tree
//!
//! Each cycle gets a fresh [`ModelBuilder`] arena: unit signals are attached
//! as leaves, their aggregate ancestors are allocated on demand by walking
//! the topology upward, and [`ModelBuilder::finalize`] computes aggregate
//! states bottom-up. Nothing structural carries over between cycles.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::aggregation::{AggregationPolicy, AggregationRule};
use super::definition::{HealthModelDefinition, MonitorDefinition};
use crate::error::PipelineError;
use crate::models::{HealthSignal, MonitorState};

/// Index of a node inside one cycle's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A monitor instance in this cycle's tree
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorNode {
    pub monitor_id: String,
    pub monitor_instance_id: String,
    pub labels: BTreeMap<String, String>,
    pub state: MonitorState,
    /// Earliest collection time among the node and its descendants
    pub time_first_observed: DateTime<Utc>,
    pub details: Value,
    aggregation: Option<AggregationRule>,
    parent: Option<NodeId>,
    members: Vec<NodeId>,
}

impl MonitorNode {
    fn unit(signal: &HealthSignal) -> Self {
        Self {
            monitor_id: signal.monitor_id.clone(),
            monitor_instance_id: signal.monitor_instance_id.clone(),
            labels: signal.labels.clone(),
            state: signal.state,
            time_first_observed: signal.time_first_observed,
            details: signal.details.clone(),
            aggregation: None,
            parent: None,
            members: Vec::new(),
        }
    }

    fn aggregate(
        definition: &MonitorDefinition,
        instance_id: String,
        labels: BTreeMap<String, String>,
        time_first_observed: DateTime<Utc>,
    ) -> Self {
        Self {
            monitor_id: definition.monitor_id.clone(),
            monitor_instance_id: instance_id,
            labels,
            state: MonitorState::Unknown,
            time_first_observed,
            details: Value::Null,
            aggregation: Some(definition.aggregation().copied().unwrap_or_default()),
            parent: None,
            members: Vec::new(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregation.is_some()
    }

    pub fn aggregation(&self) -> Option<&AggregationRule> {
        self.aggregation.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }
}

/// Long-lived factory that hands out a fresh arena per cycle
#[derive(Debug, Clone)]
pub struct HierarchyBuilder {
    definition: Arc<HealthModelDefinition>,
    policy: AggregationPolicy,
}

impl HierarchyBuilder {
    pub fn new(definition: Arc<HealthModelDefinition>, policy: AggregationPolicy) -> Self {
        Self { definition, policy }
    }

    pub fn definition(&self) -> &HealthModelDefinition {
        &self.definition
    }

    /// Start a new cycle's model with only the root allocated
    pub fn model_builder(&self, now: DateTime<Utc>) -> ModelBuilder<'_> {
        ModelBuilder::new(&self.definition, &self.policy, now)
    }
}

/// Parent slot resolved for a signal before it is placed
enum Ancestor<'a> {
    Root,
    Existing(NodeId),
    New {
        monitor: &'a MonitorDefinition,
        instance_id: String,
        labels: BTreeMap<String, String>,
    },
}

/// Arena for one cycle's monitor tree
pub struct ModelBuilder<'a> {
    definition: &'a HealthModelDefinition,
    policy: &'a AggregationPolicy,
    nodes: Vec<MonitorNode>,
    index: HashMap<String, NodeId>,
    root: NodeId,
    skipped: usize,
}

impl<'a> ModelBuilder<'a> {
    fn new(
        definition: &'a HealthModelDefinition,
        policy: &'a AggregationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut builder = Self {
            definition,
            policy,
            nodes: Vec::new(),
            index: HashMap::new(),
            root: NodeId(0),
            skipped: 0,
        };

        let root_id = definition.root_id();
        if let Some(root_def) = definition.get(root_id) {
            let root = MonitorNode::aggregate(root_def, root_id.to_string(), BTreeMap::new(), now);
            builder.root = builder.alloc(root);
        }
        builder
    }

    fn alloc(&mut self, node: MonitorNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(node.monitor_instance_id.clone(), id);
        self.nodes.push(node);
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if self.nodes[child.0].parent.is_none() {
            self.nodes[child.0].parent = Some(parent);
            self.nodes[parent.0].members.push(child);
        }

        let child_time = self.nodes[child.0].time_first_observed;
        let parent_node = &mut self.nodes[parent.0];
        if child_time < parent_node.time_first_observed {
            parent_node.time_first_observed = child_time;
        }
    }

    /// Number of signals that could not be placed in the tree
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Attach every unit signal to its leaf node, creating ancestors as needed
    pub fn process(&mut self, signals: &[HealthSignal]) -> Result<(), PipelineError> {
        for signal in signals {
            self.process_signal(signal)?;
        }
        Ok(())
    }

    fn process_signal(&mut self, signal: &HealthSignal) -> Result<(), PipelineError> {
        let definition = self.definition;
        let Some(monitor) = definition.get(&signal.monitor_id) else {
            warn!(
                monitor_id = %signal.monitor_id,
                monitor_instance_id = %signal.monitor_instance_id,
                "Signal for monitor missing from topology, skipping"
            );
            self.skipped += 1;
            return Ok(());
        };
        if monitor.is_aggregate() {
            warn!(
                monitor_id = %signal.monitor_id,
                "Aggregate monitor reported as a unit signal, skipping"
            );
            self.skipped += 1;
            return Ok(());
        }
        if let Some(existing) = self.index.get(&signal.monitor_instance_id) {
            if self.nodes[existing.0].is_aggregate() {
                warn!(
                    monitor_id = %signal.monitor_id,
                    monitor_instance_id = %signal.monitor_instance_id,
                    "Unit signal collides with an aggregate instance, skipping"
                );
            } else {
                debug!(
                    monitor_instance_id = %signal.monitor_instance_id,
                    "Duplicate signal in cycle, keeping the first"
                );
            }
            self.skipped += 1;
            return Ok(());
        }

        let Some(chain) = self.resolve_ancestors(signal, monitor)? else {
            warn!(
                monitor_id = %signal.monitor_id,
                monitor_instance_id = %signal.monitor_instance_id,
                "Signal instance id collides with one of its ancestors, skipping"
            );
            self.skipped += 1;
            return Ok(());
        };

        let time = signal.time_first_observed;
        let mut child = self.alloc(MonitorNode::unit(signal));
        for ancestor in chain {
            let parent = match ancestor {
                Ancestor::Root => self.root,
                Ancestor::Existing(id) => id,
                Ancestor::New {
                    monitor,
                    instance_id,
                    labels,
                } => self.alloc(MonitorNode::aggregate(monitor, instance_id, labels, time)),
            };
            self.attach(parent, child);
            child = parent;
        }

        Ok(())
    }

    /// Walk the topology upward from a unit signal without touching the arena.
    /// `None` when an ancestor instance id is already taken by a unit node or
    /// by the signal itself.
    fn resolve_ancestors(
        &self,
        signal: &HealthSignal,
        monitor: &'a MonitorDefinition,
    ) -> Result<Option<Vec<Ancestor<'a>>>, PipelineError> {
        let definition = self.definition;
        let mut chain = Vec::new();
        let mut labels = signal.labels.clone();
        let mut child_monitor = monitor;

        while let Some(parent_monitor_id) = child_monitor.parent_for(&labels) {
            let parent_monitor = definition.get(parent_monitor_id).ok_or_else(|| {
                PipelineError::Model(format!(
                    "monitor '{}' has unknown parent '{}'",
                    child_monitor.monitor_id, parent_monitor_id
                ))
            })?;

            if parent_monitor_id == definition.root_id() {
                chain.push(Ancestor::Root);
                break;
            }

            let (instance_id, parent_labels) = parent_monitor.instance_for(&labels);
            if instance_id == signal.monitor_instance_id {
                return Ok(None);
            }
            match self.index.get(&instance_id) {
                Some(existing) if !self.nodes[existing.0].is_aggregate() => return Ok(None),
                Some(existing) => {
                    labels = self.nodes[existing.0].labels.clone();
                    chain.push(Ancestor::Existing(*existing));
                }
                None => {
                    labels = parent_labels.clone();
                    chain.push(Ancestor::New {
                        monitor: parent_monitor,
                        instance_id,
                        labels: parent_labels,
                    });
                }
            }
            child_monitor = parent_monitor;
        }

        Ok(Some(chain))
    }

    /// Compute aggregate states bottom-up and hand back the finished tree
    pub fn finalize(mut self) -> FinalizedModel {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for member in &self.nodes[id.0].members {
                stack.push((*member, false));
            }
        }

        for id in order {
            let Some(rule) = self.nodes[id.0].aggregation else {
                continue;
            };

            let member_states: Vec<MonitorState> = self.nodes[id.0]
                .members
                .iter()
                .map(|m| self.nodes[m.0].state)
                .collect();
            let state = self.policy.aggregate(&rule, &member_states);

            let mut by_state: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
            for member in &self.nodes[id.0].members {
                let node = &self.nodes[member.0];
                by_state
                    .entry(node.state.as_str())
                    .or_default()
                    .push(node.monitor_instance_id.clone());
            }
            let details = json!({
                "state": state.as_str(),
                "timestamp": self.nodes[id.0].time_first_observed.to_rfc3339(),
                "details": by_state,
            });

            let node = &mut self.nodes[id.0];
            node.state = state;
            node.details = details;
        }

        FinalizedModel {
            nodes: self.nodes,
            index: self.index,
            root: self.root,
        }
    }
}

/// A cycle's finished tree, indexed by monitor instance id
#[derive(Debug, Clone)]
pub struct FinalizedModel {
    nodes: Vec<MonitorNode>,
    index: HashMap<String, NodeId>,
    root: NodeId,
}

impl FinalizedModel {
    pub fn get(&self, monitor_instance_id: &str) -> Option<&MonitorNode> {
        self.index.get(monitor_instance_id).map(|id| &self.nodes[id.0])
    }

    pub fn node(&self, id: NodeId) -> &MonitorNode {
        &self.nodes[id.0]
    }

    pub fn root(&self) -> &MonitorNode {
        &self.nodes[self.root.0]
    }

    pub fn parent_of(&self, node: &MonitorNode) -> Option<&MonitorNode> {
        node.parent.map(|id| &self.nodes[id.0])
    }

    /// Nodes in allocation order, root first
    pub fn iter(&self) -> impl Iterator<Item = &MonitorNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_map(self) -> HashMap<String, MonitorNode> {
        self.nodes
            .into_iter()
            .map(|node| (node.monitor_instance_id.clone(), node))
            .collect()
    }
}
