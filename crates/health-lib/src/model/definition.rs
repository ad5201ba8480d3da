//! Static monitor topology
//!
//! The topology is a JSON array of monitor entries, each naming its parent.
//! A parent may be fixed or selected by the child's labels, but every
//! resolution yields exactly one parent so instances always form a tree
//! under the single root.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::aggregation::AggregationRule;
use crate::error::DefinitionError;
use crate::models::{monitor_instance_id, ResourceKind};

/// Comparison applied by a label-conditional parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
}

/// Select `id` as parent when the child's `label` compares to `value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentCondition {
    pub label: String,
    pub operator: ConditionOperator,
    pub value: String,
    pub id: String,
}

impl ParentCondition {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(&self.label).map(String::as_str);
        match self.operator {
            ConditionOperator::Equals => actual == Some(self.value.as_str()),
            ConditionOperator::NotEquals => actual != Some(self.value.as_str()),
        }
    }
}

/// Which workloads a workload-scoped monitor expects signals for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadScope {
    #[default]
    All,
    /// Workloads in `kube-system`
    System,
    /// Workloads outside `kube-system`
    User,
}

pub const SYSTEM_NAMESPACE: &str = "kube-system";

impl WorkloadScope {
    pub fn includes(&self, namespace: &str) -> bool {
        match self {
            WorkloadScope::All => true,
            WorkloadScope::System => namespace == SYSTEM_NAMESPACE,
            WorkloadScope::User => namespace != SYSTEM_NAMESPACE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ParentSpec {
    Fixed(String),
    Conditional(Vec<ParentCondition>),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct DefinitionEntry {
    monitor_id: String,
    #[serde(default)]
    parent_monitor_id: Option<ParentSpec>,
    #[serde(default)]
    default_parent_monitor_id: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    aggregation: Option<AggregationRule>,
    #[serde(default)]
    resource_kind: Option<ResourceKind>,
    #[serde(default)]
    workload_scope: WorkloadScope,
    #[serde(default = "default_true")]
    synthesize_missing: bool,
}

/// Where a monitor attaches in the tree
#[derive(Debug, Clone, PartialEq)]
pub enum ParentRef {
    Root,
    Fixed(String),
    Conditional {
        conditions: Vec<ParentCondition>,
        default: String,
    },
}

/// Unit (leaf) or aggregate monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorKind {
    Unit {
        resource_kind: ResourceKind,
        workload_scope: WorkloadScope,
        synthesize_missing: bool,
    },
    Aggregate(AggregationRule),
}

/// One monitor of the static topology
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorDefinition {
    pub monitor_id: String,
    pub parent: ParentRef,
    /// Label keys an aggregate copies from its members and keys its instances on
    pub labels: Vec<String>,
    pub kind: MonitorKind,
}

impl MonitorDefinition {
    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, MonitorKind::Aggregate(_))
    }

    pub fn aggregation(&self) -> Option<&AggregationRule> {
        match &self.kind {
            MonitorKind::Aggregate(rule) => Some(rule),
            MonitorKind::Unit { .. } => None,
        }
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match &self.kind {
            MonitorKind::Unit { resource_kind, .. } => Some(*resource_kind),
            MonitorKind::Aggregate(_) => None,
        }
    }

    /// Resolve the parent monitor id for an instance carrying `labels`
    pub fn parent_for(&self, labels: &BTreeMap<String, String>) -> Option<&str> {
        match &self.parent {
            ParentRef::Root => None,
            ParentRef::Fixed(id) => Some(id.as_str()),
            ParentRef::Conditional {
                conditions,
                default,
            } => Some(
                conditions
                    .iter()
                    .find(|c| c.matches(labels))
                    .map(|c| c.id.as_str())
                    .unwrap_or(default.as_str()),
            ),
        }
    }

    fn possible_parents(&self) -> Vec<&str> {
        match &self.parent {
            ParentRef::Root => Vec::new(),
            ParentRef::Fixed(id) => vec![id.as_str()],
            ParentRef::Conditional {
                conditions,
                default,
            } => conditions
                .iter()
                .map(|c| c.id.as_str())
                .chain(std::iter::once(default.as_str()))
                .collect(),
        }
    }

    /// Labels and instance id of this (aggregate) monitor for a member with `child_labels`
    pub fn instance_for(
        &self,
        child_labels: &BTreeMap<String, String>,
    ) -> (String, BTreeMap<String, String>) {
        let mut labels = BTreeMap::new();
        let mut parts = Vec::with_capacity(self.labels.len());

        for key in &self.labels {
            let value = child_labels.get(key).cloned().unwrap_or_default();
            parts.push(value.clone());
            if child_labels.contains_key(key) {
                labels.insert(key.clone(), value);
            }
        }

        (monitor_instance_id(&self.monitor_id, &parts), labels)
    }
}

/// Parsed and validated monitor topology
#[derive(Debug, Clone)]
pub struct HealthModelDefinition {
    monitors: HashMap<String, MonitorDefinition>,
    /// Declaration order, for deterministic iteration
    order: Vec<String>,
    root: String,
}

impl HealthModelDefinition {
    /// Load and validate a topology file
    pub fn from_path(path: &Path) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let definition = Self::from_json(&content)?;

        info!(
            path = %path.display(),
            monitors = definition.len(),
            root = %definition.root,
            "Loaded health model definition"
        );
        Ok(definition)
    }

    pub fn from_json(content: &str) -> Result<Self, DefinitionError> {
        let entries: Vec<DefinitionEntry> =
            serde_json::from_str(content).map_err(|source| DefinitionError::Parse {
                what: "health model definition".to_string(),
                source,
            })?;
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<DefinitionEntry>) -> Result<Self, DefinitionError> {
        let mut parents_by_child: HashMap<String, ParentRef> = HashMap::new();
        let mut order = Vec::with_capacity(entries.len());

        for entry in &entries {
            if parents_by_child.contains_key(&entry.monitor_id) {
                return Err(DefinitionError::DuplicateMonitor(entry.monitor_id.clone()));
            }

            let parent = match entry.parent_monitor_id.clone() {
                None => match &entry.default_parent_monitor_id {
                    None => ParentRef::Root,
                    Some(default) => ParentRef::Fixed(default.clone()),
                },
                Some(ParentSpec::Fixed(id)) => ParentRef::Fixed(id),
                Some(ParentSpec::Conditional(conditions)) => {
                    // Without an explicit default the first condition's parent catches the rest
                    let default = entry
                        .default_parent_monitor_id
                        .clone()
                        .or_else(|| conditions.first().map(|c| c.id.clone()))
                        .ok_or_else(|| DefinitionError::UnknownParent {
                            monitor_id: entry.monitor_id.clone(),
                            parent_id: String::new(),
                        })?;
                    ParentRef::Conditional {
                        conditions,
                        default,
                    }
                }
            };

            parents_by_child.insert(entry.monitor_id.clone(), parent);
            order.push(entry.monitor_id.clone());
        }

        // Anything named as a parent is an aggregate
        let referenced: HashSet<String> = parents_by_child
            .values()
            .flat_map(|parent| match parent {
                ParentRef::Root => Vec::new(),
                ParentRef::Fixed(id) => vec![id.clone()],
                ParentRef::Conditional {
                    conditions,
                    default,
                } => conditions
                    .iter()
                    .map(|c| c.id.clone())
                    .chain(std::iter::once(default.clone()))
                    .collect(),
            })
            .collect();

        let mut monitors = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let is_parent = referenced.contains(&entry.monitor_id);
            let kind = if is_parent || entry.aggregation.is_some() {
                if entry.resource_kind.is_some() {
                    return Err(DefinitionError::ParentWithResourceKind(
                        entry.monitor_id.clone(),
                    ));
                }
                let rule = entry.aggregation.unwrap_or_default();
                rule.validate()
                    .map_err(|reason| DefinitionError::InvalidAggregation {
                        monitor_id: entry.monitor_id.clone(),
                        reason,
                    })?;
                MonitorKind::Aggregate(rule)
            } else {
                MonitorKind::Unit {
                    resource_kind: entry.resource_kind.unwrap_or_default(),
                    workload_scope: entry.workload_scope,
                    synthesize_missing: entry.synthesize_missing,
                }
            };

            let parent = parents_by_child
                .remove(&entry.monitor_id)
                .unwrap_or(ParentRef::Root);

            monitors.insert(
                entry.monitor_id.clone(),
                MonitorDefinition {
                    monitor_id: entry.monitor_id.clone(),
                    parent,
                    labels: entry.labels.clone(),
                    kind,
                },
            );
        }

        let definition = Self {
            root: String::new(),
            monitors,
            order,
        };
        definition.validate()
    }

    fn validate(mut self) -> Result<Self, DefinitionError> {
        for id in &self.order {
            let monitor = &self.monitors[id];
            for parent in monitor.possible_parents() {
                if !self.monitors.contains_key(parent) {
                    return Err(DefinitionError::UnknownParent {
                        monitor_id: id.clone(),
                        parent_id: parent.to_string(),
                    });
                }
            }
        }

        let roots: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.monitors[*id].parent == ParentRef::Root)
            .cloned()
            .collect();
        if roots.len() != 1 {
            return Err(DefinitionError::RootCount(roots));
        }
        let root = roots[0].clone();
        if !self.monitors[&root].is_aggregate() {
            return Err(DefinitionError::InvalidAggregation {
                monitor_id: root,
                reason: "the root monitor must aggregate other monitors".to_string(),
            });
        }

        // Every parent path must terminate at the root within `len` steps
        for id in &self.order {
            self.check_acyclic(id)?;
        }

        self.root = root;
        Ok(self)
    }

    fn check_acyclic(&self, start: &str) -> Result<(), DefinitionError> {
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        while let Some((id, depth)) = stack.pop() {
            if depth > self.monitors.len() {
                return Err(DefinitionError::Cycle(start.to_string()));
            }
            for parent in self.monitors[id].possible_parents() {
                if parent == start {
                    return Err(DefinitionError::Cycle(start.to_string()));
                }
                stack.push((parent, depth + 1));
            }
        }
        Ok(())
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    pub fn get(&self, monitor_id: &str) -> Option<&MonitorDefinition> {
        self.monitors.get(monitor_id)
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// All monitors in declaration order
    pub fn monitors(&self) -> impl Iterator<Item = &MonitorDefinition> {
        self.order.iter().map(move |id| &self.monitors[id])
    }

    /// The unit monitor catalog in declaration order
    pub fn unit_monitors(&self) -> impl Iterator<Item = &MonitorDefinition> {
        self.monitors().filter(|m| !m.is_aggregate())
    }

    /// Direct children of a monitor, in declaration order
    pub fn children_of<'a>(&'a self, monitor_id: &'a str) -> impl Iterator<Item = &'a MonitorDefinition> {
        self.monitors()
            .filter(move |m| m.possible_parents().contains(&monitor_id))
    }
}
