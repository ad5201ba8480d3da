//! Cluster resource inventory
//!
//! The inventory is supplied by an external collaborator. The host keeps an
//! [`InventoryRegistry`] up to date from whatever source it watches, and the
//! pipeline takes an immutable [`ClusterInventory`] snapshot at the start of
//! every cycle.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ResourceKind, ResourceScope};

/// Node as known to the inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Workload (deployment, daemonset, ...) as known to the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// On-disk shape of an inventory document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InventoryDocument {
    #[serde(default)]
    nodes: Vec<NodeInfo>,
    #[serde(default)]
    workloads: Vec<WorkloadInfo>,
}

/// Read-only snapshot of known cluster resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "InventoryDocument", into = "InventoryDocument")]
pub struct ClusterInventory {
    nodes: BTreeMap<String, NodeInfo>,
    workloads: BTreeMap<(String, String), WorkloadInfo>,
}

impl From<InventoryDocument> for ClusterInventory {
    fn from(doc: InventoryDocument) -> Self {
        let mut inventory = ClusterInventory::default();
        for node in doc.nodes {
            inventory.insert_node(node);
        }
        for workload in doc.workloads {
            inventory.insert_workload(workload);
        }
        inventory
    }
}

impl From<ClusterInventory> for InventoryDocument {
    fn from(inventory: ClusterInventory) -> Self {
        Self {
            nodes: inventory.nodes.into_values().collect(),
            workloads: inventory.workloads.into_values().collect(),
        }
    }
}

impl ClusterInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style node insertion, mostly for tests and replay tooling
    pub fn with_node(mut self, name: &str, labels: &[(&str, &str)]) -> Self {
        self.insert_node(NodeInfo {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    /// Builder-style workload insertion
    pub fn with_workload(mut self, namespace: &str, name: &str, kind: Option<&str>) -> Self {
        self.insert_workload(WorkloadInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: kind.map(str::to_string),
        });
        self
    }

    pub fn insert_node(&mut self, node: NodeInfo) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn insert_workload(&mut self, workload: WorkloadInfo) {
        self.workloads
            .insert((workload.namespace.clone(), workload.name.clone()), workload);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    pub fn workloads(&self) -> impl Iterator<Item = &WorkloadInfo> {
        self.workloads.values()
    }

    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(name)
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<&WorkloadInfo> {
        self.workloads
            .get(&(namespace.to_string(), name.to_string()))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.workloads.is_empty()
    }

    /// Whether the inventory knows nothing about a resource kind.
    ///
    /// An unavailable kind is treated as "everything present" by callers.
    pub fn is_unavailable(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Cluster => false,
            ResourceKind::Node => self.nodes.is_empty(),
            ResourceKind::Workload => self.workloads.is_empty(),
        }
    }

    /// Existence lookup for the resource backing a signal, failing open when
    /// the inventory for that kind is unavailable.
    pub fn is_present(&self, scope: &ResourceScope) -> bool {
        if self.is_unavailable(scope.kind()) {
            return true;
        }

        match scope {
            ResourceScope::Cluster => true,
            ResourceScope::Node { name } => self.nodes.contains_key(name),
            ResourceScope::Workload { namespace, name } => self
                .workloads
                .contains_key(&(namespace.clone(), name.clone())),
            ResourceScope::Unresolved(_) => false,
        }
    }
}

/// Concurrently updatable inventory shared between the host and the pipeline.
///
/// Single-entry updates go straight to the maps. A whole-inventory
/// [`replace`](Self::replace) holds the swap lock exclusively, so a
/// [`snapshot`](Self::snapshot) sees either the old inventory or the new one.
#[derive(Debug, Clone, Default)]
pub struct InventoryRegistry {
    nodes: Arc<DashMap<String, NodeInfo>>,
    workloads: Arc<DashMap<(String, String), WorkloadInfo>>,
    swap: Arc<RwLock<()>>,
}

impl InventoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.swap.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole inventory with a freshly discovered one
    pub fn replace(&self, inventory: ClusterInventory) {
        let _swap = self.swap.write().unwrap_or_else(PoisonError::into_inner);
        self.nodes
            .retain(|name, _| inventory.nodes.contains_key(name));
        self.workloads
            .retain(|key, _| inventory.workloads.contains_key(key));

        for (name, node) in inventory.nodes {
            self.nodes.insert(name, node);
        }
        for (key, workload) in inventory.workloads {
            self.workloads.insert(key, workload);
        }

        debug!(
            nodes = self.nodes.len(),
            workloads = self.workloads.len(),
            "Inventory replaced"
        );
    }

    pub fn upsert_node(&self, node: NodeInfo) {
        let _swap = self.shared();
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove_node(&self, name: &str) -> Option<NodeInfo> {
        let _swap = self.shared();
        self.nodes.remove(name).map(|(_, v)| v)
    }

    pub fn upsert_workload(&self, workload: WorkloadInfo) {
        let _swap = self.shared();
        self.workloads
            .insert((workload.namespace.clone(), workload.name.clone()), workload);
    }

    pub fn remove_workload(&self, namespace: &str, name: &str) -> Option<WorkloadInfo> {
        let _swap = self.shared();
        self.workloads
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|(_, v)| v)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    /// Take a read-only snapshot for one evaluation cycle
    pub fn snapshot(&self) -> ClusterInventory {
        let _swap = self.shared();
        let mut inventory = ClusterInventory::new();
        for entry in self.nodes.iter() {
            inventory.insert_node(entry.value().clone());
        }
        for entry in self.workloads.iter() {
            inventory.insert_workload(entry.value().clone());
        }
        inventory
    }
}
