//! Monitor topology and the per-cycle health model tree

pub mod aggregation;
pub mod definition;
pub mod hierarchy;


pub use aggregation::{AggregationPolicy, AggregationRule};
pub use definition::{
    ConditionOperator, HealthModelDefinition, MonitorDefinition, MonitorKind, ParentCondition,
    ParentRef, WorkloadScope, SYSTEM_NAMESPACE,
};
pub use hierarchy::{FinalizedModel, HierarchyBuilder, ModelBuilder, MonitorNode, NodeId};
