//! Cluster health model library
//!
//! This crate turns batches of per-resource Kubernetes probe results into a
//! hierarchical, state-tracked cluster health model:
//! - Batch intake and row parsing
//! - Signal deduplication, kube-api outage handling, missing-signal synthesis
//! - Monitor topology and per-cycle aggregation
//! - Transition state tracking and snapshot persistence
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod ingest;
pub mod inventory;
pub mod model;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod provider;
pub mod signals;
pub mod state;

pub use error::{DefinitionError, PersistenceError, PipelineError};
pub use health::{
    AgentHealth, ComponentHealth, ComponentStatus, CycleReport, HealthResponse,
    ReadinessResponse,
};
pub use inventory::{ClusterInventory, InventoryRegistry, NodeInfo, WorkloadInfo};
pub use models::*;
pub use observability::{CycleCounts, PipelineMetrics, StructuredLogger};
pub use pipeline::{
    BatchOutcome, CycleOutput, HealthModelPipeline, PersistenceStatus, PipelineBuilder,
    PipelineSettings,
};
pub use provider::{MonitorConfig, MonitorConfigProvider, OutputRecord};
