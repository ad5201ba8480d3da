//! Cycle orchestration

pub mod announcer;
pub mod cycle;
pub mod settings;

#[cfg(test)]
mod tests;

pub use announcer::{ClusterStateAnnouncer, ClusterStateChanged};
pub use cycle::{BatchOutcome, CycleOutput, HealthModelPipeline, PersistenceStatus, PipelineBuilder};
pub use settings::PipelineSettings;
