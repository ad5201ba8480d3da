//! Cross-cycle monitor state and its persistence

pub mod persistence;
pub mod store;

#[cfg(test)]
mod tests;

pub use persistence::{LoadedState, StateDeserializer, StateSerializer, StateSnapshot, SNAPSHOT_VERSION};
pub use store::{MonitorStateRecord, MonitorStateStore, Observation};
