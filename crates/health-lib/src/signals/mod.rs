//! Signal conditioning between row parsing and the state store

pub mod generator;
pub mod kube_api;
pub mod reducer;


pub use generator::{MissingSignalGenerator, SilencePolicy};
pub use kube_api::{
    AffectedMonitors, KubeApiAction, KubeApiDownHandler, DEFAULT_AFFECTED_MONITORS,
    KUBE_API_MONITOR_ID,
};
pub use reducer::SignalReducer;
