//! CLI command implementations

pub mod replay;
pub mod state;
pub mod topology;
