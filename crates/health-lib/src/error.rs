//! Error types for the health model pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the static monitor topology or per-monitor
/// configuration. These are fatal at startup: no model can be produced.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate definition for monitor '{0}'")]
    DuplicateMonitor(String),

    #[error("Monitor '{monitor_id}' references unknown parent '{parent_id}'")]
    UnknownParent {
        monitor_id: String,
        parent_id: String,
    },

    #[error("Topology must have exactly one root, found {0:?}")]
    RootCount(Vec<String>),

    #[error("Cycle detected in topology through monitor '{0}'")]
    Cycle(String),

    #[error("Monitor '{0}' is used as a parent but is declared with a resource kind")]
    ParentWithResourceKind(String),

    #[error("Invalid aggregation for monitor '{monitor_id}': {reason}")]
    InvalidAggregation { monitor_id: String, reason: String },

    #[error("Invalid state precedence: {0}")]
    InvalidPrecedence(String),
}

/// Errors raised by snapshot I/O. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode state snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced by the pipeline entry point.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The batch discriminator matched none of the configured prefixes.
    #[error("Invalid batch tag '{0}' received")]
    InvalidBatch(String),

    /// A failure while building the model; the cycle's output is discarded.
    #[error("Health model build failed: {0}")]
    Model(String),

    #[error("Invalid pipeline configuration: {0}")]
    Config(String),

    #[error("Failed to render output record: {0}")]
    Render(#[from] serde_json::Error),
}
