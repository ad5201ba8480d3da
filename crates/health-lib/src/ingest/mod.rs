//! Batch intake: classification, buffering and row parsing

pub mod batch;
pub mod buffer;
pub mod record;

pub use batch::{BatchKind, BatchRouter, InputBatch};
pub use buffer::RecordBuffer;
pub use record::{parse_rows, resolve_scope, RawRecord, SignalResolver};
