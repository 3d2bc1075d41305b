// Core infrastructure modules
pub mod core;

// Execution tree: tasks, parallel groups, serial chains
pub mod flow;

// Periodic driver of an execution tree
pub mod job;

// Re-exports for convenience
pub use crate::core::errors::{ActionError, EngineError, ErrorKind, Result};
pub use crate::core::ids::{IdAllocator, NodeId};
pub use flow::*;
pub use job::{Job, JobConfig, JobListener, JobSnapshot};
