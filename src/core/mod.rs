// Core infrastructure shared by the execution tree and the job trigger

pub mod errors;
pub mod ids;

// Re-export commonly used types
pub use errors::{ActionError, EngineError, ErrorKind, Result};
pub use ids::{IdAllocator, NodeId};
