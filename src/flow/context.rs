use crate::core::IdAllocator;
use crate::flow::registry::ActionRegistry;

/// Construction context threaded through the whole tree: where root ids come
/// from and how named actions resolve
#[derive(Clone, Default)]
pub struct FlowContext {
    pub ids: IdAllocator,
    pub registry: ActionRegistry,
}

impl FlowContext {
    pub fn new(ids: IdAllocator, registry: ActionRegistry) -> Self {
        Self { ids, registry }
    }

    /// Fresh id sequences and the built-in actions
    pub fn with_builtins() -> Self {
        Self::new(IdAllocator::new(), ActionRegistry::with_builtins())
    }
}
