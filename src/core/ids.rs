//! Hierarchical node identifiers
//!
//! Ids are positional: a member keeps its id whether or not its siblings are
//! enabled, so toggling configuration never renames the rest of the tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::flow::node::DependentKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<chainId>.s<i>`
    pub fn stage(&self, index: usize) -> Self {
        Self(format!("{}.s{}", self.0, index))
    }

    /// `<groupId>.t<i>`
    pub fn member(&self, index: usize) -> Self {
        Self(format!("{}.t{}", self.0, index))
    }

    /// `<parentId>.c`
    pub fn nested_chain(&self) -> Self {
        Self(format!("{}.c", self.0))
    }

    /// `<id>.<success|failure|complete>`
    pub fn dependent(&self, kind: DependentKind) -> Self {
        Self(format!("{}.{}", self.0, kind.as_str()))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Default)]
struct Counters {
    tasks: AtomicU64,
    groups: AtomicU64,
    chains: AtomicU64,
    jobs: AtomicU64,
}

/// Source of auto-assigned root ids.
///
/// Cheap to clone; clones share the same sequences. One allocator is owned by
/// each [`Job`](crate::job::Job) and threaded down into every construction
/// call, so independent trees (and parallel test runs) never interfere.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: Arc<Counters>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_task(&self) -> NodeId {
        NodeId::from(self.counters.tasks.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_group(&self) -> NodeId {
        NodeId::from(self.counters.groups.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_chain(&self) -> NodeId {
        NodeId::from(self.counters.chains.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_job(&self) -> NodeId {
        NodeId::from(self.counters.jobs.fetch_add(1, Ordering::SeqCst))
    }

    /// Explicit id when supplied, next value of `next` otherwise
    pub fn resolve(&self, explicit: Option<&str>, next: fn(&Self) -> NodeId) -> NodeId {
        match explicit {
            Some(id) => NodeId::from(id),
            None => next(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_scheme() {
        let chain = NodeId::from("7");
        let group = chain.stage(1);
        assert_eq!(group.as_str(), "7.s1");
        assert_eq!(group.member(2).as_str(), "7.s1.t2");
        assert_eq!(group.member(2).nested_chain().as_str(), "7.s1.t2.c");
        assert_eq!(
            group.member(0).dependent(DependentKind::Failure).as_str(),
            "7.s1.t0.failure"
        );
    }

    #[test]
    fn test_allocators_are_independent() {
        let a = IdAllocator::new();
        let b = IdAllocator::new();
        assert_eq!(a.next_chain().as_str(), "0");
        assert_eq!(a.next_chain().as_str(), "1");
        assert_eq!(b.next_chain().as_str(), "0");

        let shared = a.clone();
        assert_eq!(shared.next_chain().as_str(), "2");
        assert_eq!(a.next_task().as_str(), "0");
        assert_eq!(a.resolve(Some("gateway"), IdAllocator::next_task).as_str(), "gateway");
        assert_eq!(a.resolve(None, IdAllocator::next_task).as_str(), "1");
    }
}
