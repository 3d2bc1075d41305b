//! The polymorphic runnable node and outcome bookkeeping

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;

use crate::core::{NodeId, Result};
use crate::flow::context::FlowContext;
use crate::flow::events::{EventHub, TaskListener};
use crate::flow::parallel::ParallelGroup;
use crate::flow::serial::SerialChain;
use crate::flow::spec::MemberSpec;
use crate::flow::task::Task;

/// Classification of one task result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Outcome class a dependent chain is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentKind {
    Success,
    Failure,
    Complete,
}

impl DependentKind {
    pub const ALL: [DependentKind; 3] = [Self::Complete, Self::Success, Self::Failure];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Complete => "complete",
        }
    }

    /// Kinds a single task launches after its own result
    pub fn for_outcome(outcome: Outcome) -> Vec<DependentKind> {
        match outcome {
            Outcome::Success => vec![Self::Complete, Self::Success],
            Outcome::Failure => vec![Self::Complete, Self::Failure],
        }
    }

    /// Kinds a group launches once every member is done.
    ///
    /// `success` and `failure` are exclusive: a group with mixed results, or
    /// with no results at all, only ever launches `complete`.
    pub fn for_tally(tally: &Tally) -> Vec<DependentKind> {
        let mut kinds = vec![Self::Complete];
        if tally.failure == 0 && tally.success > 0 {
            kinds.push(Self::Success);
        }
        if tally.success == 0 && tally.failure > 0 {
            kinds.push(Self::Failure);
        }
        kinds
    }
}

/// Success and failure counts of a node's own leaf results.
///
/// Results of dependent chains are not part of the tally of the node that
/// launched them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub success: u32,
    pub failure: u32,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failure => self.failure += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.success + self.failure
    }
}

impl From<Outcome> for Tally {
    fn from(outcome: Outcome) -> Self {
        let mut tally = Tally::default();
        tally.record(outcome);
        tally
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.success += other.success;
        self.failure += other.failure;
    }
}

/// Any member of a parallel group
pub enum Node {
    Task(Task),
    Group(ParallelGroup),
    Chain(SerialChain),
}

impl Node {
    /// Instantiate the member configured at positional id `slot`.
    ///
    /// Task actions are resolved here so a malformed member is caught before
    /// any of its siblings start.
    pub fn build(spec: &MemberSpec, slot: NodeId, ctx: &FlowContext) -> Result<Node> {
        match spec {
            MemberSpec::Task(task) => {
                let task = Task::with_id(task.clone(), slot, ctx);
                task.validate()?;
                Ok(Node::Task(task))
            }
            MemberSpec::Group(group) => {
                Ok(Node::Group(ParallelGroup::with_id(group.clone(), slot, ctx)))
            }
            MemberSpec::Chain(chain) => Ok(Node::Chain(SerialChain::nested(
                chain.chain.clone(),
                &slot,
                ctx,
            ))),
        }
    }

    pub fn id(&self) -> &NodeId {
        match self {
            Node::Task(task) => task.id(),
            Node::Group(group) => group.id(),
            Node::Chain(chain) => chain.id(),
        }
    }

    pub fn hub(&self) -> &EventHub {
        match self {
            Node::Task(task) => task.hub(),
            Node::Group(group) => group.hub(),
            Node::Chain(chain) => chain.hub(),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn TaskListener>) {
        self.hub().subscribe(listener);
    }

    /// Run to completion, including dependent sub-trees. Resolves when the
    /// node has emitted `done`.
    pub fn run(&mut self) -> BoxFuture<'_, Result<Tally>> {
        match self {
            Node::Task(task) => task.run(),
            Node::Group(group) => group.run(),
            Node::Chain(chain) => chain.run(),
        }
    }
}

/// Run dependent chains concurrently and wait for every one of them.
///
/// Integrity faults are returned after all chains have settled.
pub(crate) fn run_dependents(chains: &mut [SerialChain]) -> BoxFuture<'_, Result<()>> {
    async move {
        let results = futures::future::join_all(chains.iter_mut().map(|chain| chain.run())).await;
        for result in results {
            result?;
        }
        Ok(())
    }
    .boxed()
}
