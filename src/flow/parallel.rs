//! Parallel group: runs its members concurrently and, once all of them are
//! done, fans out the dependent chains selected by the aggregated outcome

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::{EngineError, IdAllocator, NodeId, Result};
use crate::flow::context::FlowContext;
use crate::flow::events::{EventHub, TaskListener};
use crate::flow::node::{run_dependents, DependentKind, Node, Tally};
use crate::flow::serial::SerialChain;
use crate::flow::spec::GroupSpec;

pub struct ParallelGroup {
    id: NodeId,
    spec: GroupSpec,
    hub: EventHub,
    ctx: FlowContext,
    tally: Tally,
}

impl ParallelGroup {
    /// Standalone group: explicit configured id, or the next group id
    pub fn new(spec: GroupSpec, ctx: &FlowContext) -> Self {
        let id = ctx.ids.resolve(spec.id.as_deref(), IdAllocator::next_group);
        Self::with_id(spec, id, ctx)
    }

    /// Group at a fixed position in the tree, e.g. stage `i` of a chain
    pub fn with_id(spec: GroupSpec, id: NodeId, ctx: &FlowContext) -> Self {
        Self {
            id,
            spec,
            hub: EventHub::new(),
            ctx: ctx.clone(),
            tally: Tally::default(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn subscribe(&self, listener: Arc<dyn TaskListener>) {
        self.hub.subscribe(listener);
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.is_enabled()
    }

    /// Outcome counts of the last run
    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Instantiate every enabled member. Ids are positional and disabled
    /// members still consume their slot.
    fn build_members(&self) -> Result<Vec<Node>> {
        let mut members = Vec::with_capacity(self.spec.set.len());
        for (index, spec) in self.spec.set.iter().enumerate() {
            let slot = self.id.member(index);
            if !spec.is_enabled() {
                if self.spec.verbose {
                    debug!(group_id = %self.id, member_id = %slot, "member disabled");
                }
                continue;
            }
            let member = Node::build(spec, slot, &self.ctx)?;
            member.subscribe(self.hub.relay());
            members.push(member);
        }
        Ok(members)
    }

    /// Run all members, then the dependent chains their outcome selects.
    /// Resolves once the group has emitted `done`.
    ///
    /// A malformed member fails the whole group before anything starts: the
    /// fault goes out on the `error` channel and the group finishes empty.
    pub fn run(&mut self) -> BoxFuture<'_, Result<Tally>> {
        async move {
            self.tally = Tally::default();

            let mut members = match self.build_members() {
                Ok(members) => members,
                Err(err) => {
                    self.report(&err);
                    self.hub.done(&self.id);
                    return Ok(Tally::default());
                }
            };

            if members.is_empty() {
                debug!(group_id = %self.id, "no enabled member");
                self.hub.done(&self.id);
                return Ok(Tally::default());
            }

            let mut active = members.len();
            let mut fault: Option<EngineError> = None;
            {
                let mut running: FuturesUnordered<_> = members
                    .iter_mut()
                    .map(|member| {
                        let id = member.id().clone();
                        member.run().map(move |result| (id, result))
                    })
                    .collect();

                while let Some((member_id, result)) = running.next().await {
                    active -= 1;
                    match result {
                        Ok(tally) => self.tally += tally,
                        Err(err) => {
                            error!(group_id = %self.id, member_id = %member_id, "{}", err);
                            fault.get_or_insert(err);
                        }
                    }
                    if self.spec.verbose {
                        debug!(group_id = %self.id, member_id = %member_id, active, "member done");
                    }
                }
            }
            drop(members);

            if let Some(err) = fault {
                return Err(err);
            }

            let kinds = DependentKind::for_tally(&self.tally);
            let mut chains = self.dependent_chains(&kinds);
            if self.spec.verbose {
                debug!(
                    group_id = %self.id,
                    success = self.tally.success,
                    failure = self.tally.failure,
                    dependents = chains.len(),
                    "all members done"
                );
            }
            run_dependents(&mut chains).await?;

            self.hub.done(&self.id);
            Ok(self.tally)
        }
        .boxed()
    }

    fn dependent_chains(&self, kinds: &[DependentKind]) -> Vec<SerialChain> {
        kinds
            .iter()
            .filter_map(|kind| {
                self.spec.on.get(*kind).map(|spec| {
                    let chain = SerialChain::nested(spec.clone(), &self.id.dependent(*kind), &self.ctx);
                    chain.subscribe(self.hub.relay());
                    chain
                })
            })
            .collect()
    }

    fn report(&self, err: &EngineError) {
        self.hub.error(err);
        if self.spec.verbose {
            warn!(group_id = %self.id, "{:?}", err);
        }
    }
}
