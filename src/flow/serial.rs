//! Serial chain: an ordered list of stages, each one a parallel group.
//! Stage N+1 is only instantiated and started after stage N is done.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::{EngineError, IdAllocator, NodeId, Result};
use crate::flow::context::FlowContext;
use crate::flow::events::{EventHub, TaskListener};
use crate::flow::node::Tally;
use crate::flow::parallel::ParallelGroup;
use crate::flow::spec::ChainSpec;

pub struct SerialChain {
    id: NodeId,
    spec: ChainSpec,
    hub: EventHub,
    ctx: FlowContext,
    queue: VecDeque<ParallelGroup>,
    tally: Tally,
}

impl SerialChain {
    /// Root chain with the next chain id
    pub fn new(spec: ChainSpec, ctx: &FlowContext) -> Self {
        let id = ctx.ids.resolve(None, IdAllocator::next_chain);
        Self::with_id(spec, id, ctx)
    }

    pub fn with_id(spec: ChainSpec, id: NodeId, ctx: &FlowContext) -> Self {
        Self {
            id,
            spec,
            hub: EventHub::new(),
            ctx: ctx.clone(),
            queue: VecDeque::new(),
            tally: Tally::default(),
        }
    }

    /// Chain nested in a group slot: `<parent>.c`
    pub fn nested(spec: ChainSpec, parent: &NodeId, ctx: &FlowContext) -> Self {
        Self::with_id(spec, parent.nested_chain(), ctx)
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

    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Stages still waiting to complete, head first
    pub fn pending(&self) -> Vec<NodeId> {
        self.queue.iter().map(|stage| stage.id().clone()).collect()
    }

    /// Sanitize the configuration into the stage queue. Disabled stages are
    /// skipped but keep their positional id.
    pub fn prepare(&mut self) -> Result<()> {
        let stages = self.spec.stages(&self.id)?;
        self.queue.clear();
        for (index, stage) in stages.into_iter().enumerate() {
            let stage_id = self.id.stage(index);
            if !stage.is_enabled() {
                debug!(chain_id = %self.id, stage_id = %stage_id, "stage disabled");
                continue;
            }
            let group = ParallelGroup::with_id(stage, stage_id, &self.ctx);
            group.subscribe(self.hub.relay());
            self.queue.push_back(group);
        }
        Ok(())
    }

    /// Record that stage `id` is done. Only the head of the queue may
    /// complete; anything else means a stage signaled completion twice or
    /// out of order.
    pub fn complete_stage(&mut self, id: &NodeId) -> Result<()> {
        let head = self.queue.front().map(|stage| stage.id());
        if head != Some(id) {
            let err = EngineError::stage_integrity_violation(&self.id, head, id);
            error!(chain_id = %self.id, "{}", err);
            self.hub.error(&err);
            return Err(err);
        }
        self.queue.pop_front();
        Ok(())
    }

    /// Run every stage in order. Resolves once the chain has emitted `done`.
    ///
    /// A chain can be run again; each run rebuilds its stages from the
    /// configuration.
    pub fn run(&mut self) -> BoxFuture<'_, Result<Tally>> {
        async move {
            self.tally = Tally::default();

            if let Err(err) = self.prepare() {
                warn!(chain_id = %self.id, "{}", err);
                self.hub.error(&err);
                self.hub.done(&self.id);
                return Ok(Tally::default());
            }

            while let Some(head) = self.queue.front_mut() {
                let stage_id = head.id().clone();
                let stage_tally = head.run().await?;
                self.tally += stage_tally;
                self.complete_stage(&stage_id)?;
                debug!(chain_id = %self.id, stage_id = %stage_id, remaining = self.queue.len(), "stage done");
            }

            self.hub.done(&self.id);
            Ok(self.tally)
        }
        .boxed()
    }
}
