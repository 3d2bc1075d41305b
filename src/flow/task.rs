//! Leaf task: one action, an optional timeout, and dependent chains launched
//! off its own outcome

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::{ActionError, EngineError, IdAllocator, NodeId, Result};
use crate::flow::action::{Action, ActionContext, Completed, Completion, WeakCompletion};
use crate::flow::context::FlowContext;
use crate::flow::events::{EventHub, TaskInfo, TaskListener, TaskResult};
use crate::flow::node::{run_dependents, DependentKind, Tally};
use crate::flow::serial::SerialChain;
use crate::flow::spec::TaskSpec;

/// Task lifecycle. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    NeverStarted,
    Started,
    Result,
    Done,
}

impl TaskState {
    /// Move to `next` if that is forward; re-entering an earlier or the
    /// same state is a no-op
    fn advance(&mut self, next: TaskState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

pub struct Task {
    id: NodeId,
    spec: TaskSpec,
    action: Result<Arc<dyn Action>>,
    state: TaskState,
    hub: EventHub,
    ctx: FlowContext,
    result: Option<TaskResult>,
}

impl Task {
    /// Standalone task: explicit configured id, or the next task id
    pub fn new(spec: TaskSpec, ctx: &FlowContext) -> Self {
        let id = ctx.ids.resolve(spec.id.as_deref(), IdAllocator::next_task);
        Self::with_id(spec, id, ctx)
    }

    /// Task at a fixed position in the tree
    pub fn with_id(spec: TaskSpec, id: NodeId, ctx: &FlowContext) -> Self {
        let action = spec.resolve_action(&id, &ctx.registry);
        if spec.verbose {
            debug!(task_id = %id, "{:?}", spec);
        }
        Self {
            id,
            spec,
            action,
            state: TaskState::NeverStarted,
            hub: EventHub::new(),
            ctx: ctx.clone(),
            result: None,
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

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.is_enabled()
    }

    /// The result record, once the action completed
    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// Construction-time configuration fault, if any
    pub fn validate(&self) -> Result<()> {
        match &self.action {
            Ok(_) => Ok(()),
            Err(err) => Err(err.clone()),
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id.clone(),
            description: self.spec.description.clone(),
            action: self.spec.action_name(),
            data: self.spec.data.clone(),
            timeout_ms: self.spec.timeout,
        }
    }

    /// Start the task and resolve once it is done, dependent chains included.
    ///
    /// Starting a task twice, or a disabled task, does nothing. A task whose
    /// action could not be resolved reports the fault on its `error` channel
    /// and finishes without a result.
    pub fn run(&mut self) -> BoxFuture<'_, Result<Tally>> {
        async move {
            if self.state != TaskState::NeverStarted {
                debug!(task_id = %self.id, "Task already started");
                return Ok(Tally::default());
            }
            if !self.spec.is_enabled() {
                debug!(task_id = %self.id, "Task not enabled");
                return Ok(Tally::default());
            }

            let action = match &self.action {
                Ok(action) => action.clone(),
                Err(err) => {
                    let err = err.clone();
                    self.report(&err);
                    self.state = TaskState::Done;
                    self.hub.done(&self.id);
                    return Ok(Tally::default());
                }
            };

            let started = Instant::now();
            let info = self.info();
            self.state.advance(TaskState::Started);
            self.hub.start(&info);

            let (completion, rx) = Completion::channel();
            // The task only keeps a weak handle, so an action that drops its
            // context or panics closes the channel
            let timeout_handle = completion.downgrade();
            let action_ctx = ActionContext::new(info.clone(), started, completion, self.hub.clone());
            // Runs detached: a timed-out action keeps going, its completion is then a no-op
            tokio::spawn(async move {
                action.run(action_ctx).await;
            });

            let completed = self.await_completion(rx, &timeout_handle).await;
            let result = TaskResult::new(completed, started.elapsed().as_millis() as u64);
            self.state.advance(TaskState::Result);
            self.hub.result(&result, &info);

            if self.spec.verbose {
                match &result.error {
                    Some(err) => debug!(task_id = %self.id, action = %info.action, "failed: {}", err),
                    None => debug!(task_id = %self.id, action = %info.action, "succeeded"),
                }
            }

            let tally = Tally::from(result.outcome);
            let kinds = DependentKind::for_outcome(result.outcome);
            self.result = Some(result);

            let mut chains = self.dependent_chains(&kinds);
            run_dependents(&mut chains).await?;

            self.state.advance(TaskState::Done);
            self.hub.done(&self.id);
            Ok(tally)
        }
        .boxed()
    }

    /// First completion wins; the timeout competes through the same handle
    async fn await_completion(&self, mut rx: oneshot::Receiver<Completed>, completion: &WeakCompletion) -> Completed {
        let dropped = || Err(ActionError::failed("action dropped its completion handle"));

        if self.spec.timeout == 0 {
            debug!(task_id = %self.id, "No run timeout");
            return rx.await.unwrap_or_else(|_| dropped());
        }

        let timeout_ms = self.spec.timeout;
        tokio::select! {
            completed = &mut rx => completed.unwrap_or_else(|_| dropped()),
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                if completion.complete(Err(ActionError::timed_out(timeout_ms))) {
                    debug!(task_id = %self.id, timeout_ms, "Task timed out");
                }
                rx.await.unwrap_or_else(|_| dropped())
            }
        }
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
            warn!(task_id = %self.id, "{:?}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::flow::action::{action_fn, callback};
    use crate::flow::events::{BufferingListener, TreeEvent};
    use crate::flow::node::Outcome;
    use crate::flow::spec::ChainSpec;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> FlowContext {
        FlowContext::with_builtins()
    }

    #[tokio::test]
    async fn test_success_without_payload() {
        let mut task = Task::new(TaskSpec::new(callback(|ctx| { ctx.done(Ok(None)); })), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());

        let tally = task.run().await.unwrap();

        assert_eq!(tally, Tally { success: 1, failure: 0 });
        assert_eq!(buffer.names(), vec!["taskstart", "taskresult", "done"]);
        let results = buffer.results();
        let (_, result) = &results[0];
        assert!(result.error.is_none());
        assert_eq!(result.payload, None);
        assert_eq!(task.state(), TaskState::Done);
    }

    #[tokio::test]
    async fn test_progress_logs_precede_result() {
        let action = action_fn(|ctx| async move {
            ctx.log("before hello world");
            ctx.log("after hello world");
            Ok(Some(json!("hello")))
        });
        let mut task = Task::new(TaskSpec::new(action).with_id("hello"), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());
        task.run().await.unwrap();

        assert_eq!(
            buffer.names(),
            vec!["taskstart", "tasklog", "tasklog", "taskresult", "done"]
        );
        match &buffer.events()[1] {
            TreeEvent::TaskLog { task_id, entry } => {
                assert_eq!(task_id.as_str(), "hello");
                assert_eq!(entry.text, "before hello world");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_double_completion_is_ignored() {
        let action = callback(|ctx| {
            ctx.fail(crate::core::ActionError::failed("first"));
            ctx.succeed(json!("second"));
        });
        let mut task = Task::new(TaskSpec::new(action), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());
        task.run().await.unwrap();

        let results = buffer.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.outcome, Outcome::Failure);
        assert_eq!(buffer.names().iter().filter(|n| **n == "done").count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fires_for_silent_action() {
        let silent = action_fn(|ctx: ActionContext| async move {
            // Holds on to its context and never answers
            std::future::pending::<()>().await;
            drop(ctx);
            Ok(None)
        });
        let mut task = Task::new(TaskSpec::new(silent).with_timeout(10), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());

        let tally = task.run().await.unwrap();

        assert_eq!(tally.failure, 1);
        let results = buffer.results();
        let (_, result) = &results[0];
        assert_eq!(result.error_kind(), Some(ErrorKind::TaskTimedOut));
        assert!(result.elapsed_ms >= 10);
    }

    #[tokio::test]
    async fn test_late_completion_after_timeout_is_a_no_op() {
        let action = callback(|ctx| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                assert!(!ctx.succeed(json!("too late")));
            });
        });
        let mut task = Task::new(TaskSpec::new(action).with_timeout(5), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());
        task.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(buffer.results().len(), 1);
        assert_eq!(buffer.results()[0].1.error_kind(), Some(ErrorKind::TaskTimedOut));
    }

    #[tokio::test]
    async fn test_unbounded_task_completes_normally() {
        let action = action_fn(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            Ok(None)
        });
        let mut task = Task::new(TaskSpec::new(action), &ctx());
        let tally = task.run().await.unwrap();
        assert_eq!(tally.success, 1);
        assert!(task.result().map(|r| r.error.is_none()).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_start_twice_and_disabled_are_no_ops() {
        let mut task = Task::new(TaskSpec::named("echo"), &ctx());
        task.run().await.unwrap();
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());
        assert_eq!(task.run().await.unwrap(), Tally::default());
        assert!(buffer.names().is_empty());

        let mut disabled = Task::new(TaskSpec::named("echo").disabled(), &ctx());
        disabled.subscribe(buffer.clone());
        disabled.run().await.unwrap();
        assert!(buffer.names().is_empty());
        assert_eq!(disabled.state(), TaskState::NeverStarted);
    }

    #[tokio::test]
    async fn test_missing_action_reported_on_error_channel() {
        let mut task = Task::new(TaskSpec::default().with_id("broken"), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());
        task.run().await.unwrap();

        match &buffer.events()[0] {
            TreeEvent::Error { kind, node_id, .. } => {
                assert_eq!(*kind, Some(ErrorKind::MissingAction));
                assert_eq!(node_id.as_ref().map(|id| id.as_str()), Some("broken"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(buffer.names(), vec!["error", "done"]);
    }

    #[tokio::test]
    async fn test_dependent_chains_follow_own_outcome() {
        let failing = action_fn(|_ctx| async { Err(crate::core::ActionError::failed("down")) });
        let spec = TaskSpec::new(failing)
            .with_id("check")
            .on_failure(ChainSpec::of_tasks(vec![TaskSpec::named("echo")]))
            .on_success(ChainSpec::of_tasks(vec![TaskSpec::named("echo")]))
            .on_complete(ChainSpec::of_tasks(vec![TaskSpec::named("echo")]));
        let mut task = Task::new(spec, &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());

        let tally = task.run().await.unwrap();

        // Dependent results are observed but not tallied
        assert_eq!(tally, Tally { success: 0, failure: 1 });
        let mut started: Vec<String> = buffer.started().iter().map(|id| id.to_string()).collect();
        started.sort();
        assert_eq!(
            started,
            vec!["check", "check.complete.c.s0.t0", "check.failure.c.s0.t0"]
        );
        assert_eq!(buffer.names().last(), Some(&"done"));
        assert_eq!(buffer.names().iter().filter(|n| **n == "done").count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_action_fails_without_timeout() {
        let spec = TaskSpec::new(action_fn(|ctx: ActionContext| async move {
            if ctx.data().is_none() {
                panic!("action crashed");
            }
            Ok(None)
        }));
        let mut task = Task::new(spec, &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());

        let tally = tokio::time::timeout(Duration::from_millis(500), task.run())
            .await
            .expect("task must finish")
            .unwrap();

        assert_eq!(tally, Tally { success: 0, failure: 1 });
        assert_eq!(buffer.names(), vec!["taskstart", "taskresult", "done"]);
        let results = buffer.results();
        assert_eq!(results[0].1.outcome, Outcome::Failure);
        assert_eq!(results[0].1.error_kind(), None);
    }

    #[tokio::test]
    async fn test_dropped_context_fails_without_timeout() {
        let mut task = Task::new(TaskSpec::new(callback(drop::<ActionContext>)), &ctx());
        let buffer = BufferingListener::new();
        task.subscribe(buffer.clone());

        let tally = tokio::time::timeout(Duration::from_millis(500), task.run())
            .await
            .expect("task must finish")
            .unwrap();

        assert_eq!(tally.failure, 1);
        assert_eq!(buffer.names(), vec!["taskstart", "taskresult", "done"]);
    }

    #[tokio::test]
    async fn test_dropped_context_fails_before_timeout() {
        let spec = TaskSpec::new(callback(drop::<ActionContext>)).with_timeout(5_000);
        let mut task = Task::new(spec, &ctx());

        let started = Instant::now();
        let tally = task.run().await.unwrap();

        assert_eq!(tally.failure, 1);
        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert_eq!(task.result().and_then(|r| r.error_kind()), None);
    }

    #[test]
    fn test_state_only_moves_forward() {
        let mut state = TaskState::NeverStarted;
        assert!(state.advance(TaskState::Result));
        assert!(!state.advance(TaskState::Started));
        assert!(!state.advance(TaskState::Result));
        assert!(state.advance(TaskState::Done));
        assert_eq!(state, TaskState::Done);
    }
}
