//! Action contract consumed by leaf tasks
//!
//! An action receives an [`ActionContext`] and reports through it: any number
//! of progress logs, then one completion. The completion handle is
//! single-shot; the first call wins and every later call is a no-op, which is
//! what makes a completion racing the task timeout harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::core::{ActionError, NodeId};
use crate::flow::events::{EventHub, LogEntry, TaskInfo};

/// What an action reports on completion: a payload on success, an error on
/// failure
pub type Completed = std::result::Result<Option<Value>, ActionError>;

/// A unit of work run by a [`Task`](crate::flow::task::Task).
///
/// `run` may return before completing; the action is free to hand the context
/// (or a clone of it) to background work and call [`ActionContext::done`]
/// later. An action that never completes is only stopped by the task timeout.
#[async_trait]
pub trait Action: Send + Sync {
    /// Get the name of this action
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn run(&self, ctx: ActionContext);
}

/// Progress message as given by an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogMessage {
    Text(String),
    Structured {
        text: String,
        timestamp: Option<DateTime<Utc>>,
    },
}

impl LogMessage {
    fn normalize(self, elapsed_ms: u64) -> LogEntry {
        let (text, timestamp) = match self {
            LogMessage::Text(text) => (text, None),
            LogMessage::Structured { text, timestamp } => (text, timestamp),
        };
        LogEntry {
            text,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            elapsed_ms,
        }
    }
}

impl From<&str> for LogMessage {
    fn from(text: &str) -> Self {
        LogMessage::Text(text.to_string())
    }
}

impl From<String> for LogMessage {
    fn from(text: String) -> Self {
        LogMessage::Text(text)
    }
}

/// Single-shot completion handle
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<oneshot::Sender<Completed>>>>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Completed>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (completion, rx)
    }

    /// Deliver the outcome. Returns false when the task already had one.
    pub fn complete(&self, outcome: Completed) -> bool {
        let sender = self.slot.lock().take();
        match sender {
            // The task may have stopped listening; the outcome is still the winner
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Handle that can still complete but does not keep the channel open.
    /// Once every strong handle is gone the receiver sees the drop.
    pub(crate) fn downgrade(&self) -> WeakCompletion {
        WeakCompletion {
            slot: Arc::downgrade(&self.slot),
        }
    }
}

pub(crate) struct WeakCompletion {
    slot: Weak<Mutex<Option<oneshot::Sender<Completed>>>>,
}

impl WeakCompletion {
    pub(crate) fn complete(&self, outcome: Completed) -> bool {
        match self.slot.upgrade() {
            Some(slot) => Completion { slot }.complete(outcome),
            None => false,
        }
    }
}

/// Everything an action is handed when its task starts
#[derive(Clone)]
pub struct ActionContext {
    task: TaskInfo,
    started: Instant,
    completion: Completion,
    hub: EventHub,
}

impl ActionContext {
    pub(crate) fn new(task: TaskInfo, started: Instant, completion: Completion, hub: EventHub) -> Self {
        Self {
            task,
            started,
            completion,
            hub,
        }
    }

    /// Data the task was configured with, if any
    pub fn data(&self) -> Option<&Value> {
        self.task.data.as_ref()
    }

    /// Deserialize the configured data
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = self
            .task
            .data
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Task {} has no data", self.task.id))?;
        serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("Failed to deserialize data of task {}: {}", self.task.id, e))
    }

    /// The running task
    pub fn task(&self) -> &TaskInfo {
        &self.task
    }

    pub fn id(&self) -> &NodeId {
        &self.task.id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Report progress. Ignored once the task has its result.
    pub fn log(&self, message: impl Into<LogMessage>) {
        if self.completion.is_completed() {
            return;
        }
        let entry = message.into().normalize(self.elapsed_ms());
        self.hub.log(&entry, &self.task);
    }

    /// Complete the task. Only the first call has any effect.
    pub fn done(&self, outcome: Completed) -> bool {
        let delivered = self.completion.complete(outcome);
        if !delivered {
            tracing::debug!(task_id = %self.task.id, "completion ignored, task already has a result");
        }
        delivered
    }

    pub fn succeed(&self, payload: impl Into<Option<Value>>) -> bool {
        self.done(Ok(payload.into()))
    }

    pub fn fail(&self, error: impl Into<ActionError>) -> bool {
        self.done(Err(error.into()))
    }

    /// Detached completion handle, for work that outlives `run`
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

/// Wrapper turning an async closure into an action that completes with the
/// closure's return value
pub struct FnAction<F> {
    name: String,
    func: F,
}

impl<F> FnAction<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Completed> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: ActionContext) {
        let handle = ctx.clone();
        let outcome = (self.func)(ctx).await;
        handle.done(outcome);
    }
}

/// Wrapper for a synchronous callback that completes on its own terms:
/// through the context, later, more than once, or never
pub struct CallbackAction<F> {
    name: String,
    func: F,
}

impl<F> CallbackAction<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Action for CallbackAction<F>
where
    F: Fn(ActionContext) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: ActionContext) {
        (self.func)(ctx);
    }
}

/// Build an action from an async closure
pub fn action_fn<F, Fut>(func: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Completed> + Send + 'static,
{
    Arc::new(FnAction::new("fn", func))
}

/// Build an action from a callback that drives the context itself
pub fn callback<F>(func: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext) + Send + Sync + 'static,
{
    Arc::new(CallbackAction::new("callback", func))
}

/// Echo action: succeeds with the task's data as payload
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(&self, ctx: ActionContext) {
        tracing::debug!("Echo action: {} with data: {:?}", ctx.id(), ctx.data());
        let payload = ctx.data().cloned();
        ctx.succeed(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::events::BufferingListener;
    use serde_json::json;

    fn context(hub: EventHub) -> (ActionContext, oneshot::Receiver<Completed>) {
        let (completion, rx) = Completion::channel();
        let task = TaskInfo {
            id: NodeId::from("t"),
            description: String::new(),
            action: "test".to_string(),
            data: Some(json!({"host": "localhost"})),
            timeout_ms: 0,
        };
        (ActionContext::new(task, Instant::now(), completion, hub), rx)
    }

    #[tokio::test]
    async fn test_completion_is_single_shot() {
        let (ctx, rx) = context(EventHub::new());
        assert!(ctx.succeed(json!(1)));
        assert!(!ctx.fail(ActionError::failed("late")));
        assert_eq!(rx.await.unwrap(), Ok(Some(json!(1))));
    }

    #[tokio::test]
    async fn test_logs_after_completion_are_dropped() {
        let hub = EventHub::new();
        let buffer = BufferingListener::new();
        hub.subscribe(buffer.clone());

        let (ctx, _rx) = context(hub);
        ctx.log("before");
        ctx.log(LogMessage::Structured {
            text: "structured".to_string(),
            timestamp: None,
        });
        ctx.done(Ok(None));
        ctx.log("after");

        assert_eq!(buffer.names(), vec!["tasklog", "tasklog"]);
    }

    #[tokio::test]
    async fn test_data_as() {
        #[derive(Deserialize)]
        struct Target {
            host: String,
        }
        let (ctx, _rx) = context(EventHub::new());
        let target: Target = ctx.data_as().unwrap();
        assert_eq!(target.host, "localhost");
    }

    #[tokio::test]
    async fn test_fn_action_completes_with_return_value() {
        let action = action_fn(|ctx: ActionContext| async move {
            ctx.log("working");
            Err(ActionError::failed("unreachable host"))
        });
        let (ctx, rx) = context(EventHub::new());
        action.run(ctx).await;
        assert_eq!(rx.await.unwrap(), Err(ActionError::failed("unreachable host")));
    }

    #[tokio::test]
    async fn test_weak_handle_does_not_hold_the_channel() {
        let (completion, rx) = Completion::channel();
        let weak = completion.downgrade();
        drop(completion);
        assert!(rx.await.is_err());
        assert!(!weak.complete(Ok(None)));
    }
}
