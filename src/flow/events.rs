//! Event system for the execution tree
//!
//! Every node exposes the same listener capability. Composite nodes subscribe
//! a relay to each child, so a listener attached at the root observes every
//! leaf task in the tree.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::{ActionError, EngineError, ErrorKind, NodeId};
use crate::flow::node::Outcome;

/// Identity of a leaf task, passed along with every task event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: NodeId,
    pub description: String,
    pub action: String,
    pub data: Option<Value>,
    pub timeout_ms: u64,
}

/// A normalized progress message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Result record of one task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub outcome: Outcome,
    pub payload: Option<Value>,
    pub error: Option<ActionError>,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    /// Any error makes the result a failure; anything else is a success
    pub fn new(completion: std::result::Result<Option<Value>, ActionError>, elapsed_ms: u64) -> Self {
        let (outcome, payload, error) = match completion {
            Ok(payload) => (Outcome::Success, payload, None),
            Err(error) => (Outcome::Failure, None, Some(error)),
        };
        Self {
            outcome,
            payload,
            error,
            timestamp: Utc::now(),
            elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().and_then(ActionError::kind)
    }
}

/// Listener capability implemented by anything observing a node.
///
/// All methods default to no-ops. They may be called from any runtime
/// thread, but never concurrently for the same event.
pub trait TaskListener: Send + Sync {
    /// A leaf task began
    fn on_start(&self, _task: &TaskInfo) {}

    /// A leaf task reported progress
    fn on_log(&self, _entry: &LogEntry, _task: &TaskInfo) {}

    /// A leaf task completed its own action
    fn on_result(&self, _result: &TaskResult, _task: &TaskInfo) {}

    /// The observed node fully finished, dependent sub-trees included
    fn on_done(&self, _node: &NodeId) {}

    /// A configuration or integrity fault occurred
    fn on_error(&self, _error: &EngineError) {}
}

/// The listener list of one node.
///
/// Clones share the list, so listeners subscribed after a child was wired up
/// still receive the child's relayed events.
#[derive(Clone, Default)]
pub struct EventHub {
    listeners: Arc<RwLock<Vec<Arc<dyn TaskListener>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn TaskListener>) {
        self.listeners.write().push(listener);
    }

    /// Listener to subscribe on a child: forwards everything but `done`
    pub fn relay(&self) -> Arc<dyn TaskListener> {
        Arc::new(Relay { hub: self.clone() })
    }

    // Snapshot so no lock is held while listeners run
    fn snapshot(&self) -> Vec<Arc<dyn TaskListener>> {
        self.listeners.read().clone()
    }

    pub fn start(&self, task: &TaskInfo) {
        for listener in self.snapshot() {
            listener.on_start(task);
        }
    }

    pub fn log(&self, entry: &LogEntry, task: &TaskInfo) {
        for listener in self.snapshot() {
            listener.on_log(entry, task);
        }
    }

    pub fn result(&self, result: &TaskResult, task: &TaskInfo) {
        for listener in self.snapshot() {
            listener.on_result(result, task);
        }
    }

    pub fn done(&self, node: &NodeId) {
        for listener in self.snapshot() {
            listener.on_done(node);
        }
    }

    pub fn error(&self, error: &EngineError) {
        for listener in self.snapshot() {
            listener.on_error(error);
        }
    }
}

/// Forwards a child's events to its parent's hub. `done` is consumed by the
/// parent's join logic instead.
struct Relay {
    hub: EventHub,
}

impl TaskListener for Relay {
    fn on_start(&self, task: &TaskInfo) {
        self.hub.start(task);
    }

    fn on_log(&self, entry: &LogEntry, task: &TaskInfo) {
        self.hub.log(entry, task);
    }

    fn on_result(&self, result: &TaskResult, task: &TaskInfo) {
        self.hub.result(result, task);
    }

    fn on_error(&self, error: &EngineError) {
        self.hub.error(error);
    }
}

/// Serializable form of every event on the listener surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeEvent {
    #[serde(rename = "taskstart")]
    TaskStart { task: TaskInfo },
    #[serde(rename = "tasklog")]
    TaskLog { task_id: NodeId, entry: LogEntry },
    #[serde(rename = "taskresult")]
    TaskResult { task_id: NodeId, result: TaskResult },
    #[serde(rename = "done")]
    Done { node_id: NodeId },
    #[serde(rename = "error")]
    Error {
        kind: Option<ErrorKind>,
        node_id: Option<NodeId>,
        message: String,
    },
}

impl TreeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskStart { .. } => "taskstart",
            Self::TaskLog { .. } => "tasklog",
            Self::TaskResult { .. } => "taskresult",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    fn from_error(error: &EngineError) -> Self {
        Self::Error {
            kind: error.kind(),
            node_id: error.node_id().cloned(),
            message: error.to_string(),
        }
    }
}

/// Event with ordering metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub run_id: String,
    pub timestamp: u64,
    pub event: TreeEvent,
}

/// Current timestamp in milliseconds
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Sink taking whole events; every sink is also a listener
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TreeEvent);
}

impl<S: EventSink> TaskListener for S {
    fn on_start(&self, task: &TaskInfo) {
        self.emit(TreeEvent::TaskStart { task: task.clone() });
    }

    fn on_log(&self, entry: &LogEntry, task: &TaskInfo) {
        self.emit(TreeEvent::TaskLog {
            task_id: task.id.clone(),
            entry: entry.clone(),
        });
    }

    fn on_result(&self, result: &TaskResult, task: &TaskInfo) {
        self.emit(TreeEvent::TaskResult {
            task_id: task.id.clone(),
            result: result.clone(),
        });
    }

    fn on_done(&self, node: &NodeId) {
        self.emit(TreeEvent::Done {
            node_id: node.clone(),
        });
    }

    fn on_error(&self, error: &EngineError) {
        self.emit(TreeEvent::from_error(error));
    }
}

/// A simple logging listener
pub struct LoggingListener;

impl TaskListener for LoggingListener {
    fn on_start(&self, task: &TaskInfo) {
        tracing::info!(task_id = %task.id, action = %task.action, "task start");
    }

    fn on_log(&self, entry: &LogEntry, task: &TaskInfo) {
        tracing::info!(task_id = %task.id, elapsed_ms = entry.elapsed_ms, "{}", entry.text);
    }

    fn on_result(&self, result: &TaskResult, task: &TaskInfo) {
        match &result.error {
            Some(error) => tracing::warn!(
                task_id = %task.id,
                elapsed_ms = result.elapsed_ms,
                "task failed: {}",
                error
            ),
            None => tracing::info!(task_id = %task.id, elapsed_ms = result.elapsed_ms, "task succeeded"),
        }
    }

    fn on_done(&self, node: &NodeId) {
        tracing::debug!(node_id = %node, "done");
    }

    fn on_error(&self, error: &EngineError) {
        tracing::error!("{}", error);
    }
}

/// A buffering listener that collects events
#[derive(Default)]
pub struct BufferingListener {
    sequence: AtomicU64,
    events: RwLock<Vec<EventEnvelope>>,
}

impl BufferingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.events.read().clone()
    }

    pub fn events(&self) -> Vec<TreeEvent> {
        self.events.read().iter().map(|e| e.event.clone()).collect()
    }

    /// Event names in emission order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.event.name()).collect()
    }

    pub fn started(&self) -> Vec<NodeId> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.event {
                TreeEvent::TaskStart { task } => Some(task.id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<(NodeId, TaskResult)> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.event {
                TreeEvent::TaskResult { task_id, result } => Some((task_id.clone(), result.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingListener {
    fn emit(&self, event: TreeEvent) {
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: String::new(),
            timestamp: now_ms(),
            event,
        };
        self.events.write().push(envelope);
    }
}

/// Forwards envelopes into a channel, e.g. to a UI or a log shipper
pub struct ChannelListener {
    run_id: String,
    sequence: AtomicU64,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl ChannelListener {
    pub fn new(run_id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Self {
            run_id: run_id.into(),
            sequence: AtomicU64::new(0),
            tx,
        });
        (listener, rx)
    }
}

impl EventSink for ChannelListener {
    fn emit(&self, event: TreeEvent) {
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: self.run_id.clone(),
            timestamp: now_ms(),
            event,
        };
        // Receiver gone means nobody is watching any more
        let _ = self.tx.send(envelope);
    }
}
