//! Job: the periodic or one-shot driver of an execution tree
//!
//! A job owns one root chain (`<jobId>.c`) and re-runs it on a fixed
//! interval. Every tree event is re-emitted to the job's listeners. The
//! enable/disable/abort controls gate future runs; an in-flight run is never
//! interrupted.

pub mod config;

pub use config::{JobConfig, DEFAULT_INTERVAL_MS};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::core::{EngineError, IdAllocator, NodeId, Result};
use crate::flow::context::FlowContext;
use crate::flow::events::{EventHub, TaskListener};
use crate::flow::serial::SerialChain;

/// Job-level notifications
pub trait JobListener: Send + Sync {
    /// One run of the tree finished
    fn on_job_done(&self, _job: &JobSnapshot) {}

    /// The job stopped scheduling runs for good
    fn on_abort(&self, _job: &JobSnapshot) {}
}

/// Serializable view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: NodeId,
    pub description: String,
    pub interval_ms: u64,
    pub run_once: bool,
    pub done_count: u64,
    pub enabled: bool,
    pub verbose: bool,
    pub last_run_id: Option<String>,
}

#[derive(Debug, Default)]
struct JobState {
    enabled: bool,
    was_enabled: bool,
    aborted: bool,
    /// Schedule loop alive
    scheduled: bool,
    /// A tree execution is in flight
    running: bool,
    last_run_id: Option<String>,
}

struct JobInner {
    id: NodeId,
    config: JobConfig,
    chain: tokio::sync::Mutex<SerialChain>,
    state: Mutex<JobState>,
    done_count: AtomicU64,
    hub: EventHub,
    listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    stop: Notify,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// Cheap to clone; clones control the same job
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Job with its own id sequences and the built-in actions
    pub fn new(config: JobConfig) -> Self {
        Self::with_context(config, &FlowContext::with_builtins())
    }

    pub fn with_context(config: JobConfig, ctx: &FlowContext) -> Self {
        let id = ctx.ids.resolve(config.id.as_deref(), IdAllocator::next_job);
        let hub = EventHub::new();
        let chain = SerialChain::with_id(config.task.clone(), id.nested_chain(), ctx);
        chain.subscribe(hub.relay());

        let state = JobState {
            enabled: config.enabled,
            was_enabled: config.enabled,
            ..JobState::default()
        };

        if config.verbose {
            debug!(job_id = %id, "{:?}", config);
        }

        Self {
            inner: Arc::new(JobInner {
                id,
                config,
                chain: tokio::sync::Mutex::new(chain),
                state: Mutex::new(state),
                done_count: AtomicU64::new(0),
                hub,
                listeners: RwLock::new(Vec::new()),
                stop: Notify::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn config(&self) -> &JobConfig {
        &self.inner.config
    }

    /// Observe every event of the tree
    pub fn subscribe(&self, listener: Arc<dyn TaskListener>) {
        self.inner.hub.subscribe(listener);
    }

    pub fn subscribe_job(&self, listener: Arc<dyn JobListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Spawn the schedule loop. Starting an aborted or already started job
    /// does nothing.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.aborted || state.scheduled {
                debug!(job_id = %self.inner.id, "Job already started or aborted");
                return;
            }
            state.scheduled = true;
        }

        let inner = self.inner.clone();
        let span = tracing::info_span!("job", job_id = %self.inner.id);
        let handle = tokio::spawn(inner.schedule().instrument(span));
        *self.inner.handle.lock() = Some(handle);
    }

    /// Let scheduled ticks run the tree again
    pub fn enable(&self) {
        let mut state = self.inner.state.lock();
        state.enabled = true;
        state.was_enabled = true;
    }

    /// Skip scheduled ticks until enabled again
    pub fn disable(&self) {
        self.inner.state.lock().enabled = false;
    }

    /// Stop scheduling for good. An in-flight run completes first and the
    /// abort is signaled after it.
    pub fn abort(&self) {
        let emit_now = {
            let mut state = self.inner.state.lock();
            state.enabled = false;
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.scheduled && !state.running
        };
        self.inner.stop.notify_one();
        if emit_now {
            self.inner.emit_abort();
        }
    }

    /// Wait for the schedule loop to end. Only a run-once or aborted job
    /// ever ends on its own.
    pub async fn join(&self) -> Result<()> {
        let handle = self.inner.handle.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| EngineError::config(format!("Job {} schedule failed: {}", self.inner.id, e)))?,
            None => Ok(()),
        }
    }

    /// Number of completed runs
    pub fn done_count(&self) -> u64 {
        self.inner.done_count.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Never enabled, aborted, or a run-once job that has run
    pub fn is_terminated(&self) -> bool {
        let state = self.inner.state.lock();
        if !state.was_enabled || state.aborted {
            return true;
        }
        self.inner.config.run_once && self.done_count() > 0
    }

    pub fn data(&self) -> JobSnapshot {
        self.inner.snapshot()
    }
}

impl JobInner {
    fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock();
        JobSnapshot {
            id: self.id.clone(),
            description: self.config.description.clone(),
            interval_ms: self.config.interval_ms,
            run_once: self.config.run_once,
            done_count: self.done_count.load(Ordering::SeqCst),
            enabled: state.enabled,
            verbose: self.config.verbose,
            last_run_id: state.last_run_id.clone(),
        }
    }

    fn job_listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.listeners.read().clone()
    }

    fn emit_abort(&self) {
        info!(job_id = %self.id, "Job aborted");
        let snapshot = self.snapshot();
        for listener in self.job_listeners() {
            listener.on_abort(&snapshot);
        }
    }

    fn emit_done(&self) {
        self.hub.done(&self.id);
        let snapshot = self.snapshot();
        for listener in self.job_listeners() {
            listener.on_job_done(&snapshot);
        }
    }

    async fn schedule(self: Arc<Self>) -> Result<()> {
        let interval = Duration::from_millis(self.config.interval_ms);
        let outcome = loop {
            tokio::select! {
                _ = self.stop.notified() => break Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }

            {
                let mut state = self.state.lock();
                if state.aborted {
                    break Ok(());
                }
                if !state.enabled {
                    debug!(job_id = %self.id, "Job disabled, tick skipped");
                    continue;
                }
                state.running = true;
            }

            let run = self.run_tree().await;

            let aborted = {
                let mut state = self.state.lock();
                state.running = false;
                state.aborted
            };

            if let Err(err) = run {
                error!(job_id = %self.id, "Job stopped: {}", err);
                break Err(err);
            }
            if aborted {
                self.emit_abort();
                break Ok(());
            }
            if self.config.run_once {
                break Ok(());
            }
        };

        self.state.lock().scheduled = false;
        outcome
    }

    /// One execution of the root chain
    async fn run_tree(&self) -> Result<()> {
        let run_id = Uuid::new_v4().to_string();
        self.state.lock().last_run_id = Some(run_id.clone());

        let mut chain = self.chain.lock().await;
        let tally = chain
            .run()
            .instrument(tracing::debug_span!("run", run_id = %run_id))
            .await?;
        drop(chain);

        let done_count = self.done_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.verbose {
            debug!(
                job_id = %self.id,
                run_id = %run_id,
                done_count,
                success = tally.success,
                failure = tally.failure,
                "Job run done"
            );
        }
        self.emit_done();
        Ok(())
    }
}
