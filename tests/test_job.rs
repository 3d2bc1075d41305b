//! Job scheduling tests

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskchain::{
    action_fn, ActionError, ActionRegistry, BufferingListener, ChannelListener, FlowContext, IdAllocator, Job,
    JobConfig, JobListener, JobSnapshot,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Default)]
struct DoneCounter {
    done: AtomicU64,
    aborted: AtomicU64,
}

impl JobListener for DoneCounter {
    fn on_job_done(&self, _job: &JobSnapshot) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }

    fn on_abort(&self, _job: &JobSnapshot) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

fn context() -> FlowContext {
    let registry = ActionRegistry::with_builtins();
    registry.register_as(
        "flaky",
        action_fn(|ctx| async move {
            match ctx.data().and_then(|data| data.as_bool()) {
                Some(true) => Ok(None),
                _ => Err(ActionError::failed("flaky")),
            }
        }),
    );
    FlowContext::new(IdAllocator::new(), registry)
}

#[tokio::test]
async fn test_job_from_yaml_file() -> anyhow::Result<()> {
    init_tracing();
    let dir = std::env::temp_dir().join(format!("taskchain-job-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("job.yaml");
    std::fs::write(
        &path,
        r#"
id: nightly
description: nightly checks
runOnce: true
interval_ms: 1
task:
  - action: flaky
    data: false
    on:
      failure:
        - action: flaky
          data: true
  - action: echo
"#,
    )?;

    let job = Job::with_context(JobConfig::load_yaml_file(&path)?, &context());
    let buffer = BufferingListener::new();
    job.subscribe(buffer.clone());
    job.start();
    job.join().await?;
    std::fs::remove_dir_all(&dir)?;

    let mut started: Vec<String> = buffer.started().iter().map(|id| id.to_string()).collect();
    started.sort();
    assert_eq!(
        started,
        vec!["nightly.c.s0.t0", "nightly.c.s0.t0.failure.c.s0.t0", "nightly.c.s0.t1"]
    );

    let snapshot = job.data();
    assert_eq!(snapshot.done_count, 1);
    assert_eq!(snapshot.description, "nightly checks");
    assert!(job.is_terminated());
    Ok(())
}

#[tokio::test]
async fn test_job_repeats_until_aborted() {
    init_tracing();
    let job = Job::with_context(
        JobConfig::from_yaml_str("interval_ms: 2\ntask:\n  - action: echo\n").unwrap(),
        &context(),
    );
    let (listener, mut rx) = ChannelListener::new("repeat");
    job.subscribe(listener);
    let counter = Arc::new(DoneCounter::default());
    job.subscribe_job(counter.clone());

    job.start();
    while counter.done.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(!job.is_terminated());

    job.abort();
    job.abort();
    job.join().await.unwrap();

    assert!(job.is_terminated());
    assert_eq!(counter.aborted.load(Ordering::SeqCst), 1);
    assert_eq!(counter.done.load(Ordering::SeqCst), job.done_count());

    let mut names = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        names.push(envelope.event.name());
    }
    let runs = names.iter().filter(|name| **name == "done").count() as u64;
    assert_eq!(runs, job.done_count());
}

#[tokio::test]
async fn test_job_start_after_abort_is_ignored() {
    init_tracing();
    let job = Job::with_context(JobConfig::from_yaml_str("task: []").unwrap(), &context());
    job.abort();
    job.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(job.done_count(), 0);
    assert!(job.is_terminated());
    job.join().await.unwrap();
}
