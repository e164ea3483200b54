//! Scheduling of reconciliation runs.
//!
//! The scheduler is the entry point an outer trigger uses: single runs,
//! batches of independent runs bounded by the configured worker count, and
//! periodic runs that report each summary to a callback until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use super::engine::{PullTask, PushTask, ReconciliationEngine};
use super::summary::RunSummary;
use super::types::{Direction, SyncMode};
use crate::error::ProvisioningError;

/// One schedulable run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum SyncTask {
    Pull(PullTask),
    Push(PushTask),
}

impl SyncTask {
    async fn run(&self, engine: &ReconciliationEngine) -> RunSummary {
        match self {
            SyncTask::Pull(task) => engine.run_pull(task).await,
            SyncTask::Push(task) => engine.run_push(task).await,
        }
    }

    /// Summary to report when the run never got to produce its own.
    fn aborted(&self, message: String) -> RunSummary {
        let mut summary = match self {
            SyncTask::Pull(task) => {
                RunSummary::new(&task.resource, &task.object_class, Direction::Pull, task.mode)
            }
            SyncTask::Push(task) => RunSummary::new(
                &task.resource,
                &task.object_class,
                Direction::Push,
                SyncMode::Full,
            ),
        };
        summary.fail(&ProvisioningError::Aborted { message });
        summary
    }
}

impl From<PullTask> for SyncTask {
    fn from(task: PullTask) -> Self {
        SyncTask::Pull(task)
    }
}

impl From<PushTask> for SyncTask {
    fn from(task: PushTask) -> Self {
        SyncTask::Push(task)
    }
}

/// Runs reconciliation tasks on the tokio runtime.
pub struct Scheduler {
    engine: Arc<ReconciliationEngine>,
    worker_count: usize,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker_count", &self.worker_count)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        let worker_count = engine.config().worker_count.max(1);
        Self {
            engine,
            worker_count,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub async fn run_pull(&self, task: &PullTask) -> RunSummary {
        self.engine.run_pull(task).await
    }

    pub async fn run_push(&self, task: &PushTask) -> RunSummary {
        self.engine.run_push(task).await
    }

    /// Run independent tasks concurrently, at most `worker_count` at a time.
    ///
    /// Summaries are returned in task order.
    #[instrument(skip_all, fields(tasks = tasks.len(), worker_count = self.worker_count))]
    pub async fn run_all(&self, tasks: Vec<SyncTask>) -> Vec<RunSummary> {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));

        let handles: Vec<(SyncTask, JoinHandle<RunSummary>)> = tasks
            .into_iter()
            .map(|task| {
                let engine = self.engine.clone();
                let semaphore = semaphore.clone();
                let spawned = task.clone();
                let handle = tokio::spawn(async move {
                    // Held until the run completes.
                    let _permit = semaphore.acquire_owned().await;
                    spawned.run(&engine).await
                });
                (task, handle)
            })
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            let summary = match handle.await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "Run task did not complete");
                    task.aborted(e.to_string())
                }
            };
            summaries.push(summary);
        }

        let committed = summaries.iter().filter(|s| s.is_committed()).count();
        info!(committed, failed = summaries.len() - committed, "Scheduled runs finished");
        summaries
    }

    /// Run `task` every `every` until shutdown, passing each summary to `callback`.
    ///
    /// The first run starts immediately. Ticks missed while a run is still in
    /// progress are skipped, not queued.
    pub fn spawn_periodic<F>(&self, task: SyncTask, every: Duration, callback: F) -> JoinHandle<()>
    where
        F: Fn(RunSummary) + Send + Sync + 'static,
    {
        let engine = self.engine.clone();
        let shutdown = self.shutdown.clone();
        let notify = self.notify.clone();
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_ms = every.as_millis() as u64, "Periodic run scheduled");

            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = notify.notified() => {}
                }
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let summary = task.run(&engine).await;
                debug!(run_id = %summary.run_id, state = %summary.state, "Periodic run finished");
                callback(summary);
            }

            info!("Periodic run stopped");
        })
    }

    /// Stop periodic loops and interrupt in-flight runs.
    pub fn shutdown(&self) {
        info!("Scheduler shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.engine.shutdown();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
