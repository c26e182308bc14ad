use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronshot_core::config::SchedulerConfig;
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    store::JobStore,
    types::{FiredJob, RunStatus},
};

/// Runs the command of a fired descriptor.
///
/// `Ok` carries the return message recorded as `succeeded`; `Err` carries the
/// message recorded as `failed`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, job: FiredJob) -> std::result::Result<String, String>;
}

/// Poller of the recurring scheduler.
///
/// On every tick it launches each due descriptor as an independent task, so
/// a slow body never delays other jobs or the next tick. Nothing stops a
/// descriptor from firing again while a previous run is still in progress.
pub struct SchedulerEngine {
    store: JobStore,
    executor: Arc<dyn CommandExecutor>,
    tick: Duration,
    in_flight: JoinSet<()>,
}

impl SchedulerEngine {
    pub fn new(store: JobStore, executor: Arc<dyn CommandExecutor>, tick: Duration) -> Self {
        Self {
            store,
            executor,
            tick,
            in_flight: JoinSet::new(),
        }
    }

    /// Build an engine polling every `config.tick_millis`.
    pub fn from_config(
        store: JobStore,
        executor: Arc<dyn CommandExecutor>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(store, executor, Duration::from_millis(config.tick_millis))
    }

    /// Main event loop. Polls every tick until `shutdown` broadcasts `true`,
    /// then waits for in-flight bodies to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler engine started");
        self.fail_orphaned_on_startup();

        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()) {
                        error!("scheduler tick error: {e}");
                    }
                    self.collect_finished();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        self.drain().await;
    }

    /// Fire every descriptor due at `now`. Returns how many were launched.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.due_jobs(now)?;
        let mut launched = 0;

        for job in due {
            let Some(fired) = self.store.start_run(&job, now)? else {
                continue;
            };
            info!(job_id = fired.job_id, name = %fired.name, run_id = %fired.run_id, "firing job");

            let store = self.store.clone();
            let executor = Arc::clone(&self.executor);
            self.in_flight.spawn(async move {
                let run_id = fired.run_id.clone();
                let name = fired.name.clone();

                // Inner task so a panicking body is still recorded as failed.
                let outcome = tokio::spawn(async move { executor.execute(fired).await }).await;
                let (status, message) = match outcome {
                    Ok(Ok(message)) => (RunStatus::Succeeded, message),
                    Ok(Err(message)) => (RunStatus::Failed, message),
                    Err(e) => (RunStatus::Failed, format!("job body panicked: {e}")),
                };

                if status == RunStatus::Failed {
                    warn!(%name, %run_id, %message, "job failed");
                } else {
                    debug!(%name, %run_id, "job succeeded");
                }
                if let Err(e) = store.finish_run(&run_id, status, &message, Utc::now()) {
                    error!(%name, %run_id, "could not record run outcome: {e}");
                }
            });
            launched += 1;
        }
        Ok(launched)
    }

    /// Wait for every launched body to finish and its outcome to be recorded.
    pub async fn drain(&mut self) {
        while let Some(res) = self.in_flight.join_next().await {
            if let Err(e) = res {
                error!("job task failed: {e}");
            }
        }
    }

    /// Number of bodies still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn collect_finished(&mut self) {
        while let Some(res) = self.in_flight.try_join_next() {
            if let Err(e) = res {
                error!("job task failed: {e}");
            }
        }
    }

    /// Records still `running` at startup belong to a previous process.
    fn fail_orphaned_on_startup(&self) {
        match self.store.fail_orphaned_runs(Utc::now()) {
            Ok(n) if n > 0 => warn!(count = n, "orphaned runs marked failed on startup"),
            Err(e) => error!("orphaned-run sweep failed: {e}"),
            _ => {}
        }
    }
}
