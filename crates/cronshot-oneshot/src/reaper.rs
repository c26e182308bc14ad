use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronshot_core::config::ReaperConfig;
use cronshot_scheduler::{JobDescriptor, RecurringScheduler, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;

const MAX_RETENTION_SECS: u64 = i64::MAX as u64 / 1_000;

/// Which parked descriptors a reap pass may delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapFilter {
    /// Status the latest execution must have.
    pub status: RunStatus,
    /// SQL `LIKE` pattern on the descriptor name (`%` any run, `_` one char).
    pub name_pattern: Option<String>,
}

impl Default for ReapFilter {
    fn default() -> Self {
        Self {
            status: RunStatus::Succeeded,
            name_pattern: None,
        }
    }
}

impl ReapFilter {
    pub fn matching(pattern: impl Into<String>) -> Self {
        Self {
            name_pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    fn admits(&self, name: &str) -> bool {
        self.name_pattern
            .as_deref()
            .map_or(true, |pattern| like_match(pattern, name))
    }
}

/// Totals of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub reaped: usize,
    pub pruned: usize,
}

/// Out-of-band cleanup of parked one-shot descriptors and old run history.
pub struct Reaper {
    scheduler: Arc<dyn RecurringScheduler>,
    interval: Duration,
    retention: chrono::Duration,
    name_pattern: Option<String>,
}

impl Reaper {
    pub fn new(scheduler: Arc<dyn RecurringScheduler>, config: &ReaperConfig) -> Self {
        Self {
            scheduler,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            retention: chrono::Duration::seconds(
                config.history_retention_secs.min(MAX_RETENTION_SECS) as i64,
            ),
            name_pattern: config.name_pattern.clone(),
        }
    }

    /// Delete parked descriptors whose latest run succeeded.
    ///
    /// Only `succeeded` is accepted here; removing failed jobs needs
    /// [`Reaper::reap_failed`].
    pub fn reap(&self, filter: &ReapFilter) -> Result<usize> {
        if filter.status != RunStatus::Succeeded {
            warn!(status = %filter.status, "reap only removes succeeded jobs, use reap_failed");
            return Ok(0);
        }
        self.remove_parked(filter)
    }

    /// Explicit override: delete parked descriptors whose latest run failed.
    pub fn reap_failed(&self, name_pattern: Option<&str>) -> Result<usize> {
        let filter = ReapFilter {
            status: RunStatus::Failed,
            name_pattern: name_pattern.map(str::to_string),
        };
        self.remove_parked(&filter)
    }

    #[instrument(skip(self), fields(status = %filter.status))]
    fn remove_parked(&self, filter: &ReapFilter) -> Result<usize> {
        let mut removed = 0;
        for descriptor in self.scheduler.list_descriptors()? {
            if !self.removable(&descriptor, filter)? {
                continue;
            }
            if self.scheduler.delete_descriptor(&descriptor.name)? {
                debug!(job_id = descriptor.id, name = %descriptor.name, "reaped");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "parked one-shot jobs reaped");
        }
        Ok(removed)
    }

    fn removable(&self, descriptor: &JobDescriptor, filter: &ReapFilter) -> Result<bool> {
        if !descriptor.is_parked() || !filter.admits(&descriptor.name) {
            return Ok(false);
        }
        let runs = self.scheduler.runs_for(&descriptor.name)?;
        // A raced firing may still be running behind a finished latest record.
        if runs.iter().any(|r| r.status == RunStatus::Running) {
            return Ok(false);
        }
        let latest = self.scheduler.latest_run(&descriptor.name)?;
        Ok(latest.is_some_and(|run| run.status == filter.status))
    }

    /// Delete finished run records older than the retention window.
    pub fn prune_history(&self) -> Result<usize> {
        self.prune_history_at(Utc::now())
    }

    pub fn prune_history_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let pruned = self.scheduler.prune_runs_before(cutoff)?;
        if pruned > 0 {
            info!(count = pruned, "execution history pruned");
        }
        Ok(pruned)
    }

    /// One maintenance pass: reap with the configured pattern, then prune.
    /// Errors are logged, never returned.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let filter = ReapFilter {
            name_pattern: self.name_pattern.clone(),
            ..ReapFilter::default()
        };
        let reaped = self.reap(&filter).unwrap_or_else(|e| {
            error!("reap failed: {e}");
            0
        });
        let pruned = self.prune_history_at(now).unwrap_or_else(|e| {
            error!("history prune failed: {e}");
            0
        });
        SweepReport { reaped, pruned }
    }

    /// Sweep every interval until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reaper started");
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep();
                    debug!(reaped = report.reaped, pruned = report.pruned, "sweep done");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reaper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// SQL `LIKE` matching, case-sensitive: `%` matches any run of characters,
/// `_` exactly one.
pub fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `%` and the text index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        match p.get(pi) {
            Some('%') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some(&c) if c == '_' || c == t[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    pi = sp + 1;
                    ti = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|&c| c == '%')
}
