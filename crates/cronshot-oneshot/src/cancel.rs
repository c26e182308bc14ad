use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronshot_scheduler::{CalendarPattern, RecurringScheduler, Schedule};
use tracing::{info, instrument, warn};

use crate::error::{OneShotError, Result};
use crate::lifecycle::{Lifecycle, OneShotState};
use crate::types::{DisableOutcome, JobIdentifier};

/// Parks a job by rewriting its schedule to a calendar instant one tick in
/// the past.
///
/// A fixed minute/hour/day/month names a single instant; written after it has
/// passed, the descriptor has no next run and the poller never picks it up
/// again. Between the firing
/// that started the body and this rewrite the scheduler can fire again; that
/// window is at most one interval and is the reason bodies must be idempotent.
pub struct SelfCancel {
    scheduler: Arc<dyn RecurringScheduler>,
    lifecycle: Arc<Lifecycle>,
}

impl SelfCancel {
    pub fn new(scheduler: Arc<dyn RecurringScheduler>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            scheduler,
            lifecycle,
        }
    }

    pub fn disable(&self, id: &JobIdentifier) -> Result<DisableOutcome> {
        self.disable_at(id, Utc::now())
    }

    #[instrument(skip(self), fields(name = %id))]
    pub fn disable_at(&self, id: &JobIdentifier, now: DateTime<Utc>) -> Result<DisableOutcome> {
        // The rewrite resupplies the whole descriptor, so take the command
        // from the latest run; a job parked before it ever ran has none.
        let command = match self.scheduler.latest_run(id.as_str())? {
            Some(run) => run.command,
            None => self
                .scheduler
                .descriptor(id.as_str())?
                .map(|d| d.command)
                .ok_or_else(|| OneShotError::IdentifierNotFound { id: id.to_string() })?,
        };

        let schedule = Schedule::Calendar(CalendarPattern::one_tick_before(now));
        self.scheduler
            .replace_schedule(id.as_str(), &schedule, &command)?;
        self.lifecycle.advance(id, OneShotState::Disabling);

        // A concurrent park may have written a different minute; any parked
        // schedule is as good as ours.
        let confirmed = self
            .scheduler
            .descriptor(id.as_str())?
            .is_some_and(|d| d.is_parked());

        if confirmed {
            self.lifecycle.advance(id, OneShotState::Disabled);
            info!(%schedule, "one-shot job parked");
        } else {
            warn!(%schedule, "past-dated schedule written but read-back shows it can still fire");
        }

        Ok(DisableOutcome {
            identifier: id.clone(),
            schedule,
            confirmed,
        })
    }
}
