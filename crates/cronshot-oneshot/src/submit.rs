use std::sync::Arc;

use cronshot_scheduler::{RecurringScheduler, Schedule};
use tracing::info;

use crate::error::{OneShotError, Result};
use crate::types::{JobIdentifier, Submission};

/// Registers "run now" jobs as the shortest interval the scheduler accepts.
///
/// Left alone, such a descriptor fires on the next poll and then on every
/// following one; the job is expected to park itself when it finishes.
pub struct Submitter {
    scheduler: Arc<dyn RecurringScheduler>,
    interval_secs: u64,
}

impl Submitter {
    pub fn new(scheduler: Arc<dyn RecurringScheduler>, interval_secs: u64) -> Self {
        Self {
            scheduler,
            interval_secs,
        }
    }

    /// Create exactly one descriptor for `id`.
    ///
    /// The existence check runs first so a clash is reported even by stores
    /// without a unique constraint; the store's own constraint still covers a
    /// concurrent submitter slipping in between.
    pub fn submit(&self, id: &JobIdentifier, command_text: &str) -> Result<Submission> {
        if self.scheduler.descriptor(id.as_str())?.is_some() {
            return Err(OneShotError::DuplicateIdentifier { id: id.to_string() });
        }

        let schedule = Schedule::Interval {
            every_secs: self.interval_secs,
        };
        let descriptor = self
            .scheduler
            .create_schedule(id.as_str(), &schedule, command_text)?;

        info!(
            job_id = descriptor.id,
            name = %id,
            submitted_at = %descriptor.created_at,
            "one-shot job submitted"
        );

        Ok(Submission {
            identifier: id.clone(),
            descriptor_id: descriptor.id,
            schedule,
            submitted_at: descriptor.created_at,
        })
    }
}
