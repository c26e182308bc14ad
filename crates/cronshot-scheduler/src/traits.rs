use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ExecutionRecord, JobDescriptor, Schedule};

/// The surface a recurring scheduler exposes to code that manages jobs on it.
///
/// Every method is one short, synchronous operation against the store and
/// every mutation is atomic on its own. Implementations give no ordering
/// guarantee between a mutation here and a firing decided by their poller.
pub trait RecurringScheduler: Send + Sync {
    /// Atomically increment the name counter and return the new value.
    fn reserve_sequence(&self) -> Result<i64>;

    /// Last descriptor id handed out by the store (0 when none yet).
    fn current_sequence(&self) -> Result<i64>;

    /// Insert a new descriptor. Fails with `DuplicateJob` if `name` exists.
    fn create_schedule(&self, name: &str, schedule: &Schedule, command: &str)
        -> Result<JobDescriptor>;

    /// Rewrite schedule and command of an existing descriptor. Fails with
    /// `JobNotFound` if `name` does not exist.
    fn replace_schedule(&self, name: &str, schedule: &Schedule, command: &str)
        -> Result<JobDescriptor>;

    /// Insert or overwrite the descriptor for `name` in one statement.
    fn create_or_replace_schedule(
        &self,
        name: &str,
        schedule: &Schedule,
        command: &str,
    ) -> Result<JobDescriptor>;

    fn descriptor(&self, name: &str) -> Result<Option<JobDescriptor>>;

    /// All descriptors, ordered by id.
    fn list_descriptors(&self) -> Result<Vec<JobDescriptor>>;

    /// Most recently started execution of `name`, if any.
    fn latest_run(&self, name: &str) -> Result<Option<ExecutionRecord>>;

    /// Every recorded execution of `name`, oldest first.
    fn runs_for(&self, name: &str) -> Result<Vec<ExecutionRecord>>;

    /// Returns whether a row was deleted.
    fn delete_descriptor(&self, name: &str) -> Result<bool>;

    /// Delete finished execution records that ended before `cutoff`.
    /// Records still `running` are never touched.
    fn prune_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
