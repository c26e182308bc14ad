use std::sync::Arc;

use cronshot_core::config::NamingStrategy;
use cronshot_scheduler::RecurringScheduler;
use tracing::debug;

use crate::error::Result;
use crate::types::JobIdentifier;

/// Name used when the caller gives no prefix: `CRON_JOB$_<n>`.
pub const DEFAULT_NAME_PREFIX: &str = "CRON_JOB$_";
/// Inserted between a caller prefix and the number: `<prefix>$_EXECUTE_ONCE<n>`.
pub const EXECUTE_ONCE_MARKER: &str = "$_EXECUTE_ONCE";

/// Produces job identifiers from a counter held by the job store.
pub struct NameGenerator {
    scheduler: Arc<dyn RecurringScheduler>,
    strategy: NamingStrategy,
}

impl NameGenerator {
    pub fn new(scheduler: Arc<dyn RecurringScheduler>, strategy: NamingStrategy) -> Self {
        Self {
            scheduler,
            strategy,
        }
    }

    /// Generate the next identifier.
    ///
    /// With [`NamingStrategy::Anticipate`] the number is the descriptor id the
    /// *next* insert will receive; submit right away or the name and the id
    /// drift apart, and concurrent callers may get the same name.
    pub fn generate(&self, prefix: Option<&str>) -> Result<JobIdentifier> {
        let n = match self.strategy {
            NamingStrategy::Reserve => self.scheduler.reserve_sequence()?,
            NamingStrategy::Anticipate => self.scheduler.current_sequence()? + 1,
        };
        let id = format_name(prefix, n);
        debug!(name = %id, strategy = ?self.strategy, "job name generated");
        Ok(id)
    }
}

/// An empty prefix is treated like no prefix.
pub fn format_name(prefix: Option<&str>, n: i64) -> JobIdentifier {
    match prefix.filter(|p| !p.is_empty()) {
        Some(p) => JobIdentifier(format!("{p}{EXECUTE_ONCE_MARKER}{n}")),
        None => JobIdentifier(format!("{DEFAULT_NAME_PREFIX}{n}")),
    }
}
