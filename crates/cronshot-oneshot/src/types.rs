use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronshot_scheduler::{ExecutionRecord, RunStatus, Schedule};
use serde::{Deserialize, Serialize};

/// Unique job name, used as the descriptor name in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentifier(pub String);

impl JobIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The work a one-shot job performs.
///
/// A body can be fired more than once if the scheduler ticks again before the
/// job has parked its own schedule, so implementations must be idempotent
/// (an insert that tolerates a duplicate, an upsert, a keyed write).
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobBody for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

/// A body plus the command text stored on its descriptor and run records.
#[derive(Clone)]
pub struct Command {
    pub text: String,
    pub body: Arc<dyn JobBody>,
}

impl Command {
    pub fn new(text: impl Into<String>, body: impl JobBody + 'static) -> Self {
        Self {
            text: text.into(),
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("text", &self.text).finish()
    }
}

/// Receipt for a registered one-shot job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub identifier: JobIdentifier,
    /// Id the store assigned to the descriptor.
    pub descriptor_id: i64,
    pub schedule: Schedule,
    pub submitted_at: DateTime<Utc>,
}

/// Result of parking a job's schedule in the past.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisableOutcome {
    pub identifier: JobIdentifier,
    /// The past-dated schedule that was written.
    pub schedule: Schedule,
    /// Read-back showed the stored schedule is the one written and it is past-dated.
    pub confirmed: bool,
}

/// Execution history summary for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAudit {
    pub identifier: JobIdentifier,
    /// Every record started out as `running`, so this is the number of firings.
    pub executions: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// More than one firing was recorded: the scheduler ticked again before
    /// the job parked itself.
    pub stale_schedule_race: bool,
}

impl RunAudit {
    pub fn from_runs(identifier: JobIdentifier, runs: &[ExecutionRecord]) -> Self {
        let count = |status: RunStatus| runs.iter().filter(|r| r.status == status).count();
        Self {
            identifier,
            executions: runs.len(),
            running: count(RunStatus::Running),
            succeeded: count(RunStatus::Succeeded),
            failed: count(RunStatus::Failed),
            stale_schedule_race: runs.len() > 1,
        }
    }
}
