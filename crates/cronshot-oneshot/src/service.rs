use std::sync::Arc;

use async_trait::async_trait;
use cronshot_core::config::CronshotConfig;
use cronshot_scheduler::{CommandExecutor, FiredJob, RecurringScheduler};
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, info, warn};

use crate::{
    cancel::SelfCancel,
    error::{OneShotError, Result},
    lifecycle::{Lifecycle, OneShotState},
    naming::NameGenerator,
    submit::Submitter,
    types::{Command, DisableOutcome, JobBody, JobIdentifier, RunAudit, Submission},
};

/// Entry point for run-once jobs.
///
/// Hand an `Arc<OneShot>` to the scheduler engine as its [`CommandExecutor`]:
/// when a descriptor fires, the registered body runs and, as the last step of
/// the same unit of work, the job parks its own schedule.
pub struct OneShot {
    scheduler: Arc<dyn RecurringScheduler>,
    names: NameGenerator,
    submitter: Submitter,
    trigger: SelfCancel,
    lifecycle: Arc<Lifecycle>,
    bodies: DashMap<JobIdentifier, Arc<dyn JobBody>>,
    disable_on_failure: bool,
}

impl OneShot {
    pub fn new(scheduler: Arc<dyn RecurringScheduler>, config: &CronshotConfig) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        Self {
            names: NameGenerator::new(Arc::clone(&scheduler), config.oneshot.naming),
            submitter: Submitter::new(
                Arc::clone(&scheduler),
                config.scheduler.immediate_interval_secs,
            ),
            trigger: SelfCancel::new(Arc::clone(&scheduler), Arc::clone(&lifecycle)),
            scheduler,
            lifecycle,
            bodies: DashMap::new(),
            disable_on_failure: config.oneshot.disable_on_failure,
        }
    }

    pub fn generate_name(&self, prefix: Option<&str>) -> Result<JobIdentifier> {
        self.names.generate(prefix)
    }

    /// Register `command` to run as soon as the scheduler next polls.
    ///
    /// The body is registered before the descriptor exists so the first
    /// firing always finds it.
    pub fn submit_immediate(&self, id: JobIdentifier, command: Command) -> Result<Submission> {
        match self.bodies.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(OneShotError::DuplicateIdentifier { id: id.to_string() });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&command.body));
            }
        }
        self.lifecycle.register(&id);

        match self.submitter.submit(&id, &command.text) {
            Ok(submission) => {
                // An eviction sweep may have run while the descriptor did not
                // exist yet.
                self.bodies.entry(id.clone()).or_insert(command.body);
                self.lifecycle.register(&id);
                Ok(submission)
            }
            Err(e) => {
                self.bodies.remove(&id);
                self.lifecycle.forget(&id);
                Err(e)
            }
        }
    }

    /// Generate a name and submit under it in one step.
    pub fn run_once(&self, prefix: Option<&str>, command: Command) -> Result<Submission> {
        let id = self.generate_name(prefix)?;
        self.submit_immediate(id, command)
    }

    /// Park `id`'s schedule in the past. Usable on jobs submitted elsewhere.
    pub fn disable(&self, id: &JobIdentifier) -> Result<DisableOutcome> {
        self.trigger.disable(id)
    }

    pub fn state(&self, id: &JobIdentifier) -> Option<OneShotState> {
        self.lifecycle.state(id)
    }

    /// Summarise the execution history of `id`.
    pub fn audit(&self, id: &JobIdentifier) -> Result<RunAudit> {
        let runs = self.scheduler.runs_for(id.as_str())?;
        let audit = RunAudit::from_runs(id.clone(), &runs);
        if audit.stale_schedule_race {
            warn!(name = %id, executions = audit.executions, "stale schedule race detected");
        }
        Ok(audit)
    }

    /// Release bodies and state of jobs that are parked or whose descriptor
    /// is gone. Returns how many.
    pub fn evict_settled(&self) -> usize {
        let mut settled = self.lifecycle.evict_disabled();
        for id in self.lifecycle.ids() {
            match self.scheduler.descriptor(id.as_str()) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.lifecycle.forget(&id);
                    settled.push(id);
                }
                Err(e) => warn!(name = %id, "eviction skipped, descriptor lookup failed: {e}"),
            }
        }
        for id in &settled {
            self.bodies.remove(id);
        }
        if !settled.is_empty() {
            debug!(evicted = settled.len(), "released settled one-shot jobs");
        }
        settled.len()
    }

    /// Number of registered bodies held in memory.
    pub fn tracked(&self) -> usize {
        self.bodies.len()
    }

    fn release(&self, id: &JobIdentifier) {
        self.bodies.remove(id);
        self.lifecycle.forget(id);
    }

    /// Cleanup must never change the body's result: log and move on.
    fn disable_best_effort(&self, id: &JobIdentifier) {
        match self.trigger.disable(id) {
            Ok(outcome) if outcome.confirmed => {}
            Ok(_) => warn!(name = %id, "job parked without read-back confirmation"),
            Err(e @ OneShotError::IdentifierNotFound { .. }) => {
                // Nothing left to fire it: drop what we hold for it.
                warn!(name = %id, "could not park job: {e}");
                self.release(id);
            }
            Err(e) => warn!(name = %id, "could not park job, it may fire again: {e}"),
        }
    }
}

#[async_trait]
impl CommandExecutor for OneShot {
    async fn execute(&self, job: FiredJob) -> std::result::Result<String, String> {
        let id = JobIdentifier::from(job.name);
        let Some(body) = self.bodies.get(&id).map(|b| Arc::clone(b.value())) else {
            warn!(name = %id, run_id = %job.run_id, "fired job has no registered body");
            return Err(format!("no body registered for {id}"));
        };

        let fires = self.lifecycle.fired(&id);
        debug!(name = %id, run_id = %job.run_id, fires, "running one-shot body");

        let result = body.run().await;

        if result.is_ok() || self.disable_on_failure {
            self.disable_best_effort(&id);
        }

        match result {
            Ok(()) => {
                info!(name = %id, "one-shot job completed");
                Ok("one-shot body completed".to_string())
            }
            Err(e) => Err(format!("{e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaper::{ReapFilter, Reaper};
    use chrono::{Duration as ChronoDuration, Utc};
    use cronshot_core::config::ReaperConfig;
    use cronshot_scheduler::{
        ExecutionRecord, JobDescriptor, JobStore, RunStatus, Schedule, SchedulerEngine,
        SchedulerError,
    };
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct Harness {
        store: JobStore,
        oneshot: Arc<OneShot>,
        engine: SchedulerEngine,
    }

    fn harness(config: CronshotConfig) -> Harness {
        let store = JobStore::open_in_memory().unwrap();
        let oneshot = Arc::new(OneShot::new(Arc::new(store.clone()), &config));
        let engine = SchedulerEngine::from_config(
            store.clone(),
            Arc::clone(&oneshot) as Arc<dyn CommandExecutor>,
            &config.scheduler,
        );
        Harness {
            store,
            oneshot,
            engine,
        }
    }

    fn recording_insert(rows: &Arc<Mutex<Vec<String>>>, name: &str) -> Command {
        let rows = Arc::clone(rows);
        let name = name.to_string();
        Command::new(format!("insert(name='{name}')"), move || {
            let rows = Arc::clone(&rows);
            let name = name.clone();
            async move {
                rows.lock().unwrap().push(name);
                anyhow::Ok(())
            }
        })
    }

    fn failing(text: &str) -> Command {
        Command::new(text, || async {
        Err::<(), _>(anyhow::anyhow!("target table missing"))
    })
    }

    #[tokio::test]
    async fn insert_runs_once_parks_itself_and_is_reaped() {
        let mut h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        let id = JobIdentifier::from("J1");

        h.oneshot
            .submit_immediate(id.clone(), recording_insert(&rows, "J1"))
            .unwrap();
        assert_eq!(h.oneshot.state(&id), Some(OneShotState::Pending));

        let t1 = Utc::now() + ChronoDuration::seconds(1);
        assert_eq!(h.engine.tick_at(t1).unwrap(), 1);
        h.engine.drain().await;

        // Later ticks find nothing due.
        assert_eq!(h.engine.tick_at(t1 + ChronoDuration::seconds(1)).unwrap(), 0);
        assert_eq!(h.engine.tick_at(t1 + ChronoDuration::seconds(30)).unwrap(), 0);

        assert_eq!(*rows.lock().unwrap(), vec!["J1".to_string()]);
        let runs = h.store.runs_for("J1").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        assert_eq!(runs[0].command, "insert(name='J1')");

        let d = h.store.descriptor("J1").unwrap().unwrap();
        assert!(d.is_parked());
        assert_eq!(d.next_run, None);
        assert_eq!(h.oneshot.state(&id), Some(OneShotState::Disabled));

        // A year on, the parked instant is still not due.
        assert_eq!(h.engine.tick_at(t1 + ChronoDuration::days(366)).unwrap(), 0);
        h.engine.drain().await;
        assert_eq!(rows.lock().unwrap().len(), 1);

        let audit = h.oneshot.audit(&id).unwrap();
        assert_eq!(audit.executions, 1);
        assert!(!audit.stale_schedule_race);

        let reaper = Reaper::new(Arc::new(h.store.clone()), &ReaperConfig::default());
        assert_eq!(reaper.reap(&ReapFilter::default()).unwrap(), 1);
        assert!(h.store.descriptor("J1").unwrap().is_none());
        // History stays until the retention prune.
        assert_eq!(h.store.runs_for("J1").unwrap().len(), 1);
        assert_eq!(reaper.reap(&ReapFilter::default()).unwrap(), 0);
    }

    #[tokio::test]
    async fn refire_before_parking_is_a_detectable_race() {
        let mut h = harness(CronshotConfig::default());
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let body_gate = Arc::clone(&gate);
        let command = Command::new("slow insert", move || {
            let gate = Arc::clone(&body_gate);
            async move {
                gate.acquire().await?.forget();
                anyhow::Ok(())
            }
        });
        let id = JobIdentifier::from("slow");
        h.oneshot.submit_immediate(id.clone(), command).unwrap();

        let t1 = Utc::now() + ChronoDuration::seconds(1);
        assert_eq!(h.engine.tick_at(t1).unwrap(), 1);
        // The body has not parked the job yet, so the next tick fires it again.
        assert_eq!(h.engine.tick_at(t1 + ChronoDuration::seconds(1)).unwrap(), 1);

        gate.add_permits(2);
        h.engine.drain().await;

        let audit = h.oneshot.audit(&id).unwrap();
        assert_eq!(audit.executions, 2);
        assert_eq!(audit.succeeded, 2);
        assert!(audit.stale_schedule_race);

        assert!(h
            .store
            .descriptor("slow")
            .unwrap()
            .unwrap()
            .is_parked());
        assert_eq!(h.oneshot.state(&id), Some(OneShotState::Disabled));
    }

    #[tokio::test]
    async fn failing_body_is_parked_and_kept_for_diagnosis() {
        let mut h = harness(CronshotConfig::default());
        let id = JobIdentifier::from("broken");
        h.oneshot
            .submit_immediate(id.clone(), failing("insert into missing"))
            .unwrap();

        let t1 = Utc::now() + ChronoDuration::seconds(1);
        h.engine.tick_at(t1).unwrap();
        h.engine.drain().await;
        assert_eq!(h.engine.tick_at(t1 + ChronoDuration::seconds(1)).unwrap(), 0);

        let run = h.store.latest_run("broken").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.return_message.as_deref(), Some("target table missing"));

        let reaper = Reaper::new(Arc::new(h.store.clone()), &ReaperConfig::default());
        assert_eq!(reaper.reap(&ReapFilter::default()).unwrap(), 0);
        assert!(h.store.descriptor("broken").unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_body_keeps_firing_when_configured() {
        let mut config = CronshotConfig::default();
        config.oneshot.disable_on_failure = false;
        let mut h = harness(config);
        h.oneshot
            .submit_immediate("retry".into(), failing("flaky"))
            .unwrap();

        let t1 = Utc::now() + ChronoDuration::seconds(1);
        h.engine.tick_at(t1).unwrap();
        h.engine.drain().await;
        assert_eq!(h.engine.tick_at(t1 + ChronoDuration::seconds(1)).unwrap(), 1);
        h.engine.drain().await;

        assert_eq!(h.store.runs_for("retry").unwrap().len(), 2);
        assert_eq!(
            h.store.descriptor("retry").unwrap().unwrap().schedule,
            Schedule::Interval { every_secs: 1 }
        );
    }

    #[tokio::test]
    async fn park_failure_does_not_fail_the_body() {
        let mut h = harness(CronshotConfig::default());
        let store = h.store.clone();
        // Body removes its own descriptor, as a concurrent reaper might.
        let command = Command::new("self-deleting", move || {
            let store = store.clone();
            async move {
                store.delete_descriptor("vanishing")?;
                anyhow::Ok(())
            }
        });
        h.oneshot
            .submit_immediate("vanishing".into(), command)
            .unwrap();

        h.engine
            .tick_at(Utc::now() + ChronoDuration::seconds(1))
            .unwrap();
        h.engine.drain().await;

        let run = h.store.latest_run("vanishing").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        // Nothing can fire it again, so nothing is held for it.
        assert_eq!(h.oneshot.state(&"vanishing".into()), None);
        assert_eq!(h.oneshot.tracked(), 0);
    }

    #[tokio::test]
    async fn parked_job_is_reaped_half_a_year_later() {
        let mut h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        h.oneshot
            .submit_immediate("J1".into(), recording_insert(&rows, "J1"))
            .unwrap();
        let t1 = Utc::now() + ChronoDuration::seconds(1);
        h.engine.tick_at(t1).unwrap();
        h.engine.drain().await;

        let reaper = Reaper::new(Arc::new(h.store.clone()), &ReaperConfig::default());
        let report = reaper.sweep_at(t1 + ChronoDuration::days(200));
        assert_eq!(report.reaped, 1);
        assert!(h.store.descriptor("J1").unwrap().is_none());
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        h.oneshot
            .submit_immediate("J1".into(), recording_insert(&rows, "a"))
            .unwrap();
        let err = h
            .oneshot
            .submit_immediate("J1".into(), recording_insert(&rows, "b"))
            .unwrap_err();
        assert!(matches!(err, OneShotError::DuplicateIdentifier { .. }));
        assert_eq!(h.store.list_descriptors().unwrap().len(), 1);
    }

    #[test]
    fn descriptor_from_elsewhere_is_duplicate_and_leaves_no_body() {
        let h = harness(CronshotConfig::default());
        h.store
            .create_schedule("taken", &Schedule::Interval { every_secs: 1 }, "x")
            .unwrap();
        let rows = Arc::new(Mutex::new(Vec::new()));
        let err = h
            .oneshot
            .submit_immediate("taken".into(), recording_insert(&rows, "taken"))
            .unwrap_err();
        assert!(matches!(err, OneShotError::DuplicateIdentifier { .. }));
        assert_eq!(h.oneshot.state(&"taken".into()), None);
    }

    #[test]
    fn run_once_names_and_submits() {
        let h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        let a = h
            .oneshot
            .run_once(Some("X"), recording_insert(&rows, "a"))
            .unwrap();
        let b = h.oneshot.run_once(None, recording_insert(&rows, "b")).unwrap();
        assert_eq!(a.identifier.as_str(), "X$_EXECUTE_ONCE1");
        assert_eq!(b.identifier.as_str(), "CRON_JOB$_2");
        assert_eq!(h.store.list_descriptors().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_run_once_with_same_prefix_gets_distinct_names() {
        let h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let oneshot = Arc::clone(&h.oneshot);
                let command = recording_insert(&rows, &format!("job{i}"));
                std::thread::spawn(move || oneshot.run_once(Some("X"), command).unwrap())
            })
            .collect();
        let names: HashSet<String> = handles
            .into_iter()
            .map(|t| t.join().unwrap().identifier.0)
            .collect();

        assert_eq!(names.len(), 2);
        for name in &names {
            let suffix = name.strip_prefix("X$_EXECUTE_ONCE").unwrap();
            assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn unknown_job_fails_without_parking() {
        let mut h = harness(CronshotConfig::default());
        h.store
            .create_schedule("foreign", &Schedule::Interval { every_secs: 1 }, "x")
            .unwrap();
        h.engine
            .tick_at(Utc::now() + ChronoDuration::seconds(1))
            .unwrap();
        h.engine.drain().await;

        let run = h.store.latest_run("foreign").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            h.store.descriptor("foreign").unwrap().unwrap().schedule,
            Schedule::Interval { every_secs: 1 }
        );
    }

    #[tokio::test]
    async fn evict_settled_releases_parked_and_orphaned_jobs() {
        let mut h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        h.oneshot
            .submit_immediate("J1".into(), recording_insert(&rows, "J1"))
            .unwrap();
        h.oneshot
            .submit_immediate("later".into(), recording_insert(&rows, "later"))
            .unwrap();
        h.oneshot.disable(&"later".into()).unwrap();
        h.oneshot
            .submit_immediate("J2".into(), recording_insert(&rows, "J2"))
            .unwrap();
        h.store.delete_descriptor("J2").unwrap();

        h.engine
            .tick_at(Utc::now() + ChronoDuration::seconds(1))
            .unwrap();
        h.engine.drain().await;
        assert_eq!(h.oneshot.tracked(), 3);

        // J1 ran and parked, "later" was parked before it ever ran and J2
        // lost its descriptor while still pending.
        assert_eq!(h.oneshot.evict_settled(), 3);
        assert_eq!(h.oneshot.state(&"J1".into()), None);
        assert_eq!(h.oneshot.state(&"J2".into()), None);
        assert_eq!(h.oneshot.tracked(), 0);
        assert!(h.oneshot.lifecycle.is_empty());
        assert_eq!(h.oneshot.evict_settled(), 0);
    }

    #[tokio::test]
    async fn evict_settled_keeps_jobs_that_can_still_fire() {
        let h = harness(CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));
        h.oneshot
            .submit_immediate("waiting".into(), recording_insert(&rows, "waiting"))
            .unwrap();

        assert_eq!(h.oneshot.evict_settled(), 0);
        assert_eq!(h.oneshot.state(&"waiting".into()), Some(OneShotState::Pending));
        assert_eq!(h.oneshot.tracked(), 1);
    }

    /// A store that is down.
    struct Offline;

    impl RecurringScheduler for Offline {
        fn reserve_sequence(&self) -> cronshot_scheduler::Result<i64> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn current_sequence(&self) -> cronshot_scheduler::Result<i64> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn create_schedule(
            &self,
            _: &str,
            _: &Schedule,
            _: &str,
        ) -> cronshot_scheduler::Result<JobDescriptor> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn replace_schedule(
            &self,
            _: &str,
            _: &Schedule,
            _: &str,
        ) -> cronshot_scheduler::Result<JobDescriptor> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn create_or_replace_schedule(
            &self,
            _: &str,
            _: &Schedule,
            _: &str,
        ) -> cronshot_scheduler::Result<JobDescriptor> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn descriptor(&self, _: &str) -> cronshot_scheduler::Result<Option<JobDescriptor>> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn list_descriptors(&self) -> cronshot_scheduler::Result<Vec<JobDescriptor>> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn latest_run(&self, _: &str) -> cronshot_scheduler::Result<Option<ExecutionRecord>> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn runs_for(&self, _: &str) -> cronshot_scheduler::Result<Vec<ExecutionRecord>> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn delete_descriptor(&self, _: &str) -> cronshot_scheduler::Result<bool> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
        fn prune_runs_before(
            &self,
            _: chrono::DateTime<Utc>,
        ) -> cronshot_scheduler::Result<usize> {
            Err(SchedulerError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn store_outage_surfaces_as_unavailable() {
        let oneshot = OneShot::new(Arc::new(Offline), &CronshotConfig::default());
        let rows = Arc::new(Mutex::new(Vec::new()));

        let err = oneshot.generate_name(None).unwrap_err();
        assert!(matches!(err, OneShotError::SchedulerUnavailable(_)));

        let err = oneshot
            .submit_immediate("J1".into(), recording_insert(&rows, "J1"))
            .unwrap_err();
        assert!(matches!(err, OneShotError::SchedulerUnavailable(_)));
        assert_eq!(oneshot.state(&"J1".into()), None);

        let err = oneshot.disable(&"J1".into()).unwrap_err();
        assert!(matches!(err, OneShotError::SchedulerUnavailable(_)));
    }
}
