use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::compute_next_run,
    traits::RecurringScheduler,
    types::{ExecutionRecord, FiredJob, JobDescriptor, RunStatus, Schedule},
};

const DESCRIPTOR_COLUMNS: &str =
    "jobid, jobname, schedule, command, enabled, next_run, created_at, updated_at";
const RUN_COLUMNS: &str =
    "runid, jobid, jobname, command, status, return_message, start_time, end_time";

/// SQLite-backed job store shared by the poller and by job management code.
///
/// Cloning is cheap; every clone serialises on the same connection, so each
/// statement (or the short transaction in [`JobStore::start_run`]) is atomic
/// with respect to all other users of the store.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the store at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(%path, "job store opened");
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Unavailable("job store lock poisoned".to_string()))
    }

    // --- poller support ----------------------------------------------------

    /// Enabled descriptors whose `next_run` is at or before `now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobDescriptor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {DESCRIPTOR_COLUMNS} FROM jobs
             WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY next_run"
        ))?;
        let jobs = stmt
            .query_map([ts(now)], row_to_descriptor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Advance `job`'s `next_run` and open a `running` execution record.
    ///
    /// Returns `None` when the descriptor changed after `job` was read (it was
    /// rewritten, disabled or deleted), in which case nothing is written.
    pub fn start_run(&self, job: &JobDescriptor, now: DateTime<Utc>) -> Result<Option<FiredJob>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // A fixed instant fires once, however late the poller reaches it.
        let next = if job.schedule.is_fixed_instant() {
            None
        } else {
            compute_next_run(&job.schedule, now).map(ts)
        };
        let advanced = tx.execute(
            "UPDATE jobs SET next_run = ?1, updated_at = ?2
             WHERE jobid = ?3 AND enabled = 1 AND next_run IS ?4",
            rusqlite::params![next, ts(now), job.id, job.next_run.map(ts)],
        )?;
        if advanced == 0 {
            debug!(job_id = job.id, name = %job.name, "descriptor changed before firing; skipped");
            return Ok(None);
        }

        let run_id = Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO job_run_details
             (runid, jobid, jobname, command, status, return_message, start_time, end_time)
             VALUES (?1,?2,?3,?4,'running',NULL,?5,NULL)",
            rusqlite::params![run_id, job.id, job.name, job.command, ts(now)],
        )?;
        tx.commit()?;

        Ok(Some(FiredJob {
            run_id,
            job_id: job.id,
            name: job.name.clone(),
            command: job.command.clone(),
            fired_at: now,
        }))
    }

    /// Close a `running` execution record.
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        message: &str,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE job_run_details SET status = ?1, return_message = ?2, end_time = ?3
             WHERE runid = ?4 AND status = 'running'",
            rusqlite::params![status.to_string(), message, ts(end), run_id],
        )?;
        if n == 0 {
            warn!(%run_id, "finish_run: no running record (already closed or pruned)");
        }
        Ok(())
    }

    /// Mark records left `running` by a previous process as failed.
    pub fn fail_orphaned_runs(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE job_run_details
             SET status = 'failed', return_message = 'orphaned by scheduler restart', end_time = ?1
             WHERE status = 'running'",
            [ts(now)],
        )?;
        Ok(n)
    }

    fn select_descriptor(conn: &Connection, name: &str) -> Result<Option<JobDescriptor>> {
        let job = conn
            .query_row(
                &format!("SELECT {DESCRIPTOR_COLUMNS} FROM jobs WHERE jobname = ?1"),
                [name],
                row_to_descriptor,
            )
            .optional()?;
        Ok(job)
    }

    fn read_back(conn: &Connection, name: &str) -> Result<JobDescriptor> {
        Self::select_descriptor(conn, name)?.ok_or_else(|| SchedulerError::JobNotFound {
            name: name.to_string(),
        })
    }
}

impl RecurringScheduler for JobStore {
    fn reserve_sequence(&self) -> Result<i64> {
        let conn = self.conn()?;
        let value = conn.query_row(
            "UPDATE job_name_seq SET value = value + 1 WHERE id = 1 RETURNING value",
            [],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(value)
    }

    fn current_sequence(&self) -> Result<i64> {
        let conn = self.conn()?;
        let seq = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'jobs'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    #[instrument(skip(self, schedule, command), fields(schedule = %schedule))]
    fn create_schedule(
        &self,
        name: &str,
        schedule: &Schedule,
        command: &str,
    ) -> Result<JobDescriptor> {
        schedule.validate()?;
        let now = Utc::now();
        let next = compute_next_run(schedule, now).map(ts);

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO jobs (jobname, schedule, command, enabled, next_run, created_at, updated_at)
             VALUES (?1,?2,?3,1,?4,?5,?5)",
            rusqlite::params![name, schedule.to_string(), command, next, ts(now)],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(SchedulerError::DuplicateJob {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let job = Self::read_back(&conn, name)?;
        info!(job_id = job.id, %name, "schedule created");
        Ok(job)
    }

    #[instrument(skip(self, schedule, command), fields(schedule = %schedule))]
    fn replace_schedule(
        &self,
        name: &str,
        schedule: &Schedule,
        command: &str,
    ) -> Result<JobDescriptor> {
        schedule.validate()?;
        let now = Utc::now();
        let next = compute_next_run(schedule, now).map(ts);

        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE jobs SET schedule = ?1, command = ?2, next_run = ?3, updated_at = ?4
             WHERE jobname = ?5",
            rusqlite::params![schedule.to_string(), command, next, ts(now), name],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound {
                name: name.to_string(),
            });
        }

        let job = Self::read_back(&conn, name)?;
        info!(job_id = job.id, %name, "schedule replaced");
        Ok(job)
    }

    #[instrument(skip(self, schedule, command), fields(schedule = %schedule))]
    fn create_or_replace_schedule(
        &self,
        name: &str,
        schedule: &Schedule,
        command: &str,
    ) -> Result<JobDescriptor> {
        schedule.validate()?;
        let now = Utc::now();
        let next = compute_next_run(schedule, now).map(ts);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (jobname, schedule, command, enabled, next_run, created_at, updated_at)
             VALUES (?1,?2,?3,1,?4,?5,?5)
             ON CONFLICT(jobname) DO UPDATE SET
                schedule = excluded.schedule,
                command = excluded.command,
                next_run = excluded.next_run,
                updated_at = excluded.updated_at",
            rusqlite::params![name, schedule.to_string(), command, next, ts(now)],
        )?;

        let job = Self::read_back(&conn, name)?;
        info!(job_id = job.id, %name, "schedule upserted");
        Ok(job)
    }

    fn descriptor(&self, name: &str) -> Result<Option<JobDescriptor>> {
        let conn = self.conn()?;
        Self::select_descriptor(&conn, name)
    }

    fn list_descriptors(&self) -> Result<Vec<JobDescriptor>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {DESCRIPTOR_COLUMNS} FROM jobs ORDER BY jobid"))?;
        let jobs = stmt
            .query_map([], row_to_descriptor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn latest_run(&self, name: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM job_run_details WHERE jobname = ?1
                     ORDER BY start_time DESC, rowid DESC LIMIT 1"
                ),
                [name],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn runs_for(&self, name: &str) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_run_details WHERE jobname = ?1
             ORDER BY start_time, rowid"
        ))?;
        let runs = stmt
            .query_map([name], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn delete_descriptor(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM jobs WHERE jobname = ?1", [name])?;
        if n > 0 {
            info!(%name, "descriptor deleted");
        }
        Ok(n > 0)
    }

    fn prune_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM job_run_details
             WHERE status != 'running' AND end_time IS NOT NULL AND end_time < ?1",
            [ts(cutoff)],
        )?;
        Ok(n)
    }
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

fn row_to_descriptor(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobDescriptor> {
    let schedule: Schedule = row
        .get::<_, String>(2)?
        .parse()
        .map_err(|e| conversion_error(2, e))?;
    let next_run = row
        .get::<_, Option<String>>(5)?
        .map(|s| parse_ts(5, &s))
        .transpose()?;
    Ok(JobDescriptor {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule,
        command: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        next_run,
        created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_ts(7, &row.get::<_, String>(7)?)?,
    })
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status: RunStatus = row
        .get::<_, String>(4)?
        .parse()
        .map_err(|e: String| conversion_error(4, e))?;
    let end_time = row
        .get::<_, Option<String>>(7)?
        .map(|s| parse_ts(7, &s))
        .transpose()?;
    Ok(ExecutionRecord {
        run_id: row.get(0)?,
        job_id: row.get(1)?,
        name: row.get(2)?,
        command: row.get(3)?,
        status,
        return_message: row.get(5)?,
        start_time: parse_ts(6, &row.get::<_, String>(6)?)?,
        end_time,
    })
}
