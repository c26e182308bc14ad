use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job store schema in `conn`.
///
/// Creates the descriptor table, the execution history table and the name
/// counter. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            jobid       INTEGER PRIMARY KEY AUTOINCREMENT,
            jobname     TEXT    NOT NULL UNIQUE,
            schedule    TEXT    NOT NULL,   -- '<n> seconds' or 5-field calendar pattern
            command     TEXT    NOT NULL,
            enabled     INTEGER NOT NULL DEFAULT 1,
            next_run    TEXT,               -- RFC 3339 UTC or NULL
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        -- Poller query: WHERE enabled = 1 AND next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run);

        CREATE TABLE IF NOT EXISTS job_run_details (
            runid           TEXT    NOT NULL PRIMARY KEY,
            jobid           INTEGER NOT NULL,
            jobname         TEXT    NOT NULL,
            command         TEXT    NOT NULL,
            status          TEXT    NOT NULL,   -- running | succeeded | failed
            return_message  TEXT,
            start_time      TEXT    NOT NULL,
            end_time        TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_job_run_details_name
            ON job_run_details (jobname, start_time);

        CREATE TABLE IF NOT EXISTS job_name_seq (
            id     INTEGER PRIMARY KEY CHECK (id = 1),
            value  INTEGER NOT NULL
        ) STRICT;

        INSERT OR IGNORE INTO job_name_seq (id, value) VALUES (1, 0);
        ",
    )?;
    Ok(())
}
