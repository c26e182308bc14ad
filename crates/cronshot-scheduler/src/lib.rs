//! `cronshot-scheduler`: recurring scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Descriptors live in the `jobs` table and every firing leaves a row in
//! `job_run_details`. The [`engine::SchedulerEngine`] polls once per tick and
//! launches every enabled descriptor whose `next_run` has arrived on a
//! [`engine::CommandExecutor`], then advances `next_run`. The scheduler has no
//! notion of "run once" or of an end date: a descriptor keeps firing until its
//! schedule stops producing future instants that are reachable.
//!
//! # Schedule language
//!
//! | Expression        | Behaviour                                       |
//! |-------------------|-------------------------------------------------|
//! | `5 seconds`       | Fire every 5 s (1..=59)                         |
//! | `* * * * *`       | Fire every minute                               |
//! | `30 14 2 3 *`     | Fire once at 14:30 UTC on the nearest March 2nd |
//!
//! Calendar fields accept `*` or a single number; lists, ranges and steps are
//! not supported. A pattern with minute, hour, day and month fixed and weekday
//! `*` carries no year: it names the occurrence nearest to the moment it is
//! written and fires at most once. Written after that occurrence it never
//! fires, and the descriptor keeps `next_run = NULL` (see
//! [`types::JobDescriptor::is_parked`]).

pub mod db;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod store;
pub mod traits;
pub mod types;

pub use engine::{CommandExecutor, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use store::JobStore;
pub use traits::RecurringScheduler;
pub use types::{CalendarPattern, ExecutionRecord, Field, FiredJob, JobDescriptor, RunStatus, Schedule};
