//! Run-exactly-once jobs on top of a recurring scheduler.
//!
//! The scheduler only knows recurring schedules. A "run now" job is therefore
//! registered with the shortest interval it accepts, and the job parks itself
//! once its body returns by rewriting its own schedule to a calendar instant
//! that has already passed. A [`Reaper`] later deletes parked descriptors.
//!
//! ```text
//! generate_name -> submit_immediate -> (poller fires) -> body -> disable -> reap
//! ```
//!
//! Between the firing that started a body and the rewrite that parks it, the
//! poller can fire the same descriptor again. Nothing here prevents that: job
//! bodies must be idempotent. A second firing is visible afterwards through
//! [`OneShot::audit`] (`stale_schedule_race`) and in the logs.

pub mod cancel;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod reaper;
pub mod service;
pub mod submit;
pub mod types;

pub use error::{OneShotError, Result};
pub use lifecycle::{Lifecycle, OneShotState};
pub use naming::{NameGenerator, DEFAULT_NAME_PREFIX, EXECUTE_ONCE_MARKER};
pub use reaper::{like_match, ReapFilter, Reaper, SweepReport};
pub use service::OneShot;
pub use types::{Command, DisableOutcome, JobBody, JobIdentifier, RunAudit, Submission};
