use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// One field of a calendar pattern: either `*` or a single fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Any,
    At(u32),
}

impl Field {
    pub fn matches(self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::At(v) => v == value,
        }
    }

    pub fn is_fixed(self) -> bool {
        matches!(self, Field::At(_))
    }

    fn parse(token: &str, name: &str, min: u32, max: u32) -> Result<Self, SchedulerError> {
        if token == "*" {
            return Ok(Field::Any);
        }
        let value: u32 = token.parse().map_err(|_| {
            SchedulerError::InvalidSchedule(format!(
                "{name} field {token:?} must be '*' or a number"
            ))
        })?;
        if !(min..=max).contains(&value) {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{name} field {value} is outside {min}..={max}"
            )));
        }
        Ok(Field::At(value))
    }

    fn check(self, name: &str, min: u32, max: u32) -> Result<(), SchedulerError> {
        match self {
            Field::At(v) if !(min..=max).contains(&v) => Err(SchedulerError::InvalidSchedule(
                format!("{name} field {v} is outside {min}..={max}"),
            )),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Any => f.write_str("*"),
            Field::At(v) => write!(f, "{v}"),
        }
    }
}

/// Five-field minute/hour/day/month/weekday pattern, evaluated in UTC.
///
/// Weekday uses cron numbering (0 = Sunday); 7 is accepted on input and
/// normalised to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarPattern {
    pub minute: Field,
    pub hour: Field,
    pub day: Field,
    pub month: Field,
    pub weekday: Field,
}

impl CalendarPattern {
    /// `* * * * *`
    pub fn every_minute() -> Self {
        Self {
            minute: Field::Any,
            hour: Field::Any,
            day: Field::Any,
            month: Field::Any,
            weekday: Field::Any,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        self.minute.check("minute", 0, 59)?;
        self.hour.check("hour", 0, 23)?;
        self.day.check("day", 1, 31)?;
        self.month.check("month", 1, 12)?;
        self.weekday.check("weekday", 0, 6)
    }
}

impl std::fmt::Display for CalendarPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}

/// Defines when and how often a descriptor fires.
///
/// Persisted and serialised as its text expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    /// Fire repeatedly every `every_secs` seconds (1..=59).
    Interval { every_secs: u64 },
    /// Fire on every minute matching the pattern. A pattern with minute,
    /// hour, day and month fixed and weekday `*` names a single instant and
    /// fires at most once.
    Calendar(CalendarPattern),
}

impl Schedule {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Schedule::Interval { every_secs } if !(1..=59).contains(every_secs) => {
                Err(SchedulerError::InvalidSchedule(format!(
                    "interval must be between 1 and 59 seconds, got {every_secs}"
                )))
            }
            Schedule::Interval { .. } => Ok(()),
            Schedule::Calendar(pattern) => pattern.validate(),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Interval { every_secs } => write!(f, "{every_secs} seconds"),
            Schedule::Calendar(pattern) => write!(f, "{pattern}"),
        }
    }
}

impl std::str::FromStr for Schedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            [n, unit] if *unit == "seconds" || *unit == "second" => {
                let every_secs: u64 = n.parse().map_err(|_| {
                    SchedulerError::InvalidSchedule(format!("bad interval {n:?} in {s:?}"))
                })?;
                let schedule = Schedule::Interval { every_secs };
                schedule.validate()?;
                Ok(schedule)
            }
            [minute, hour, day, month, weekday] => {
                let weekday = match Field::parse(weekday, "weekday", 0, 7)? {
                    Field::At(7) => Field::At(0),
                    other => other,
                };
                Ok(Schedule::Calendar(CalendarPattern {
                    minute: Field::parse(minute, "minute", 0, 59)?,
                    hour: Field::parse(hour, "hour", 0, 23)?,
                    day: Field::parse(day, "day", 1, 31)?,
                    month: Field::parse(month, "month", 1, 12)?,
                    weekday,
                }))
            }
            _ => Err(SchedulerError::InvalidSchedule(format!(
                "expected '<n> seconds' or five calendar fields, got {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for Schedule {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}

/// Outcome of one firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted job descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Autoincrement key assigned by the store.
    pub id: i64,
    /// Unique job name; the identifier callers use.
    pub name: String,
    pub schedule: Schedule,
    /// Opaque command text handed to the executor on every firing.
    pub command: String,
    pub enabled: bool,
    /// Next instant the poller will fire this descriptor, if any.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// The schedule is a single calendar instant that can no longer fire.
    pub fn is_parked(&self) -> bool {
        self.next_run.is_none() && self.schedule.is_fixed_instant()
    }
}

/// One row of execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUIDv7, sorts by time.
    pub run_id: String,
    pub job_id: i64,
    pub name: String,
    /// Command text as it was when the run started.
    pub command: String,
    pub status: RunStatus,
    pub return_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// What the engine hands to a [`crate::CommandExecutor`] when a descriptor fires.
#[derive(Debug, Clone)]
pub struct FiredJob {
    pub run_id: String,
    pub job_id: i64,
    pub name: String,
    pub command: String,
    pub fired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interval() {
        let s: Schedule = "1 seconds".parse().expect("parse failed");
        assert_eq!(s, Schedule::Interval { every_secs: 1 });
        assert_eq!(s.to_string(), "1 seconds");
    }

    #[test]
    fn interval_out_of_range_is_rejected() {
        assert!("0 seconds".parse::<Schedule>().is_err());
        assert!("60 seconds".parse::<Schedule>().is_err());
    }

    #[test]
    fn parse_calendar_pattern() {
        let s: Schedule = "30 14 2 3 *".parse().expect("parse failed");
        let Schedule::Calendar(p) = &s else {
            panic!("expected calendar pattern");
        };
        assert_eq!(p.minute, Field::At(30));
        assert_eq!(p.hour, Field::At(14));
        assert_eq!(p.day, Field::At(2));
        assert_eq!(p.month, Field::At(3));
        assert_eq!(p.weekday, Field::Any);
        assert_eq!(s.to_string(), "30 14 2 3 *");
    }

    #[test]
    fn sunday_seven_normalises_to_zero() {
        let s: Schedule = "0 0 * * 7".parse().expect("parse failed");
        assert_eq!(s.to_string(), "0 0 * * 0");
    }

    #[test]
    fn ranges_and_steps_are_not_supported() {
        assert!("*/5 * * * *".parse::<Schedule>().is_err());
        assert!("1-5 * * * *".parse::<Schedule>().is_err());
        assert!("1,2 * * * *".parse::<Schedule>().is_err());
        assert!("61 * * * *".parse::<Schedule>().is_err());
        assert!("* * *".parse::<Schedule>().is_err());
    }

    #[test]
    fn manually_built_pattern_is_validated() {
        let mut p = CalendarPattern::every_minute();
        p.hour = Field::At(24);
        assert!(Schedule::Calendar(p).validate().is_err());
        assert!(Schedule::Interval { every_secs: 0 }.validate().is_err());
    }

    #[test]
    fn schedule_serialises_as_expression() {
        let json = serde_json::to_string(&Schedule::Interval { every_secs: 2 }).unwrap();
        assert_eq!(json, "\"2 seconds\"");
        let back: Schedule = serde_json::from_str("\"* * * * *\"").unwrap();
        assert_eq!(back, Schedule::Calendar(CalendarPattern::every_minute()));
    }

    #[test]
    fn run_status_round_trips_text() {
        for status in [RunStatus::Running, RunStatus::Succeeded, RunStatus::Failed] {
            assert_eq!(status.to_string().parse::<RunStatus>(), Ok(status));
        }
        assert!("done".parse::<RunStatus>().is_err());
    }
}
