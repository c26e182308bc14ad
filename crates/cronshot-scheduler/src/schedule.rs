use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::types::{CalendarPattern, Field, Schedule};

/// How far ahead a calendar pattern is searched. Eight years always contains
/// at least one Feb 29.
const SEARCH_DAYS: i64 = 8 * 366;

/// Compute the next UTC execution time for `schedule` strictly after `from`.
///
/// Returns `None` when the schedule is exhausted: a fixed instant that has
/// already passed, or a calendar pattern that can never match (e.g.
/// `0 0 31 2 *`).
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Interval { every_secs } => Some(from + Duration::seconds(*every_secs as i64)),
        Schedule::Calendar(pattern) if pattern.is_fixed_instant() => {
            pattern.nearest_instant(from).filter(|at| *at > from)
        }
        Schedule::Calendar(pattern) => pattern.next_after(from),
    }
}

impl Schedule {
    /// True for a calendar pattern naming a single instant.
    pub fn is_fixed_instant(&self) -> bool {
        matches!(self, Schedule::Calendar(pattern) if pattern.is_fixed_instant())
    }
}

impl CalendarPattern {
    /// Fully fixed pattern for the minute one tick before `now`.
    ///
    /// Written at `now`, its instant has already passed, so it never fires.
    pub fn one_tick_before(now: DateTime<Utc>) -> Self {
        let t = now - Duration::minutes(1);
        Self {
            minute: Field::At(t.minute()),
            hour: Field::At(t.hour()),
            day: Field::At(t.day()),
            month: Field::At(t.month()),
            weekday: Field::Any,
        }
    }

    /// Minute, hour, day and month are fixed and weekday is `*`.
    pub fn is_fixed_instant(&self) -> bool {
        self.minute.is_fixed()
            && self.hour.is_fixed()
            && self.day.is_fixed()
            && self.month.is_fixed()
            && !self.weekday.is_fixed()
    }

    /// The instant a fixed pattern names, resolved against `reference`.
    ///
    /// The pattern carries no year, so the occurrence nearest to `reference`
    /// over the previous, current and next year is taken: a pattern written at
    /// 00:00 on Jan 1 for 23:59 on Dec 31 means the minute that just passed.
    pub fn nearest_instant(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (Field::At(minute), Field::At(hour), Field::At(day), Field::At(month), Field::Any) =
            (self.minute, self.hour, self.day, self.month, self.weekday)
        else {
            return None;
        };

        [reference.year() - 1, reference.year(), reference.year() + 1]
            .into_iter()
            .filter_map(|year| {
                Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
                    .single()
            })
            .min_by_key(|t| (*t - reference).num_seconds().abs())
    }

    /// First whole minute strictly after `from` matching this pattern.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = from.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let mut day = start.date_naive();
        let last = day + Duration::days(SEARCH_DAYS);

        while day <= last {
            if self.matches_date(day) {
                for hour in candidates(self.hour, 0, 23) {
                    for minute in candidates(self.minute, 0, 59) {
                        let Some(naive) = day.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        let candidate = naive.and_utc();
                        if candidate >= start {
                            return Some(candidate);
                        }
                    }
                }
            }
            day = day.succ_opt()?;
        }
        None
    }

    /// Classic cron rule: when both day-of-month and weekday are restricted,
    /// a date matching either one fires.
    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let dom = self.day.matches(date.day());
        let dow = self
            .weekday
            .matches(date.weekday().num_days_from_sunday());
        if self.day.is_fixed() && self.weekday.is_fixed() {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn candidates(field: Field, min: u32, max: u32) -> std::ops::RangeInclusive<u32> {
    match field {
        Field::Any => min..=max,
        Field::At(v) => v..=v,
    }
}
