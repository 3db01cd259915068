//! Trigger evaluation for scheduled mail jobs.
//!
//! A [`TriggerSpec`] is the pure description of when a job fires: exactly
//! once, or recurring daily / weekly / monthly. All arithmetic happens on
//! server-local naive datetimes; conversion to UTC instants is done at the
//! edges with [`local_to_utc`].

use crate::job_store::{RecurrencePattern, ScheduledMailJob};
use chrono::{
    Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// When a job's firings occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    /// Fires exactly once.
    Once { at: NaiveDateTime },
    /// Fires repeatedly, anchored to `start`.
    ///
    /// For monthly recurrence, `start`'s day-of-month is the anchor day.
    /// Months shorter than the anchor clamp to their last day; the anchor
    /// itself is preserved, so day 31 fires on Feb 28/29 and again on
    /// Mar 31.
    Recurring {
        start: NaiveDateTime,
        pattern: RecurrencePattern,
    },
}

impl TriggerSpec {
    /// Build a trigger from its job-record fields.
    ///
    /// Rejects a `recurrence_pattern` / `is_recurring` mismatch. Does not
    /// reject past instants; use [`TriggerSpec::ensure_future`] at creation
    /// time for that.
    pub fn build(
        date: NaiveDate,
        time: NaiveTime,
        recurring: bool,
        pattern: Option<RecurrencePattern>,
    ) -> Result<Self, ScheduleError> {
        match (recurring, pattern) {
            (false, None) => Ok(TriggerSpec::Once {
                at: date.and_time(time),
            }),
            (true, Some(pattern)) => Ok(TriggerSpec::Recurring {
                start: date.and_time(time),
                pattern,
            }),
            (false, Some(_)) => Err(ScheduleError::InvalidSchedule(
                "recurrence pattern given for a non-recurring schedule".to_string(),
            )),
            (true, None) => Err(ScheduleError::InvalidSchedule(
                "recurring schedule is missing its recurrence pattern".to_string(),
            )),
        }
    }

    pub fn for_job(job: &ScheduledMailJob) -> Result<Self, ScheduleError> {
        Self::build(
            job.schedule_date,
            job.schedule_time,
            job.is_recurring,
            job.recurrence_pattern,
        )
    }

    /// Creation-time check: a one-shot schedule whose instant is already
    /// past is rejected. Recurring schedules may start in the past; they
    /// simply begin at the next valid occurrence.
    pub fn ensure_future(&self, now: NaiveDateTime) -> Result<(), ScheduleError> {
        match self {
            TriggerSpec::Once { at } if *at <= now => Err(ScheduleError::InvalidSchedule(format!(
                "schedule instant {} is in the past",
                at
            ))),
            _ => Ok(()),
        }
    }

    fn time(&self) -> NaiveTime {
        match self {
            TriggerSpec::Once { at } => at.time(),
            TriggerSpec::Recurring { start, .. } => start.time(),
        }
    }

    /// First fire instant strictly after `now`, or `None` for an elapsed
    /// one-shot trigger.
    pub fn first_fire_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            TriggerSpec::Once { at } => (*at > now).then_some(*at),
            TriggerSpec::Recurring { start, pattern } => {
                if *start > now {
                    return Some(*start);
                }
                let time = self.time();
                match pattern {
                    RecurrencePattern::Daily => {
                        let candidate = now.date().and_time(time);
                        Some(if candidate > now {
                            candidate
                        } else {
                            candidate + Duration::days(1)
                        })
                    }
                    RecurrencePattern::Weekly => {
                        let target = start.weekday().num_days_from_monday();
                        let current = now.weekday().num_days_from_monday();
                        let offset = (target + 7 - current) % 7;
                        let candidate = (now.date() + Duration::days(offset as i64)).and_time(time);
                        Some(if candidate > now {
                            candidate
                        } else {
                            candidate + Duration::days(7)
                        })
                    }
                    RecurrencePattern::Monthly => {
                        let anchor = start.day();
                        let candidate =
                            clamped_day(now.year(), now.month(), anchor).and_time(time);
                        if candidate > now {
                            Some(candidate)
                        } else {
                            let (year, month) = next_month(now.year(), now.month());
                            Some(clamped_day(year, month, anchor).and_time(time))
                        }
                    }
                }
            }
        }
    }

    /// Fire instant following `prev` (a previous occurrence), or `None`
    /// when the trigger produces no further occurrences.
    pub fn next_occurrence_after(&self, prev: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            TriggerSpec::Once { .. } => None,
            TriggerSpec::Recurring { start, pattern } => {
                let time = self.time();
                match pattern {
                    RecurrencePattern::Daily => Some((prev.date() + Duration::days(1)).and_time(time)),
                    RecurrencePattern::Weekly => {
                        Some((prev.date() + Duration::days(7)).and_time(time))
                    }
                    RecurrencePattern::Monthly => {
                        let anchor = start.day();
                        let (year, month) = next_month(prev.year(), prev.month());
                        Some(clamped_day(year, month, anchor).and_time(time))
                    }
                }
            }
        }
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = next_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

/// Day-of-month `anchor` in the given month, clamped to the month's length.
fn clamped_day(year: i32, month: u32, anchor: u32) -> NaiveDate {
    let day = anchor.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Convert a server-local naive datetime to a UTC instant.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant;
/// nonexistent local times (DST spring-forward gap) shift forward an hour.
pub fn local_to_utc(naive: NaiveDateTime) -> chrono::DateTime<Utc> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => match Local.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
            LocalResult::None => Utc::now(),
        },
    }
}

pub fn utc_to_local_naive(instant: chrono::DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&Local).naive_local()
}
