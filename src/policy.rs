//! Next-eligibility computation for every reset category.
//!
//! Calendar-aligned categories (`Daily`, `WeeklyMonday`, `SpecificDay`)
//! operate in one fixed timezone, UTC+7, with no daylight-saving adjustment;
//! a task resets at the same wall-clock boundary no matter where the caller
//! runs. Flat-duration categories ignore the calendar entirely.
//!
//! The computation is pure and deterministic. Malformed parameters on
//! already-persisted rows are not fatal: the documented default is
//! substituted and a data-quality warning is emitted.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::task::{ResetCategory, ScheduleParams};

/// Offset of the fixed reset timezone (UTC+7).
const RESET_UTC_OFFSET_HOURS: i64 = 7;

/// Minutes from local midnight to the daily reset boundary, 23:59:00.
const DAILY_BOUNDARY_MINUTES: i64 = 23 * 60 + 59;

fn tz_offset() -> Duration {
    Duration::hours(RESET_UTC_OFFSET_HOURS)
}

/// Wall-clock time in the reset timezone for an instant.
fn local_wall_time(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.naive_utc() + tz_offset()
}

/// Instant corresponding to a wall-clock time in the reset timezone.
fn instant_of(local: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - tz_offset()))
}

/// Compute when a task next becomes eligible again.
///
/// `base` is the instant the schedule is computed from: the completion
/// instant when the entity was just toggled, otherwise the evaluation
/// instant. Returns `None` only for [`ResetCategory::Ended`].
///
/// For every other category the result is strictly after `base`.
pub fn next_eligible(
    category: ResetCategory,
    params: ScheduleParams<'_>,
    base: DateTime<Utc>,
    just_completed: bool,
) -> Option<DateTime<Utc>> {
    match category {
        ResetCategory::Ended => None,

        ResetCategory::Countdown24h => Some(base + Duration::hours(24)),

        ResetCategory::SpecificHours => match params.hours {
            Some(hours) if hours >= 1 => Some(base + Duration::hours(i64::from(hours))),
            invalid => {
                tracing::warn!(
                    hours = ?invalid,
                    "invalid hour count for SpecificHours, falling back to 24h"
                );
                Some(base + Duration::hours(24))
            }
        },

        ResetCategory::Daily => {
            let local = local_wall_time(base);
            let boundary =
                local.date().and_time(NaiveTime::MIN) + Duration::minutes(DAILY_BOUNDARY_MINUTES);
            let target = if just_completed || local >= boundary {
                boundary + Duration::days(1)
            } else {
                boundary
            };
            Some(instant_of(target))
        }

        ResetCategory::WeeklyMonday => earliest_weekday_midnight(base, &[1]),

        ResetCategory::SpecificDay => {
            if params.days.is_empty() {
                tracing::warn!("empty weekday set for SpecificDay, falling back to 7 days");
                return Some(base + Duration::days(7));
            }
            earliest_weekday_midnight(base, params.days)
        }
    }
}

/// Midnight (reset timezone) of the earliest upcoming occurrence of any of
/// the target weekdays.
///
/// The base instant necessarily lies at or after its own day's midnight, so
/// a target weekday matching the current one always means the *next*
/// occurrence, seven days out.
fn earliest_weekday_midnight(base: DateTime<Utc>, days: &[u8]) -> Option<DateTime<Utc>> {
    let local = local_wall_time(base);
    let midnight = local.date().and_time(NaiveTime::MIN);
    let today = i64::from(local.weekday().num_days_from_sunday());

    days.iter()
        .map(|&target| {
            let mut ahead = (i64::from(target) - today).rem_euclid(7);
            if ahead == 0 {
                ahead = 7;
            }
            instant_of(midnight + Duration::days(ahead))
        })
        .min()
}
