//! Reset categories and their parameter validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How (and whether) a task becomes eligible again after completion.
///
/// The set is closed: persisted rows carrying any other label fail
/// deserialization instead of falling back to a default schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetCategory {
    /// Resets at 23:59 of the current day in the reset timezone
    Daily,
    /// Resets a flat 24 hours after the base instant
    Countdown24h,
    /// Resets at the next Monday midnight in the reset timezone
    WeeklyMonday,
    /// Resets at midnight of the next matching weekday
    SpecificDay,
    /// Resets a flat, configurable number of hours after the base instant
    SpecificHours,
    /// Never resets again; the task stays completed
    Ended,
}

impl ResetCategory {
    /// Flat-duration categories add a fixed offset to the base instant with
    /// no calendar alignment. Their elapsed-but-incomplete state means
    /// "overdue" and is never rolled forward by the reconciler.
    pub fn is_flat_duration(&self) -> bool {
        matches!(self, Self::Countdown24h | Self::SpecificHours)
    }
}

impl std::fmt::Display for ResetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "Daily"),
            Self::Countdown24h => write!(f, "Countdown24h"),
            Self::WeeklyMonday => write!(f, "WeeklyMonday"),
            Self::SpecificDay => write!(f, "SpecificDay"),
            Self::SpecificHours => write!(f, "SpecificHours"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

/// Schedule parameters as consumed by the reset policy.
///
/// `days` holds weekday indices (0 = Sunday .. 6 = Saturday) and is only
/// meaningful for [`ResetCategory::SpecificDay`]; `hours` only for
/// [`ResetCategory::SpecificHours`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleParams<'a> {
    pub days: &'a [u8],
    pub hours: Option<u32>,
}

impl ScheduleParams<'static> {
    pub const NONE: Self = Self {
        days: &[],
        hours: None,
    };
}

impl<'a> ScheduleParams<'a> {
    pub fn days(days: &'a [u8]) -> Self {
        Self { days, hours: None }
    }

    pub fn hours(hours: u32) -> Self {
        Self {
            days: &[],
            hours: Some(hours),
        }
    }
}

/// Structurally invalid category/parameter combinations, rejected at the
/// editing boundary before anything is computed or persisted.
///
/// The same shapes encountered on already-persisted rows are *not* fatal:
/// the reset policy substitutes a documented default and warns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("SpecificDay requires at least one weekday")]
    EmptyDaySet,

    #[error("weekday index {0} is out of range (0 = Sunday .. 6 = Saturday)")]
    DayOutOfRange(u8),

    #[error("SpecificHours requires a positive hour count")]
    ZeroHours,

    #[error("{category} does not take {param}")]
    UnexpectedParam {
        category: ResetCategory,
        param: &'static str,
    },

    #[error("an Ended entry must be completed and carry no schedule state")]
    MalformedEnded,

    #[error("a sub-task without its own category cannot carry schedule state")]
    UnscheduledSubTaskState,

    #[error("task title must not be empty")]
    EmptyTitle,
}

/// Validate a category/parameter combination.
///
/// Parameters must be present exactly where the category uses them: a day
/// set only for `SpecificDay`, an hour count only for `SpecificHours`.
pub fn validate_schedule(
    category: ResetCategory,
    days: &[u8],
    hours: Option<u32>,
) -> Result<(), ValidationError> {
    if category != ResetCategory::SpecificDay && !days.is_empty() {
        return Err(ValidationError::UnexpectedParam {
            category,
            param: "a weekday set",
        });
    }
    if category != ResetCategory::SpecificHours && hours.is_some() {
        return Err(ValidationError::UnexpectedParam {
            category,
            param: "an hour count",
        });
    }

    match category {
        ResetCategory::SpecificDay => {
            if days.is_empty() {
                return Err(ValidationError::EmptyDaySet);
            }
            if let Some(&bad) = days.iter().find(|&&d| d > 6) {
                return Err(ValidationError::DayOutOfRange(bad));
            }
        }
        ResetCategory::SpecificHours => match hours {
            Some(h) if h >= 1 => {}
            _ => return Err(ValidationError::ZeroHours),
        },
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_labels_are_variant_names() {
        let json = serde_json::to_string(&ResetCategory::Countdown24h).expect("serialize");
        assert_eq!(json, "\"Countdown24h\"");
        let parsed: ResetCategory = serde_json::from_str("\"SpecificHours\"").expect("parse");
        assert_eq!(parsed, ResetCategory::SpecificHours);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let result = serde_json::from_str::<ResetCategory>("\"Sometimes\"");
        assert!(result.is_err());
    }

    #[test]
    fn specific_day_requires_valid_days() {
        assert_eq!(
            validate_schedule(ResetCategory::SpecificDay, &[], None),
            Err(ValidationError::EmptyDaySet)
        );
        assert_eq!(
            validate_schedule(ResetCategory::SpecificDay, &[1, 9], None),
            Err(ValidationError::DayOutOfRange(9))
        );
        assert!(validate_schedule(ResetCategory::SpecificDay, &[0, 6], None).is_ok());
    }

    #[test]
    fn specific_hours_requires_positive_count() {
        assert_eq!(
            validate_schedule(ResetCategory::SpecificHours, &[], Some(0)),
            Err(ValidationError::ZeroHours)
        );
        assert_eq!(
            validate_schedule(ResetCategory::SpecificHours, &[], None),
            Err(ValidationError::ZeroHours)
        );
        assert!(validate_schedule(ResetCategory::SpecificHours, &[], Some(3)).is_ok());
    }

    #[test]
    fn params_are_rejected_on_categories_that_do_not_use_them() {
        assert!(matches!(
            validate_schedule(ResetCategory::Daily, &[1], None),
            Err(ValidationError::UnexpectedParam { .. })
        ));
        assert!(matches!(
            validate_schedule(ResetCategory::WeeklyMonday, &[], Some(5)),
            Err(ValidationError::UnexpectedParam { .. })
        ));
    }
}
