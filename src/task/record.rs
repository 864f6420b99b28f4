//! Task and sub-task records plus the input/patch shapes the store consumes.
//!
//! # Invariants
//! - `next_eligible` is `None` if and only if `category == Ended`
//! - a sub-task without its own category carries no params and no timestamps
//! - an `Ended` sub-task is always completed and carries no schedule state
//! - with at least one sub-task, the parent completion flag equals the
//!   rollup over its sub-tasks (recomputed, never stored independently)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::{validate_schedule, ResetCategory, ScheduleParams, ValidationError};
use crate::policy;

/// A recurring task as held in memory and exchanged with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned identifier, scoped to the owner
    pub id: Uuid,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    pub category: ResetCategory,

    /// Weekday indices (0 = Sunday .. 6 = Saturday), `SpecificDay` only
    #[serde(default)]
    pub specific_reset_days: Vec<u8>,

    /// Positive hour count, `SpecificHours` only
    #[serde(default)]
    pub specific_reset_hours: Option<u32>,

    pub is_completed: bool,

    /// Last time the completion flag was set true
    #[serde(default)]
    pub last_completion: Option<DateTime<Utc>>,

    /// When the task becomes eligible again; `None` iff `category == Ended`
    #[serde(default)]
    pub next_eligible: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn params(&self) -> ScheduleParams<'_> {
        ScheduleParams {
            days: &self.specific_reset_days,
            hours: self.specific_reset_hours,
        }
    }
}

/// A sub-task, identified by its title within the parent.
///
/// An absent `category` means the sub-task has no independent schedule and
/// resets only when the parent resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub title: String,

    pub is_completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ResetCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_reset_hours: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completion: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible: Option<DateTime<Utc>>,
}

impl SubTask {
    pub fn is_ended(&self) -> bool {
        self.category == Some(ResetCategory::Ended)
    }

    /// Sub-tasks never carry a weekday set; only an optional hour count.
    pub fn params(&self) -> ScheduleParams<'_> {
        ScheduleParams {
            days: &[],
            hours: self.specific_reset_hours,
        }
    }

    /// Enforce the structural sub-task invariants at the editing boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.category {
            None => {
                if self.specific_reset_hours.is_some()
                    || self.last_completion.is_some()
                    || self.next_eligible.is_some()
                {
                    return Err(ValidationError::UnscheduledSubTaskState);
                }
            }
            Some(ResetCategory::Ended) => {
                if !self.is_completed
                    || self.specific_reset_hours.is_some()
                    || self.last_completion.is_some()
                    || self.next_eligible.is_some()
                {
                    return Err(ValidationError::MalformedEnded);
                }
            }
            Some(ResetCategory::SpecificHours) => match self.specific_reset_hours {
                Some(h) if h >= 1 => {}
                _ => return Err(ValidationError::ZeroHours),
            },
            Some(category) => {
                if self.specific_reset_hours.is_some() {
                    return Err(ValidationError::UnexpectedParam {
                        category,
                        param: "an hour count",
                    });
                }
            }
        }
        Ok(())
    }
}

/// Completion rollup over a sub-task collection.
///
/// `None` when there are no sub-tasks (the parent flag stands on its own);
/// otherwise the AND over all sub-tasks of completed-or-ended.
pub fn rollup_completed(sub_tasks: &[SubTask]) -> Option<bool> {
    if sub_tasks.is_empty() {
        None
    } else {
        Some(sub_tasks.iter().all(|s| s.is_completed || s.is_ended()))
    }
}

/// User input for creating a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: ResetCategory,
    #[serde(default)]
    pub specific_reset_days: Vec<u8>,
    #[serde(default)]
    pub specific_reset_hours: Option<u32>,
    #[serde(default)]
    pub sub_tasks: Vec<NewSubTask>,
}

/// User input for a sub-task at creation time. Sub-tasks start incomplete
/// (except `Ended` ones, which exist only as a permanent checkmark).
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubTask {
    pub title: String,
    #[serde(default)]
    pub category: Option<ResetCategory>,
    #[serde(default)]
    pub specific_reset_hours: Option<u32>,
}

impl NewSubTask {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.category {
            Some(ResetCategory::SpecificHours) => match self.specific_reset_hours {
                Some(h) if h >= 1 => Ok(()),
                _ => Err(ValidationError::ZeroHours),
            },
            Some(category) if self.specific_reset_hours.is_some() => {
                Err(ValidationError::UnexpectedParam {
                    category,
                    param: "an hour count",
                })
            }
            None if self.specific_reset_hours.is_some() => {
                Err(ValidationError::UnscheduledSubTaskState)
            }
            _ => Ok(()),
        }
    }

    fn into_record(self, now: DateTime<Utc>) -> SubTask {
        match self.category {
            Some(ResetCategory::Ended) => SubTask {
                title: self.title,
                is_completed: true,
                category: Some(ResetCategory::Ended),
                specific_reset_hours: None,
                last_completion: None,
                next_eligible: None,
            },
            Some(category) => {
                let next = policy::next_eligible(
                    category,
                    ScheduleParams {
                        days: &[],
                        hours: self.specific_reset_hours,
                    },
                    now,
                    false,
                );
                SubTask {
                    title: self.title,
                    is_completed: false,
                    category: Some(category),
                    specific_reset_hours: self.specific_reset_hours,
                    last_completion: None,
                    next_eligible: next,
                }
            }
            None => SubTask {
                title: self.title,
                is_completed: false,
                category: None,
                specific_reset_hours: None,
                last_completion: None,
                next_eligible: None,
            },
        }
    }
}

impl NewTask {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        validate_schedule(
            self.category,
            &self.specific_reset_days,
            self.specific_reset_hours,
        )?;
        for sub in &self.sub_tasks {
            sub.validate()?;
        }
        Ok(())
    }

    /// Validate and turn the input into an insertable record: incomplete
    /// with the first eligibility boundary computed from `now`, except
    /// `Ended`, which is born completed with no schedule.
    pub fn into_draft(self, now: DateTime<Utc>) -> Result<TaskDraft, ValidationError> {
        self.validate()?;
        let next = policy::next_eligible(self.category, self.params(), now, false);
        let is_completed = self.category == ResetCategory::Ended;
        Ok(TaskDraft {
            title: self.title,
            description: self.description,
            tags: self.tags,
            category: self.category,
            specific_reset_days: self.specific_reset_days,
            specific_reset_hours: self.specific_reset_hours,
            is_completed,
            last_completion: None,
            next_eligible: next,
            sub_tasks: self
                .sub_tasks
                .into_iter()
                .map(|sub| sub.into_record(now))
                .collect(),
        })
    }

    fn params(&self) -> ScheduleParams<'_> {
        ScheduleParams {
            days: &self.specific_reset_days,
            hours: self.specific_reset_hours,
        }
    }
}

/// A task ready for insertion; the store assigns `id` and both timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: ResetCategory,
    pub specific_reset_days: Vec<u8>,
    pub specific_reset_hours: Option<u32>,
    pub is_completed: bool,
    pub last_completion: Option<DateTime<Utc>>,
    pub next_eligible: Option<DateTime<Utc>>,
    pub sub_tasks: Vec<SubTask>,
}

/// Partial update over a task row. Only present fields are written; the
/// nested `Option`s distinguish "leave untouched" from "set to null".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category: Option<ResetCategory>,
    pub specific_reset_days: Option<Vec<u8>>,
    pub specific_reset_hours: Option<Option<u32>>,
    pub is_completed: Option<bool>,
    pub last_completion: Option<Option<DateTime<Utc>>>,
    pub next_eligible: Option<Option<DateTime<Utc>>>,
    pub sub_tasks: Option<Vec<SubTask>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The completion-state fields that differ between two versions of a
    /// task. This is what cascades and reconciliation persist: only what
    /// actually changed.
    pub fn completion_diff(before: &Task, after: &Task) -> Self {
        let mut patch = Self::default();
        if before.is_completed != after.is_completed {
            patch.is_completed = Some(after.is_completed);
        }
        if before.last_completion != after.last_completion {
            patch.last_completion = Some(after.last_completion);
        }
        if before.next_eligible != after.next_eligible {
            patch.next_eligible = Some(after.next_eligible);
        }
        if before.sub_tasks != after.sub_tasks {
            patch.sub_tasks = Some(after.sub_tasks.clone());
        }
        patch
    }

    /// Apply the patch to an in-memory record (used by the memory backend).
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(days) = &self.specific_reset_days {
            task.specific_reset_days = days.clone();
        }
        if let Some(hours) = self.specific_reset_hours {
            task.specific_reset_hours = hours;
        }
        if let Some(is_completed) = self.is_completed {
            task.is_completed = is_completed;
        }
        if let Some(last_completion) = self.last_completion {
            task.last_completion = last_completion;
        }
        if let Some(next_eligible) = self.next_eligible {
            task.next_eligible = next_eligible;
        }
        if let Some(sub_tasks) = &self.sub_tasks {
            task.sub_tasks = sub_tasks.clone();
        }
    }
}
