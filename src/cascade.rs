//! Completion toggles and their cascade between a task and its sub-tasks.
//!
//! A toggle is a pure transform: given the current task, it produces a new
//! task value with the completion flags and schedules of the whole subtree
//! recomputed. Nothing is mutated in place and nothing is persisted here;
//! the caller writes the result through the store and merges the confirmed
//! row back into the in-memory set.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::policy;
use crate::task::{rollup_completed, ResetCategory, SubTask, Task};

/// Errors from a toggle request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToggleError {
    #[error("no sub-task titled {0:?}")]
    SubTaskNotFound(String),
}

/// Toggle completion on a task (no title) or one of its sub-tasks (title
/// given).
///
/// Targets that are `Ended` are a no-op: the task comes back unchanged.
pub fn toggle(
    task: &Task,
    sub_task: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Task, ToggleError> {
    match sub_task {
        Some(title) => toggle_sub_task(task, title, now),
        None => Ok(toggle_parent(task, now)),
    }
}

/// Flip the parent and cascade the new value onto every sub-task that is
/// not itself `Ended`.
fn toggle_parent(task: &Task, now: DateTime<Utc>) -> Task {
    if task.category == ResetCategory::Ended {
        return task.clone();
    }

    let mut updated = task.clone();
    let completed = !updated.is_completed;

    for sub in &mut updated.sub_tasks {
        if sub.is_ended() {
            continue;
        }
        sub.is_completed = completed;
        refresh_sub_schedule(sub, now);
    }

    finish_parent(&mut updated, completed, now);
    updated
}

/// Flip one sub-task, then recompute the parent flag as the rollup over the
/// whole collection.
fn toggle_sub_task(task: &Task, title: &str, now: DateTime<Utc>) -> Result<Task, ToggleError> {
    let mut updated = task.clone();
    let index = updated
        .sub_tasks
        .iter()
        .position(|s| s.title == title)
        .ok_or_else(|| ToggleError::SubTaskNotFound(title.to_string()))?;

    if updated.sub_tasks[index].is_ended() {
        return Ok(updated);
    }

    {
        let sub = &mut updated.sub_tasks[index];
        sub.is_completed = !sub.is_completed;
        refresh_sub_schedule(sub, now);
    }

    let completed = rollup_completed(&updated.sub_tasks).unwrap_or(updated.is_completed);
    // An Ended parent keeps its terminal state even while a live sub-task
    // underneath it moves.
    if updated.category != ResetCategory::Ended {
        finish_parent(&mut updated, completed, now);
    }
    Ok(updated)
}

/// Recompute a sub-task's own timestamps after its flag changed: scheduled
/// sub-tasks get a fresh boundary, schedule-less ones carry nothing.
fn refresh_sub_schedule(sub: &mut SubTask, now: DateTime<Utc>) {
    match sub.category {
        Some(category) => {
            sub.last_completion = sub.is_completed.then_some(now);
            let next = policy::next_eligible(category, sub.params(), now, sub.is_completed);
            sub.next_eligible = next;
        }
        None => {
            sub.last_completion = None;
            sub.next_eligible = None;
        }
    }
}

/// Settle the parent's own state: the flag, the completion instant (kept on
/// un-complete), and a schedule recomputed from `now`.
fn finish_parent(task: &mut Task, completed: bool, now: DateTime<Utc>) {
    task.is_completed = completed;
    if completed {
        task.last_completion = Some(now);
    }
    let next = policy::next_eligible(task.category, task.params(), now, completed);
    task.next_eligible = next;
}
