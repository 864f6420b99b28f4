//! Periodic reconciliation of elapsed eligibility windows.
//!
//! Every tick compares each task's `next_eligible` against the current
//! instant and flips completed tasks (and independently scheduled
//! sub-tasks) back to incomplete once their window has passed. Only tasks
//! that actually changed are persisted, one at a time; a failed write
//! leaves the pre-reset snapshot in memory so the next tick retries it.
//!
//! The loop is deliberately not re-entrant: one spawned task sleeps, ticks,
//! and awaits every write before sleeping again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::policy;
use crate::state::SharedTaskSet;
use crate::store::TaskStore;
use crate::task::{ResetCategory, Task, TaskPatch};

/// Outcome counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tasks whose reset was persisted and merged back
    pub committed: usize,
    /// Tasks whose persistence failed (left untouched, retried next tick)
    pub failed: usize,
    /// Commits dropped because the session was torn down mid-pass
    pub dropped: usize,
}

/// The reconciliation service. Dependencies are injected so ticks are
/// deterministic under test: the clock decides "now", the store persists,
/// the task set is the session's shared state.
pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    tasks: SharedTaskSet,
    clock: Arc<dyn Clock>,
    owner: String,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        tasks: SharedTaskSet,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            tasks,
            clock,
            owner: owner.into(),
            interval,
        })
    }

    /// Spawn the periodic loop. The returned handle stops it.
    pub fn start(self: Arc<Self>) -> ReconcilerHandle {
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_loop = Arc::clone(&alive);
        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                if !alive_for_loop.load(Ordering::SeqCst) {
                    break;
                }
                let summary = self.tick().await;
                if summary.committed > 0 || summary.failed > 0 {
                    tracing::info!(
                        committed = summary.committed,
                        failed = summary.failed,
                        "reconciliation pass finished"
                    );
                }
            }
            tracing::debug!("reconciliation loop exited");
        });
        ReconcilerHandle { alive, join }
    }

    /// Run one reconciliation pass against the current clock instant.
    pub async fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        let mut summary = TickSummary::default();

        for task in self.tasks.snapshot().await {
            let Some(updated) = plan_reset(&task, now) else {
                continue;
            };

            if !self.tasks.is_open() {
                summary.dropped += 1;
                break;
            }

            let patch = TaskPatch::completion_diff(&task, &updated);
            match self.store.update_task(&self.owner, task.id, &patch).await {
                Ok(confirmed) => {
                    if self.tasks.commit(confirmed).await {
                        summary.committed += 1;
                    } else {
                        summary.dropped += 1;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        error = %e,
                        "failed to persist reset, will retry next tick"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

/// Handle to a running reconciliation loop.
pub struct ReconcilerHandle {
    alive: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop. An in-flight pass is aborted; its pending commits are
    /// dropped by the task set's liveness check.
    pub fn stop(self) {
        self.alive.store(false, Ordering::SeqCst);
        self.join.abort();
    }
}

/// Compute the reset transition for a single task, if any.
///
/// Pure: returns the task after the tick, or `None` when nothing changed.
pub fn plan_reset(task: &Task, now: DateTime<Utc>) -> Option<Task> {
    if task.category == ResetCategory::Ended {
        return None;
    }

    let mut updated = task.clone();
    let mut dirty = false;

    // Independently scheduled sub-tasks reset on their own boundaries.
    for sub in &mut updated.sub_tasks {
        let Some(category) = sub.category else {
            continue;
        };
        if category == ResetCategory::Ended {
            continue;
        }
        if sub.is_completed && sub.next_eligible.is_some_and(|at| at <= now) {
            let next = policy::next_eligible(category, sub.params(), now, false);
            sub.is_completed = false;
            sub.last_completion = None;
            sub.next_eligible = next;
            dirty = true;
        }
    }

    let elapsed = updated.next_eligible.is_some_and(|at| at <= now);
    if updated.is_completed && elapsed {
        let next = policy::next_eligible(task.category, task.params(), now, false);
        updated.is_completed = false;
        updated.last_completion = None;
        updated.next_eligible = next;
        // Schedule-less sub-tasks have no window of their own; they always
        // follow the parent.
        for sub in &mut updated.sub_tasks {
            if sub.category.is_none() {
                sub.is_completed = false;
                sub.last_completion = None;
                sub.next_eligible = None;
            }
        }
        dirty = true;
    } else if !updated.is_completed && elapsed && !task.category.is_flat_duration() {
        // A missed, never-completed calendar boundary rolls forward so the
        // task is measured against the current window. Flat-duration tasks
        // stay overdue: that state is what the user needs to see.
        updated.next_eligible = policy::next_eligible(task.category, task.params(), now, false);
        dirty = true;
    }

    dirty.then_some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::state::TaskSet;
    use crate::store::{MemoryTaskStore, StoreError};
    use crate::task::{NewSubTask, NewTask, ScheduleParams, SubTask, TaskDraft};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn instant(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, m, 0).unwrap()
    }

    fn daily_task(completed: bool, next_eligible: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "daily".to_string(),
            description: String::new(),
            tags: vec![],
            category: ResetCategory::Daily,
            specific_reset_days: vec![],
            specific_reset_hours: None,
            is_completed: completed,
            last_completion: completed.then(|| next_eligible - chrono::Duration::hours(12)),
            next_eligible: Some(next_eligible),
            sub_tasks: vec![],
            created_at: instant(0, 0) - chrono::Duration::days(3),
            updated_at: instant(0, 0),
        }
    }

    async fn reconciler_with(
        store: Arc<dyn TaskStore>,
        tasks: Vec<Task>,
        now: DateTime<Utc>,
    ) -> (Arc<Reconciler>, SharedTaskSet) {
        let set = TaskSet::new();
        set.replace_all(tasks).await;
        let reconciler = Reconciler::new(
            store,
            Arc::clone(&set),
            Arc::new(FixedClock::new(now)),
            "alice",
            Duration::from_secs(60),
        );
        (reconciler, set)
    }

    /// Seed a task through the store so the row exists for updates.
    async fn seed(store: &MemoryTaskStore, task: &Task) -> Task {
        let draft = TaskDraft {
            title: task.title.clone(),
            description: task.description.clone(),
            tags: task.tags.clone(),
            category: task.category,
            specific_reset_days: task.specific_reset_days.clone(),
            specific_reset_hours: task.specific_reset_hours,
            is_completed: task.is_completed,
            last_completion: task.last_completion,
            next_eligible: task.next_eligible,
            sub_tasks: task.sub_tasks.clone(),
        };
        store.insert_task("alice", &draft).await.expect("seed")
    }

    #[tokio::test]
    async fn an_elapsed_completed_task_flips_back_to_incomplete() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let task = seed(&store, &daily_task(true, now - chrono::Duration::hours(1))).await;
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary.committed, 1);

        let after = set.get(task.id).await.expect("task present");
        assert!(!after.is_completed);
        assert!(after.last_completion.is_none());
        assert!(after.next_eligible.expect("scheduled") > now);
    }

    #[tokio::test]
    async fn an_unelapsed_task_is_left_alone() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let task = seed(&store, &daily_task(true, now + chrono::Duration::hours(10))).await;
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(set.get(task.id).await, Some(task));
    }

    #[tokio::test]
    async fn overdue_flat_duration_tasks_are_not_rolled_forward() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());

        let mut countdown = daily_task(false, now - chrono::Duration::hours(2));
        countdown.category = ResetCategory::Countdown24h;
        let countdown = seed(&store, &countdown).await;

        let mut hourly = daily_task(false, now - chrono::Duration::hours(2));
        hourly.category = ResetCategory::SpecificHours;
        hourly.specific_reset_hours = Some(3);
        let hourly = seed(&store, &hourly).await;

        let (reconciler, set) =
            reconciler_with(store, vec![countdown.clone(), hourly.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(set.get(countdown.id).await, Some(countdown));
        assert_eq!(set.get(hourly.id).await, Some(hourly));
    }

    #[tokio::test]
    async fn an_overdue_incomplete_calendar_task_advances_without_completion_changes() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let task = seed(&store, &daily_task(false, now - chrono::Duration::days(2))).await;
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary.committed, 1);

        let after = set.get(task.id).await.expect("task present");
        assert!(!after.is_completed);
        assert!(after.next_eligible.expect("scheduled") > now);
        // Catch-up is a single recomputation from now, not one window per tick.
        assert_eq!(
            after.next_eligible,
            policy::next_eligible(ResetCategory::Daily, ScheduleParams::NONE, now, false)
        );
    }

    #[tokio::test]
    async fn ended_tasks_are_skipped_entirely() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let ended = NewTask {
            title: "finished".to_string(),
            description: String::new(),
            tags: vec![],
            category: ResetCategory::Ended,
            specific_reset_days: vec![],
            specific_reset_hours: None,
            sub_tasks: vec![],
        }
        .into_draft(now)
        .expect("draft");
        let ended = store.insert_task("alice", &ended).await.expect("insert");
        let (reconciler, set) = reconciler_with(store, vec![ended.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary, TickSummary::default());

        let after = set.get(ended.id).await.expect("task present");
        assert!(after.is_completed);
        assert!(after.next_eligible.is_none());
    }

    #[tokio::test]
    async fn scheduled_sub_tasks_reset_on_their_own_boundaries() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());

        let mut task = daily_task(false, now + chrono::Duration::hours(10));
        task.sub_tasks = vec![
            SubTask {
                title: "claim".to_string(),
                is_completed: true,
                category: Some(ResetCategory::Countdown24h),
                specific_reset_hours: None,
                last_completion: Some(now - chrono::Duration::hours(25)),
                next_eligible: Some(now - chrono::Duration::hours(1)),
            },
            SubTask {
                title: "share".to_string(),
                is_completed: true,
                category: None,
                specific_reset_hours: None,
                last_completion: None,
                next_eligible: None,
            },
        ];
        let task = seed(&store, &task).await;
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary.committed, 1);

        let after = set.get(task.id).await.expect("task present");
        let claim = &after.sub_tasks[0];
        assert!(!claim.is_completed);
        assert!(claim.last_completion.is_none());
        assert_eq!(claim.next_eligible, Some(now + chrono::Duration::hours(24)));
        // The schedule-less sibling only follows the parent, which did not
        // reset here.
        assert!(after.sub_tasks[1].is_completed);
        assert!(!after.is_completed);
    }

    #[tokio::test]
    async fn a_parent_reset_cascade_clears_schedule_less_sub_tasks() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());

        let mut task = daily_task(true, now - chrono::Duration::minutes(5));
        task.sub_tasks = vec![
            SubTask {
                title: "share".to_string(),
                is_completed: true,
                category: None,
                specific_reset_hours: None,
                last_completion: None,
                next_eligible: None,
            },
            SubTask {
                title: "claim".to_string(),
                is_completed: true,
                category: Some(ResetCategory::Countdown24h),
                specific_reset_hours: None,
                last_completion: Some(now - chrono::Duration::hours(2)),
                next_eligible: Some(now + chrono::Duration::hours(22)),
            },
        ];
        let task = seed(&store, &task).await;
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        reconciler.tick().await;

        let after = set.get(task.id).await.expect("task present");
        assert!(!after.is_completed);
        assert!(!after.sub_tasks[0].is_completed);
        // The independently scheduled sub-task keeps its own unelapsed window.
        assert!(after.sub_tasks[1].is_completed);
        assert_eq!(
            after.sub_tasks[1].next_eligible,
            Some(now + chrono::Duration::hours(22))
        );
    }

    /// Store double whose writes can be switched to fail.
    struct FlakyStore {
        inner: MemoryTaskStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        fn is_persistent(&self) -> bool {
            false
        }

        async fn load_tasks(&self, owner: &str) -> Result<Vec<Task>, StoreError> {
            self.inner.load_tasks(owner).await
        }

        async fn insert_task(&self, owner: &str, draft: &TaskDraft) -> Result<Task, StoreError> {
            self.inner.insert_task(owner, draft).await
        }

        async fn update_task(
            &self,
            owner: &str,
            id: Uuid,
            patch: &TaskPatch,
        ) -> Result<Task, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Rejected {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.inner.update_task(owner, id, patch).await
        }

        async fn delete_task(&self, owner: &str, id: Uuid) -> Result<(), StoreError> {
            self.inner.delete_task(owner, id).await
        }
    }

    #[tokio::test]
    async fn a_failed_write_leaves_the_snapshot_and_retries_next_tick() {
        let now = instant(3, 0);
        let store = Arc::new(FlakyStore {
            inner: MemoryTaskStore::new(),
            failing: AtomicBool::new(false),
        });
        let task = seed(&store.inner, &daily_task(true, now - chrono::Duration::hours(1))).await;
        let (reconciler, set) =
            reconciler_with(Arc::clone(&store) as Arc<dyn TaskStore>, vec![task.clone()], now)
                .await;

        store.failing.store(true, Ordering::SeqCst);
        let summary = reconciler.tick().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.committed, 0);
        // The pre-reset snapshot stays in memory.
        assert_eq!(set.get(task.id).await, Some(task.clone()));

        store.failing.store(false, Ordering::SeqCst);
        let summary = reconciler.tick().await;
        assert_eq!(summary.committed, 1);
        assert!(!set.get(task.id).await.expect("present").is_completed);
    }

    #[tokio::test]
    async fn one_failing_task_does_not_block_the_rest_of_the_pass() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let persisted = seed(&store, &daily_task(true, now - chrono::Duration::hours(1))).await;
        // This task was never written to the store, so its update fails.
        let orphan = daily_task(true, now - chrono::Duration::hours(1));
        let (reconciler, set) =
            reconciler_with(store, vec![orphan.clone(), persisted.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(set.get(orphan.id).await, Some(orphan));
        assert!(!set.get(persisted.id).await.expect("present").is_completed);
    }

    #[tokio::test]
    async fn a_torn_down_session_drops_pending_commits() {
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let task = seed(&store, &daily_task(true, now - chrono::Duration::hours(1))).await;
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        set.close();
        let summary = reconciler.tick().await;
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.committed, 0);
        assert_eq!(set.get(task.id).await, Some(task));
    }

    #[tokio::test]
    async fn sub_task_creation_input_round_trips_through_a_tick() {
        // A freshly created task with a scheduled sub-task survives a tick
        // untouched while nothing has elapsed.
        let now = instant(3, 0);
        let store = Arc::new(MemoryTaskStore::new());
        let draft = NewTask {
            title: "campaign".to_string(),
            description: String::new(),
            tags: vec![],
            category: ResetCategory::WeeklyMonday,
            specific_reset_days: vec![],
            specific_reset_hours: None,
            sub_tasks: vec![NewSubTask {
                title: "claim".to_string(),
                category: Some(ResetCategory::SpecificHours),
                specific_reset_hours: Some(3),
            }],
        }
        .into_draft(now)
        .expect("draft");
        let task = store.insert_task("alice", &draft).await.expect("insert");
        let (reconciler, set) = reconciler_with(store, vec![task.clone()], now).await;

        let summary = reconciler.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(set.get(task.id).await, Some(task));
    }
}
