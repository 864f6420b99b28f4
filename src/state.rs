//! Shared in-memory task set.
//!
//! One `TaskSet` lives for the duration of a session. The HTTP handlers and
//! the reconciler both read from it and commit store-confirmed rows back
//! into it. The `open` flag is the session liveness: once the set is closed
//! (teardown), late commits from in-flight work are dropped instead of
//! resurrecting state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::task::Task;

pub struct TaskSet {
    tasks: RwLock<HashMap<Uuid, Task>>,
    open: AtomicBool,
}

pub type SharedTaskSet = Arc<TaskSet>;

impl TaskSet {
    pub fn new() -> SharedTaskSet {
        Arc::new(Self {
            tasks: RwLock::new(HashMap::new()),
            open: AtomicBool::new(true),
        })
    }

    /// Replace the whole set, e.g. after the initial load from the store.
    pub async fn replace_all(&self, tasks: Vec<Task>) {
        let mut guard = self.tasks.write().await;
        *guard = tasks.into_iter().map(|t| (t.id, t)).collect();
    }

    /// Snapshot of all tasks, newest first.
    pub async fn snapshot(&self) -> Vec<Task> {
        let guard = self.tasks.read().await;
        let mut tasks: Vec<Task> = guard.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Commit a store-confirmed task into the set.
    ///
    /// Returns `false` without writing when the session has been torn down;
    /// stale commits must not be applied.
    pub async fn commit(&self, task: Task) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tasks.write().await.insert(task.id, task);
        true
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.tasks.write().await.remove(&id).is_some()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Tear the session down. Irreversible; commits from this point on are
    /// dropped.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ResetCategory;
    use chrono::{TimeZone, Utc};

    fn sample_task() -> Task {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 3, 0, 0).unwrap();
        Task {
            id: Uuid::new_v4(),
            title: "t".to_string(),
            description: String::new(),
            tags: vec![],
            category: ResetCategory::Countdown24h,
            specific_reset_days: vec![],
            specific_reset_hours: None,
            is_completed: false,
            last_completion: None,
            next_eligible: Some(at + chrono::Duration::hours(24)),
            sub_tasks: vec![],
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn commit_after_close_is_dropped() {
        tokio_test::block_on(async {
            let set = TaskSet::new();
            let task = sample_task();
            assert!(set.commit(task.clone()).await);
            assert_eq!(set.snapshot().await.len(), 1);

            set.close();
            let mut late = task.clone();
            late.is_completed = true;
            assert!(!set.commit(late).await);

            let snapshot = set.snapshot().await;
            assert!(!snapshot[0].is_completed, "stale commit must not land");
        });
    }

    #[test]
    fn snapshot_is_ordered_newest_first() {
        tokio_test::block_on(async {
            let set = TaskSet::new();
            let older = sample_task();
            let mut newer = sample_task();
            newer.created_at = older.created_at + chrono::Duration::days(1);
            set.replace_all(vec![older.clone(), newer.clone()]).await;

            let snapshot = set.snapshot().await;
            assert_eq!(snapshot[0].id, newer.id);
            assert_eq!(snapshot[1].id, older.id);
        });
    }
}
