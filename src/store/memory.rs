//! In-memory task store (non-persistent).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, TaskStore};
use crate::task::{Task, TaskDraft, TaskPatch};

#[derive(Default)]
pub struct MemoryTaskStore {
    rows: RwLock<HashMap<String, HashMap<Uuid, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn load_tasks(&self, owner: &str) -> Result<Vec<Task>, StoreError> {
        let rows = self.rows.read().await;
        let mut tasks: Vec<Task> = rows
            .get(owner)
            .map(|owned| owned.values().cloned().collect())
            .unwrap_or_default();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn insert_task(&self, owner: &str, draft: &TaskDraft) -> Result<Task, StoreError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            tags: draft.tags.clone(),
            category: draft.category,
            specific_reset_days: draft.specific_reset_days.clone(),
            specific_reset_hours: draft.specific_reset_hours,
            is_completed: draft.is_completed,
            last_completion: draft.last_completion,
            next_eligible: draft.next_eligible,
            sub_tasks: draft.sub_tasks.clone(),
            created_at: now,
            updated_at: now,
        };
        self.rows
            .write()
            .await
            .entry(owner.to_string())
            .or_default()
            .insert(task.id, task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        owner: &str,
        id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Task, StoreError> {
        let mut rows = self.rows.write().await;
        let task = rows
            .get_mut(owner)
            .and_then(|owned| owned.get_mut(&id))
            .ok_or(StoreError::NotFound)?;
        patch.apply(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete_task(&self, owner: &str, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let removed = rows
            .get_mut(owner)
            .map(|owned| owned.remove(&id).is_some())
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}
