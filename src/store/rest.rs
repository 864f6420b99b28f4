//! PostgREST-backed task store.
//!
//! Speaks the PostgREST dialect: equality filters in the query string,
//! `apikey` + bearer authorization headers, and
//! `Prefer: return=representation` so every write answers with the
//! confirmed row. An empty representation on a filtered write means the
//! `(id, owner)` pair matched nothing and maps to `StoreError::NotFound`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{StoreError, TaskStore};
use crate::task::{ResetCategory, SubTask, Task, TaskDraft, TaskPatch};

pub struct RestTaskStore {
    client: Client,
    url: String,
    service_key: String,
}

impl RestTaskStore {
    /// Create a new store client for a PostgREST base URL.
    pub fn new(url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    /// Read a successful response body, mapping refusals to `Rejected`.
    async fn read_rows(resp: reqwest::Response) -> Result<Vec<TaskRow>, StoreError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn fetch_task(&self, owner: &str, id: Uuid) -> Result<Task, StoreError> {
        let resp = self
            .authed(self.client.get(format!(
                "{}/tasks?id=eq.{}&owner_id=eq.{}",
                self.rest_url(),
                id,
                owner
            )))
            .send()
            .await?;
        let rows = Self::read_rows(resp).await?;
        rows.into_iter()
            .next()
            .ok_or(StoreError::NotFound)?
            .into_task()
    }
}

#[async_trait]
impl TaskStore for RestTaskStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn load_tasks(&self, owner: &str) -> Result<Vec<Task>, StoreError> {
        let resp = self
            .authed(self.client.get(format!(
                "{}/tasks?owner_id=eq.{}&order=created_at.desc",
                self.rest_url(),
                owner
            )))
            .send()
            .await?;
        let rows = Self::read_rows(resp).await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn insert_task(&self, owner: &str, draft: &TaskDraft) -> Result<Task, StoreError> {
        let resp = self
            .authed(self.client.post(format!("{}/tasks", self.rest_url())))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(&insert_body(owner, draft)?)
            .send()
            .await?;
        let rows = Self::read_rows(resp).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("no row returned for insert".to_string()))?
            .into_task()
    }

    async fn update_task(
        &self,
        owner: &str,
        id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Task, StoreError> {
        if patch.is_empty() {
            return self.fetch_task(owner, id).await;
        }

        let resp = self
            .authed(self.client.patch(format!(
                "{}/tasks?id=eq.{}&owner_id=eq.{}",
                self.rest_url(),
                id,
                owner
            )))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(&patch_body(patch)?)
            .send()
            .await?;
        let rows = Self::read_rows(resp).await?;
        rows.into_iter()
            .next()
            .ok_or(StoreError::NotFound)?
            .into_task()
    }

    async fn delete_task(&self, owner: &str, id: Uuid) -> Result<(), StoreError> {
        let resp = self
            .authed(self.client.delete(format!(
                "{}/tasks?id=eq.{}&owner_id=eq.{}",
                self.rest_url(),
                id,
                owner
            )))
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows = Self::read_rows(resp).await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// A task as stored in the `tasks` table. The sub-task collection lives in
/// a JSON-encoded text column.
#[derive(Debug, Deserialize)]
struct TaskRow {
    id: Uuid,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    category: ResetCategory,
    #[serde(default)]
    specific_reset_days: Option<Vec<u8>>,
    #[serde(default)]
    specific_reset_hours: Option<u32>,
    is_completed: bool,
    #[serde(default)]
    last_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    next_eligible: Option<DateTime<Utc>>,
    #[serde(default)]
    sub_tasks: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, StoreError> {
        let sub_tasks = decode_sub_tasks(self.sub_tasks.as_deref())?;
        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            tags: self.tags,
            category: self.category,
            specific_reset_days: self.specific_reset_days.unwrap_or_default(),
            specific_reset_hours: self.specific_reset_hours,
            is_completed: self.is_completed,
            last_completion: self.last_completion,
            next_eligible: self.next_eligible,
            sub_tasks,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn decode_sub_tasks(raw: Option<&str>) -> Result<Vec<SubTask>, StoreError> {
    match raw {
        None => Ok(vec![]),
        Some(s) if s.trim().is_empty() => Ok(vec![]),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| StoreError::Decode(format!("sub_tasks column: {e}"))),
    }
}

fn encode_sub_tasks(sub_tasks: &[SubTask]) -> Result<Value, StoreError> {
    if sub_tasks.is_empty() {
        return Ok(Value::Null);
    }
    let encoded = serde_json::to_string(sub_tasks)
        .map_err(|e| StoreError::Decode(format!("sub_tasks column: {e}")))?;
    Ok(Value::String(encoded))
}

fn insert_body(owner: &str, draft: &TaskDraft) -> Result<Value, StoreError> {
    Ok(json!({
        "owner_id": owner,
        "title": draft.title,
        "description": draft.description,
        "tags": draft.tags,
        "category": draft.category,
        "specific_reset_days": if draft.specific_reset_days.is_empty() {
            Value::Null
        } else {
            json!(draft.specific_reset_days)
        },
        "specific_reset_hours": draft.specific_reset_hours,
        "is_completed": draft.is_completed,
        "last_completion": draft.last_completion,
        "next_eligible": draft.next_eligible,
        "sub_tasks": encode_sub_tasks(&draft.sub_tasks)?,
    }))
}

/// Only the fields present in the patch make it into the body; `None`
/// inside a present field becomes an explicit SQL null.
fn patch_body(patch: &TaskPatch) -> Result<Value, StoreError> {
    let mut body = serde_json::Map::new();
    if let Some(title) = &patch.title {
        body.insert("title".to_string(), json!(title));
    }
    if let Some(description) = &patch.description {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(tags) = &patch.tags {
        body.insert("tags".to_string(), json!(tags));
    }
    if let Some(category) = patch.category {
        body.insert("category".to_string(), json!(category));
    }
    if let Some(days) = &patch.specific_reset_days {
        let value = if days.is_empty() { Value::Null } else { json!(days) };
        body.insert("specific_reset_days".to_string(), value);
    }
    if let Some(hours) = patch.specific_reset_hours {
        body.insert("specific_reset_hours".to_string(), json!(hours));
    }
    if let Some(is_completed) = patch.is_completed {
        body.insert("is_completed".to_string(), json!(is_completed));
    }
    if let Some(last_completion) = patch.last_completion {
        body.insert("last_completion".to_string(), json!(last_completion));
    }
    if let Some(next_eligible) = patch.next_eligible {
        body.insert("next_eligible".to_string(), json!(next_eligible));
    }
    if let Some(sub_tasks) = &patch.sub_tasks {
        body.insert("sub_tasks".to_string(), encode_sub_tasks(sub_tasks)?);
    }
    Ok(Value::Object(body))
}
