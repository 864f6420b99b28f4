//! Task storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for tests and local runs)
//! - `rest`: PostgREST-compatible HTTP store (the production deployment)
//!
//! Every operation is scoped by an owner identifier; an id that exists under
//! a different owner is indistinguishable from a missing row.

mod memory;
mod rest;

pub use memory::MemoryTaskStore;
pub use rest::RestTaskStore;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, ConfigError, StoreKind};
use crate::task::{Task, TaskDraft, TaskPatch};

/// Errors surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row for this `(id, owner)` pair.
    #[error("task not found")]
    NotFound,

    /// The store answered, but refused the request.
    #[error("store rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The store could not be reached.
    #[error("store request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The store answered with something the row codec cannot read.
    #[error("store returned an unreadable row: {0}")]
    Decode(String),
}

/// Task store trait - implemented by all storage backends.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Load all tasks for an owner, newest first.
    async fn load_tasks(&self, owner: &str) -> Result<Vec<Task>, StoreError>;

    /// Insert a new task. The store assigns the id and both timestamps.
    async fn insert_task(&self, owner: &str, draft: &TaskDraft) -> Result<Task, StoreError>;

    /// Partially update a task row and return the confirmed row.
    async fn update_task(
        &self,
        owner: &str,
        id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Task, StoreError>;

    /// Delete a task row.
    async fn delete_task(&self, owner: &str, id: Uuid) -> Result<(), StoreError>;
}

/// Create a task store from the service configuration.
pub fn create_store(config: &Config) -> Result<Arc<dyn TaskStore>, ConfigError> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryTaskStore::new())),
        StoreKind::Rest => {
            let url = config
                .store_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingEnvVar("STORE_URL".to_string()))?;
            let key = config
                .store_service_key
                .as_deref()
                .ok_or_else(|| ConfigError::MissingEnvVar("STORE_SERVICE_KEY".to_string()))?;
            Ok(Arc::new(RestTaskStore::new(url, key)))
        }
    }
}
