//! HTTP API for the task tracker session.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/tasks` - Snapshot of the in-memory task set
//! - `POST /api/tasks` - Create a task
//! - `PATCH /api/tasks/{id}` - Edit a task
//! - `DELETE /api/tasks/{id}` - Delete a task
//! - `POST /api/tasks/{id}/toggle` - Toggle completion on the task or one of
//!   its sub-tasks
//!
//! Every write goes through the store first; only the store's confirmed row
//! is merged back into the in-memory set, so a rejected write never
//! advances local state.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cascade::{self, ToggleError};
use crate::clock::Clock;
use crate::config::Config;
use crate::policy;
use crate::reconciler::ReconcilerHandle;
use crate::state::SharedTaskSet;
use crate::store::{StoreError, TaskStore};
use crate::task::{
    rollup_completed, validate_schedule, NewTask, ResetCategory, ScheduleParams, SubTask, Task,
    TaskPatch, ValidationError,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TaskStore>,
    pub tasks: SharedTaskSet,
    pub clock: Arc<dyn Clock>,
}

/// Start the HTTP server. Returns once a shutdown signal arrived and the
/// session (task set + reconciler) has been torn down.
pub async fn serve(state: Arc<AppState>, reconciler: ReconcilerHandle) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/:id", patch(edit_task).delete(delete_task))
        .route("/api/tasks/:id/toggle", post(toggle_task))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, closing the session");
            // Close the set first so in-flight work cannot commit, then
            // stop the loop itself.
            shutdown_state.tasks.close();
            reconciler.stop();
        })
        .await?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    owner_id: String,
    task_count: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// API failure modes mapped onto HTTP statuses.
#[derive(Debug)]
enum ApiError {
    Validation(ValidationError),
    Toggle(ToggleError),
    Store(StoreError),
    NotFound,
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<ToggleError> for ApiError {
    fn from(e: ToggleError) -> Self {
        Self::Toggle(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Toggle(e @ ToggleError::SubTaskNotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            Self::NotFound => (StatusCode::NOT_FOUND, "task not found".to_string()),
            Self::Store(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        owner_id: state.config.owner_id.clone(),
        task_count: state.tasks.snapshot().await.len(),
    })
}

/// Current in-memory task set, newest first.
async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(state.tasks.snapshot().await)
}

/// Validate the input, compute its first eligibility boundary, insert it
/// through the store and merge the confirmed row.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let draft = input.into_draft(state.clock.now())?;
    let confirmed = state
        .store
        .insert_task(&state.config.owner_id, &draft)
        .await?;
    state.tasks.commit(confirmed.clone()).await;
    Ok((StatusCode::CREATED, Json(confirmed)))
}

/// Fields that can be edited on an existing task. A category change takes
/// its schedule parameters from the request alone; otherwise missing
/// parameters keep their stored values.
#[derive(Debug, Deserialize)]
struct EditTaskRequest {
    title: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
    category: Option<ResetCategory>,
    specific_reset_days: Option<Vec<u8>>,
    specific_reset_hours: Option<u32>,
    sub_tasks: Option<Vec<SubTask>>,
}

async fn edit_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(edit): Json<EditTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let current = state.tasks.get(id).await.ok_or(ApiError::NotFound)?;
    let now = state.clock.now();

    if let Some(title) = &edit.title {
        if title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle.into());
        }
    }

    let category = edit.category.unwrap_or(current.category);
    let category_changed = category != current.category;
    let days = match (&edit.specific_reset_days, category_changed) {
        (Some(days), _) => days.clone(),
        (None, true) => vec![],
        (None, false) => current.specific_reset_days.clone(),
    };
    let hours = match (edit.specific_reset_hours, category_changed) {
        (Some(h), _) => Some(h),
        (None, true) => None,
        (None, false) => current.specific_reset_hours,
    };
    validate_schedule(category, &days, hours)?;
    if let Some(sub_tasks) = &edit.sub_tasks {
        for sub in sub_tasks {
            sub.validate()?;
        }
    }

    let mut patch = TaskPatch {
        title: edit.title,
        description: edit.description,
        tags: edit.tags,
        ..TaskPatch::default()
    };

    let schedule_changed = category_changed
        || days != current.specific_reset_days
        || hours != current.specific_reset_hours;
    if schedule_changed {
        patch.category = Some(category);
        patch.specific_reset_days = Some(days.clone());
        patch.specific_reset_hours = Some(hours);
        if category == ResetCategory::Ended {
            patch.is_completed = Some(true);
            patch.last_completion = Some(None);
            patch.next_eligible = Some(None);
        } else {
            // A completed countdown keeps measuring from its completion
            // instant; every other schedule restarts from now.
            let base = if category == ResetCategory::Countdown24h && current.is_completed {
                current.last_completion.unwrap_or(now)
            } else {
                now
            };
            let next = policy::next_eligible(
                category,
                ScheduleParams {
                    days: &days,
                    hours,
                },
                base,
                current.is_completed,
            );
            patch.next_eligible = Some(next);
        }
    }

    if let Some(sub_tasks) = edit.sub_tasks {
        let sub_tasks = normalize_sub_tasks(sub_tasks, now);
        if patch.is_completed.is_none() {
            if let Some(completed) = rollup_completed(&sub_tasks) {
                if category != ResetCategory::Ended {
                    patch.is_completed = Some(completed);
                }
            }
        }
        patch.sub_tasks = Some(sub_tasks);
    }

    let confirmed = state
        .store
        .update_task(&state.config.owner_id, id, &patch)
        .await?;
    state.tasks.commit(confirmed.clone()).await;
    Ok(Json(confirmed))
}

/// Scheduled sub-tasks arriving from an edit without a boundary get one
/// computed from now, the same way creation seeds them.
fn normalize_sub_tasks(
    mut sub_tasks: Vec<SubTask>,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<SubTask> {
    for sub in &mut sub_tasks {
        if let Some(category) = sub.category {
            if category != ResetCategory::Ended && sub.next_eligible.is_none() {
                sub.next_eligible =
                    policy::next_eligible(category, sub.params(), now, sub.is_completed);
            }
        }
    }
    sub_tasks
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_task(&state.config.owner_id, id)
        .await?;
    state.tasks.remove(id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct ToggleRequest {
    /// Title of the sub-task to toggle; absent toggles the parent.
    sub_task: Option<String>,
}

/// Run the completion cascade and persist the result. On a store failure
/// nothing is merged: the in-memory state stays where it was and the caller
/// may retry.
async fn toggle_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<Task>, ApiError> {
    let task = state.tasks.get(id).await.ok_or(ApiError::NotFound)?;
    let now = state.clock.now();

    let updated = cascade::toggle(&task, request.sub_task.as_deref(), now)?;
    if updated == task {
        // Ended targets are a no-op; nothing to persist.
        return Ok(Json(task));
    }

    let patch = TaskPatch::completion_diff(&task, &updated);
    let confirmed = state
        .store
        .update_task(&state.config.owner_id, id, &patch)
        .await?;
    state.tasks.commit(confirmed.clone()).await;
    Ok(Json(confirmed))
}
