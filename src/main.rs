//! taskcycle - HTTP server entry point.
//!
//! Loads configuration, pulls the owner's tasks from the store, starts the
//! reconciliation loop and serves the API until a shutdown signal arrives.

use std::sync::Arc;

use taskcycle::api::{self, AppState};
use taskcycle::clock::{Clock, SystemClock};
use taskcycle::config::Config;
use taskcycle::reconciler::Reconciler;
use taskcycle::state::TaskSet;
use taskcycle::store;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskcycle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        owner = %config.owner_id,
        store = ?config.store,
        interval_secs = config.reconcile_interval.as_secs(),
        "Loaded configuration"
    );

    let store = store::create_store(&config)?;
    let tasks = TaskSet::new();

    let loaded = store.load_tasks(&config.owner_id).await?;
    info!(count = loaded.len(), "Loaded tasks from the store");
    tasks.replace_all(loaded).await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&tasks),
        Arc::clone(&clock),
        config.owner_id.clone(),
        config.reconcile_interval,
    )
    .start();

    let state = Arc::new(AppState {
        config,
        store,
        tasks,
        clock,
    });

    api::serve(state, reconciler).await
}
