// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskbook partition keeper
//!
//! Takes the leases of the configured task queues and keeps their metadata
//! fresh until shut down. A queue whose lease is taken by another owner is
//! dropped; the others keep running.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskbook_core::config::Config;
use taskbook_core::sync::{SyncLoop, SyncLoopExit};
use taskbook_core::{PhysicalTaskQueueKey, SqliteTaskStore, TaskQueueDb, TaskStore, TaskType};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taskbook_core=info".parse()?),
        )
        .init();

    info!("Starting Taskbook partition keeper");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        namespace_id = %config.namespace_id,
        task_queues = config.task_queues.len(),
        sync_interval_secs = config.sync_interval.as_secs(),
        range_size = config.queue.range_size,
        "Configuration loaded"
    );

    // Connect and migrate
    info!("Connecting to database...");
    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::connect(&config.database_url).await?);
    info!(backend = store.name(), "Database ready");

    let shutdown = CancellationToken::new();
    let mut loops = JoinSet::new();

    for name in &config.task_queues {
        for task_type in [TaskType::Workflow, TaskType::Activity] {
            let key = PhysicalTaskQueueKey::root(&config.namespace_id, name, task_type);
            let db = Arc::new(TaskQueueDb::new(config.queue.clone(), store.clone(), key.clone()));

            match db.renew_lease().await {
                Ok(state) => {
                    info!(
                        task_queue = %key,
                        range_id = state.range_id,
                        subqueues = state.subqueues.len(),
                        "Lease acquired"
                    );
                }
                Err(e) => {
                    error!(task_queue = %key, error = %e, "Failed to acquire lease");
                    continue;
                }
            }

            let sync = SyncLoop::new(db, config.sync_interval).with_cancellation(shutdown.child_token());
            loops.spawn(async move { (key, sync.run().await) });
        }
    }

    if loops.is_empty() {
        warn!("No task queue leases held, nothing to keep");
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                shutdown.cancel();
                break;
            }
            joined = loops.join_next() => {
                match joined {
                    Some(Ok((key, SyncLoopExit::LeaseLost))) => {
                        warn!(task_queue = %key, "Dropped task queue after losing its lease");
                    }
                    Some(Ok((key, SyncLoopExit::Cancelled))) => {
                        info!(task_queue = %key, "Sync loop cancelled");
                    }
                    Some(Err(e)) => error!(error = %e, "Sync loop task failed"),
                    None => {
                        warn!("All task queue leases lost");
                        return Ok(());
                    }
                }
            }
        }
    }

    // Each loop performs a final sync before exiting.
    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Sync loop task failed during shutdown");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
