// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background loop that periodically persists task queue metadata.
//!
//! [`TaskQueueDb::sync_state`] only writes when something changed or the
//! metadata is getting old, so the loop can tick often without amplifying
//! writes. The loop ends when its cancellation token fires (after one last
//! sync) or when the store reports that the lease was taken by another owner.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::TaskQueueDb;

/// Why a [`SyncLoop`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLoopExit {
    /// The cancellation token fired.
    Cancelled,
    /// Another owner advanced the lease.
    LeaseLost,
}

/// Periodic metadata sync for one task queue.
pub struct SyncLoop {
    db: Arc<TaskQueueDb>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncLoop {
    /// Create a loop syncing `db` every `interval`.
    pub fn new(db: Arc<TaskQueueDb>, interval: Duration) -> Self {
        Self {
            db,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` (or a child of a wider token) to stop the loop.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops this loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled or the lease is lost.
    pub async fn run(&self) -> SyncLoopExit {
        debug!(
            task_queue = %self.db.queue(),
            interval_secs = self.interval.as_secs(),
            "State sync loop started"
        );

        let exit = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if !self.sync_once().await {
                        break SyncLoopExit::LeaseLost;
                    }
                    break SyncLoopExit::Cancelled;
                }

                _ = tokio::time::sleep(self.interval) => {
                    if !self.sync_once().await {
                        break SyncLoopExit::LeaseLost;
                    }
                }
            }
        };

        info!(task_queue = %self.db.queue(), exit = ?exit, "State sync loop stopped");
        exit
    }

    /// Sync once and report whether the lease is still held.
    async fn sync_once(&self) -> bool {
        match self.db.sync_state().await {
            Ok(()) => true,
            Err(e) if e.is_condition_failed() => {
                warn!(task_queue = %self.db.queue(), error = %e, "Lease lost during state sync");
                false
            }
            Err(e) => {
                error!(task_queue = %self.db.queue(), error = %e, "Failed to sync task queue state");
                true
            }
        }
    }
}
