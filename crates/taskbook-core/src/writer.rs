// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task id allocation and batched writes.
//!
//! A [`TaskWriter`] hands out ids from the block owned by the current lease.
//! When the block runs out it renews the lease and continues with the block of
//! the new range id. Allocation and the store write happen under one lock so
//! ids reach the store in increasing order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::{CreateFairTasksResult, CreateTasksResult, TaskQueueDb, TaskQueueState, WriteTaskRequest};
use crate::error::{Error, Result};
use crate::id_block::{TaskIdBlock, range_id_to_task_id_block};
use crate::persistence::TaskInfo;

const RENEW_ATTEMPTS: u32 = 3;
const RENEW_BACKOFF: Duration = Duration::from_millis(100);

/// A task waiting for an id.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Target subqueue.
    pub subqueue: usize,
    /// Fairness pass; ignored by [`TaskWriter::write_tasks`].
    pub pass: i64,
    /// Task contents.
    pub info: TaskInfo,
}

/// Allocates task ids and writes tasks through a [`TaskQueueDb`].
pub struct TaskWriter {
    db: Arc<TaskQueueDb>,
    block: Mutex<TaskIdBlock>,
}

impl TaskWriter {
    /// Create a writer using the block of the lease `db` currently holds.
    pub async fn new(db: Arc<TaskQueueDb>) -> Result<Self> {
        let range_id = db.range_id().await;
        if range_id == 0 {
            return Err(Error::InvalidState(format!(
                "no lease held on task queue {}",
                db.queue()
            )));
        }
        let block = range_id_to_task_id_block(range_id, db.config().range_size);
        Ok(Self {
            db,
            block: Mutex::new(block),
        })
    }

    /// Create a writer from the state returned by a lease renewal.
    pub fn from_state(db: Arc<TaskQueueDb>, state: &TaskQueueState) -> Self {
        let block = range_id_to_task_id_block(state.range_id, db.config().range_size);
        Self {
            db,
            block: Mutex::new(block),
        }
    }

    /// The database this writer writes through.
    pub fn db(&self) -> &Arc<TaskQueueDb> {
        &self.db
    }

    /// Allocate ids for `tasks` and write them as FIFO tasks.
    pub async fn write_tasks(&self, tasks: Vec<NewTask>) -> Result<CreateTasksResult> {
        let mut block = self.block.lock().await;
        let requests = self.allocate(&mut block, tasks).await?;
        self.db.create_tasks(requests).await.inspect_err(|e| self.log_write_error(e))
    }

    /// Allocate ids for `tasks` and write them as fair tasks with their passes.
    pub async fn write_fair_tasks(&self, tasks: Vec<NewTask>) -> Result<CreateFairTasksResult> {
        let mut block = self.block.lock().await;
        let requests = self.allocate(&mut block, tasks).await?;
        self.db
            .create_fair_tasks(requests)
            .await
            .inspect_err(|e| self.log_write_error(e))
    }

    async fn allocate(
        &self,
        block: &mut TaskIdBlock,
        tasks: Vec<NewTask>,
    ) -> Result<Vec<WriteTaskRequest>> {
        let mut requests = Vec::with_capacity(tasks.len());
        for task in tasks {
            if block.is_exhausted() {
                *block = self.allocate_block(*block).await?;
            }
            requests.push(WriteTaskRequest {
                subqueue: task.subqueue,
                id: block.start,
                pass: task.pass,
                info: task.info,
            });
            block.start += 1;
        }
        Ok(requests)
    }

    async fn allocate_block(&self, exhausted: TaskIdBlock) -> Result<TaskIdBlock> {
        let range_size = self.db.config().range_size;
        let current = range_id_to_task_id_block(self.db.range_id().await, range_size);
        if current.end != exhausted.end {
            return Err(Error::InvalidState(format!(
                "exhausted block ends at {} but lease block is {:?}",
                exhausted.end, current
            )));
        }

        let state = self.renew_lease_with_retry().await?;
        let block = range_id_to_task_id_block(state.range_id, range_size);
        debug!(
            task_queue = %self.db.queue(),
            range_id = state.range_id,
            start = block.start,
            end = block.end,
            "Allocated task id block"
        );
        Ok(block)
    }

    async fn renew_lease_with_retry(&self) -> Result<TaskQueueState> {
        let mut attempt = 1;
        loop {
            match self.db.renew_lease().await {
                Ok(state) => return Ok(state),
                Err(Error::Store(e)) if e.is_transient() && attempt < RENEW_ATTEMPTS => {
                    warn!(
                        task_queue = %self.db.queue(),
                        attempt,
                        error = %e,
                        "Lease renewal failed, retrying"
                    );
                    tokio::time::sleep(RENEW_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn log_write_error(&self, error: &Error) {
        if error.is_condition_failed() {
            warn!(task_queue = %self.db.queue(), error = %error, "Lease lost while writing tasks");
        } else {
            warn!(task_queue = %self.db.queue(), error = %error, "Failed to write tasks");
        }
    }
}
