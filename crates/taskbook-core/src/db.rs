// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence view of one physical task queue partition.
//!
//! [`TaskQueueDb`] owns the partition lease (the range id) and the in-memory
//! copy of every subqueue's bookkeeping. All mutations go through a single
//! async mutex that stays held across the store round-trip, so the metadata
//! writes of one partition are strictly serialized and the in-memory state
//! only moves after the store has acknowledged a write.
//!
//! Backlog counts are approximate. A batch rejected by a conditional-write
//! failure is known not to have landed and its count increment is undone;
//! any other failure keeps the increment, so the estimate can only err high.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::TaskQueueConfig;
use crate::error::{Error, Result, TaskStoreError};
use crate::fair_level::FairLevel;
use crate::id_block::range_id_to_task_id_block;
use crate::persistence::{
    AllocatedTask, CompleteTasksLessThanRequest, CreateTaskQueueRequest, CreateTasksRequest,
    GetTaskQueueRequest, GetTasksRequest, GetTasksResponse, RowsAffected, SubqueueInfo,
    SubqueueKey, TaskInfo, TaskQueueInfo, TaskStore, UpdateTaskQueueRequest,
};
use crate::queue::{PhysicalTaskQueueKey, TaskQueueKind};
use crate::softassert::{self, LogSoftAssert, SoftAssert};
use crate::subqueue::{BacklogUpdate, DbSubqueue, default_priority_level};

/// Range id of a newly created task queue.
pub const INITIAL_RANGE_ID: i64 = 1;

/// Lifetime of sticky queue metadata after its last write.
pub const STICKY_TASK_QUEUE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Subqueue that mirrors the pre-subqueue single queue.
pub const SUBQUEUE_ZERO: usize = 0;

/// A task to be written, with its id already allocated.
#[derive(Debug, Clone)]
pub struct WriteTaskRequest {
    /// Target subqueue.
    pub subqueue: usize,
    /// Allocated task id.
    pub id: i64,
    /// Fairness pass; ignored by FIFO writes.
    pub pass: i64,
    /// Task contents.
    pub info: TaskInfo,
}

impl WriteTaskRequest {
    /// Position of this task in a fair subqueue.
    pub fn fair_level(&self) -> FairLevel {
        FairLevel::new(self.pass, self.id)
    }
}

/// Snapshot returned by a successful lease renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueState {
    /// Lease now held.
    pub range_id: i64,
    /// Subqueue 0 ack level, for readers that predate subqueues.
    pub ack_level: i64,
    /// Copy of every subqueue's persisted info.
    pub subqueues: Vec<SubqueueInfo>,
}

/// Tasks written to one subqueue by a FIFO batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubqueueCreateTasks {
    /// Tasks in write order.
    pub tasks: Vec<AllocatedTask>,
    /// Max read level before the batch.
    pub max_read_level_before: i64,
    /// Max read level after the batch (the last task id).
    pub max_read_level_after: i64,
}

/// Outcome of [`TaskQueueDb::create_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTasksResult {
    /// Written tasks grouped by subqueue.
    pub by_subqueue: BTreeMap<usize, SubqueueCreateTasks>,
}

/// Outcome of [`TaskQueueDb::create_fair_tasks`]: written tasks by subqueue.
pub type CreateFairTasksResult = BTreeMap<usize, Vec<AllocatedTask>>;

/// Aggregate backlog figures across all subqueues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklogStats {
    /// Sum of the approximate backlog counts.
    pub approximate_backlog_count: i64,
    /// Oldest backlogged task creation time, if any subqueue reports one.
    pub oldest_time: Option<DateTime<Utc>>,
    /// Estimated read-to-ack distance, summed over subqueues.
    pub lag: i64,
}

impl BacklogStats {
    /// Age of the oldest backlogged task at `now`; zero without a backlog.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        self.oldest_time
            .map(|oldest| now - oldest)
            .unwrap_or_else(TimeDelta::zero)
    }
}

struct DbState {
    range_id: i64,
    subqueues: Vec<DbSubqueue>,
    // Bumped on every in-memory change that should reach the store.
    change_seq: u64,
    // Value of `change_seq` covered by the last successful metadata write.
    written_seq: u64,
    last_write: Option<Instant>,
}

impl DbState {
    fn mark_changed(&mut self) {
        self.change_seq += 1;
    }

    fn mark_written(&mut self) {
        self.written_seq = self.change_seq;
        self.last_write = Some(Instant::now());
    }

    fn needs_write(&self) -> bool {
        self.change_seq > self.written_seq
            || self
                .last_write
                .is_none_or(|written| written.elapsed() > STICKY_TASK_QUEUE_TTL / 2)
    }

    fn subqueue(&self, index: usize) -> Result<&DbSubqueue> {
        self.subqueues
            .get(index)
            .ok_or(Error::UnknownSubqueue(index))
    }

    fn subqueue_mut(&mut self, index: usize) -> Result<&mut DbSubqueue> {
        self.subqueues
            .get_mut(index)
            .ok_or(Error::UnknownSubqueue(index))
    }

    fn clone_subqueues(&self) -> Vec<SubqueueInfo> {
        self.subqueues.iter().map(|s| s.info.clone()).collect()
    }

    fn backlog_stats(&self) -> BacklogStats {
        let mut stats = BacklogStats::default();
        for s in &self.subqueues {
            stats.approximate_backlog_count += s.info.approximate_backlog_count;
            stats.oldest_time = match (stats.oldest_time, s.oldest_time) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            stats.lag += s.lag();
        }
        stats
    }
}

/// Persistence view of a physical task queue.
///
/// Every read and write of the queue's metadata goes through this type.
pub struct TaskQueueDb {
    config: TaskQueueConfig,
    queue: PhysicalTaskQueueKey,
    store: Arc<dyn TaskStore>,
    soft_assert: Arc<dyn SoftAssert>,
    state: Mutex<DbState>,
}

impl TaskQueueDb {
    /// Create a view with no lease held. Call [`renew_lease`](Self::renew_lease) first.
    pub fn new(
        config: TaskQueueConfig,
        store: Arc<dyn TaskStore>,
        queue: PhysicalTaskQueueKey,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            soft_assert: Arc::new(LogSoftAssert),
            state: Mutex::new(DbState {
                range_id: 0,
                subqueues: Vec::new(),
                change_seq: 0,
                written_seq: 0,
                last_write: None,
            }),
        }
    }

    /// Replace the hook receiving soft invariant violations.
    pub fn with_soft_assert(mut self, hook: Arc<dyn SoftAssert>) -> Self {
        self.soft_assert = hook;
        self
    }

    /// Key of the partition this view manages.
    pub fn queue(&self) -> &PhysicalTaskQueueKey {
        &self.queue
    }

    /// Tuning this view was created with.
    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Current lease; 0 while none is held.
    pub async fn range_id(&self) -> i64 {
        self.state.lock().await.range_id
    }

    /// Highest FIFO task id known to be written to `subqueue`.
    pub async fn max_read_level(&self, subqueue: usize) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.subqueue(subqueue)?.max_read_level)
    }

    /// Highest fair level known to be written to `subqueue`.
    pub async fn max_fair_read_level(&self, subqueue: usize) -> Result<FairLevel> {
        let state = self.state.lock().await;
        Ok(state.subqueue(subqueue)?.fair_max_read_level())
    }

    /// Snapshot of every subqueue's persisted info.
    pub async fn subqueues(&self) -> Vec<SubqueueInfo> {
        self.state.lock().await.clone_subqueues()
    }

    /// Renew the lease, or take the queue over if no lease is held yet.
    ///
    /// Taking over reads existing metadata and bumps its range id, stealing
    /// the queue from any previous owner; a missing queue is created at
    /// [`INITIAL_RANGE_ID`]. A condition-failed error means another owner
    /// advanced the lease and this one is lost.
    pub async fn renew_lease(&self) -> Result<TaskQueueState> {
        let mut state = self.state.lock().await;

        if state.range_id == 0 {
            self.take_over_locked(&mut state).await?;
        } else {
            self.update_task_queue_locked(&mut state, true).await?;
        }

        let ack_level = state.subqueue(SUBQUEUE_ZERO)?.info.ack_level;
        Ok(TaskQueueState {
            range_id: state.range_id,
            ack_level,
            subqueues: state.clone_subqueues(),
        })
    }

    async fn take_over_locked(&self, state: &mut DbState) -> Result<()> {
        let request = GetTaskQueueRequest {
            namespace_id: self.queue.namespace_id.clone(),
            task_queue: self.queue.persistence_name(),
            task_type: self.queue.task_type,
        };

        match self.store.get_task_queue(&request).await {
            Ok(response) => {
                state.range_id = response.range_id;
                state.subqueues = self.ensure_default_subqueues(
                    state.range_id,
                    response.info.subqueues,
                    response.info.ack_level,
                    response.info.approximate_backlog_count,
                );
                if let Err(e) = self.update_task_queue_locked(state, true).await {
                    state.range_id = 0;
                    return Err(e);
                }

                // Tasks written by the previous owner are unknown; start reading
                // just before our own block.
                let max_read_level =
                    range_id_to_task_id_block(state.range_id, self.config.range_size).start - 1;
                for s in &mut state.subqueues {
                    s.max_read_level = max_read_level;
                }

                info!(
                    task_queue = %self.queue,
                    range_id = state.range_id,
                    subqueues = state.subqueues.len(),
                    "Took over task queue"
                );
                Ok(())
            }
            Err(TaskStoreError::NotFound(_)) => {
                state.range_id = INITIAL_RANGE_ID;
                state.subqueues =
                    self.ensure_default_subqueues(INITIAL_RANGE_ID, Vec::new(), 0, 0);

                let request = CreateTaskQueueRequest {
                    range_id: state.range_id,
                    info: self.cached_queue_info(state),
                };
                if let Err(e) = self.store.create_task_queue(&request).await {
                    state.range_id = 0;
                    return Err(e.into());
                }
                state.mark_written();

                if let Some(first) = state.subqueues.first() {
                    let hook = self.soft_assert.as_ref();
                    softassert::that(hook, first.max_read_level == 0, "should have maxReadLevel 0 here");
                    softassert::that(
                        hook,
                        first.info.fair_max_read_level.is_none(),
                        "should have fair maxReadLevel unset here",
                    );
                    softassert::that(hook, first.info.ack_level == 0, "should have ackLevel 0 here");
                    softassert::that(
                        hook,
                        first.info.fair_ack_level.is_none(),
                        "should have fair ackLevel unset here",
                    );
                }

                info!(task_queue = %self.queue, range_id = state.range_id, "Created task queue");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_task_queue_locked(&self, state: &mut DbState, increment: bool) -> Result<()> {
        let new_range_id = if increment {
            state.range_id + 1
        } else {
            state.range_id
        };

        let request = UpdateTaskQueueRequest {
            range_id: new_range_id,
            prev_range_id: state.range_id,
            info: self.cached_queue_info(state),
        };
        self.store.update_task_queue(&request).await?;

        state.mark_written();
        state.range_id = new_range_id;
        Ok(())
    }

    /// Persist a new subqueue-0 ack level; the write-back used by readers
    /// that predate subqueues.
    ///
    /// The ack level is restored if the write fails.
    pub async fn old_update_state(&self, ack_level: i64) -> Result<()> {
        let mut state = self.state.lock().await;

        let s = state.subqueue_mut(SUBQUEUE_ZERO)?;
        if ack_level == s.max_read_level {
            s.reset_backlog(0, None);
        }
        let prev_ack_level = s.info.ack_level;
        s.info.ack_level = ack_level;

        let result = self.update_task_queue_locked(&mut state, false).await;
        if result.is_err() {
            state.subqueues[SUBQUEUE_ZERO].info.ack_level = prev_ack_level;
        }
        self.log_backlog_locked(&state);
        result
    }

    /// Write metadata if it changed since the last write, or if half the
    /// sticky TTL has passed since then.
    pub async fn sync_state(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.range_id == 0 {
            return Err(Error::InvalidState(format!(
                "no lease held on task queue {}",
                self.queue
            )));
        }

        let result = if state.needs_write() {
            self.update_task_queue_locked(&mut state, false).await
        } else {
            Ok(())
        };
        self.log_backlog_locked(&state);
        result
    }

    /// Record reader progress on a FIFO subqueue.
    ///
    /// When the ack level reaches the max read level the backlog is known to
    /// be empty and the count is reset, otherwise `count_delta` is applied.
    pub async fn update_ack_level_and_backlog_stats(
        &self,
        subqueue: usize,
        new_ack_level: i64,
        count_delta: i64,
        oldest_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        let s = state.subqueue_mut(subqueue)?;
        if new_ack_level < s.info.ack_level {
            self.soft_assert.fail(&format!(
                "ack level in subqueue {} should not move backwards (from {} to {})",
                subqueue, s.info.ack_level, new_ack_level
            ));
        }

        let mut changed = false;
        if s.info.ack_level != new_ack_level {
            s.info.ack_level = new_ack_level;
            changed = true;
        }

        if new_ack_level == s.max_read_level {
            if s.info.approximate_backlog_count != 0 || s.oldest_time != oldest_time {
                s.reset_backlog(0, oldest_time);
                changed = true;
            }
        } else if count_delta != 0 {
            self.apply_backlog_delta(subqueue, s, count_delta, oldest_time);
            changed = true;
        }

        if changed {
            state.mark_changed();
        }
        Ok(())
    }

    /// Record reader progress on a fair subqueue.
    ///
    /// `known_count`, when present, replaces the approximate count outright.
    pub async fn update_fair_ack_level(
        &self,
        subqueue: usize,
        new_ack_level: FairLevel,
        count_delta: i64,
        known_count: Option<i64>,
        oldest_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        let s = state.subqueue_mut(subqueue)?;
        let prev = s.fair_ack_level();
        if new_ack_level.less(prev) {
            self.soft_assert.fail(&format!(
                "ack level in subqueue {} should not move backwards (from {} to {})",
                subqueue, prev, new_ack_level
            ));
        }
        s.info.fair_ack_level = Some(new_ack_level);

        match known_count {
            Some(count) => s.reset_backlog(count, oldest_time),
            None if count_delta != 0 => {
                self.apply_backlog_delta(subqueue, s, count_delta, oldest_time)
            }
            None => {}
        }

        state.mark_changed();
        Ok(())
    }

    /// Set the backlog count of a fair subqueue to a known value, e.g. after
    /// reading to the end of it.
    pub async fn set_known_fair_backlog_count(&self, subqueue: usize, count: i64) -> Result<()> {
        let mut state = self.state.lock().await;

        let s = state.subqueue_mut(subqueue)?;
        if s.info.approximate_backlog_count != count {
            s.info.approximate_backlog_count = count;
            if count == 0 {
                s.oldest_time = None;
            }
            state.mark_changed();
        }
        Ok(())
    }

    /// Apply a backlog delta to subqueue 0.
    pub async fn update_backlog_stats(
        &self,
        count_delta: i64,
        oldest_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        let s = state.subqueue_mut(SUBQUEUE_ZERO)?;
        self.apply_backlog_delta(SUBQUEUE_ZERO, s, count_delta, oldest_time);
        state.mark_changed();
        Ok(())
    }

    fn apply_backlog_delta(
        &self,
        index: usize,
        subqueue: &mut DbSubqueue,
        count_delta: i64,
        oldest_time: Option<DateTime<Utc>>,
    ) {
        if subqueue.apply_backlog_delta(count_delta, oldest_time) == BacklogUpdate::Clamped {
            info!(
                namespace_id = %self.queue.namespace_id,
                task_queue = %self.queue.persistence_name(),
                subqueue = index,
                "ApproximateBacklogCount could have under-counted"
            );
        }
    }

    /// Approximate backlog count of each subqueue, indexed by subqueue.
    pub async fn approximate_backlog_counts_by_subqueue(&self) -> Vec<i64> {
        let state = self.state.lock().await;
        state
            .subqueues
            .iter()
            .map(|s| s.info.approximate_backlog_count)
            .collect()
    }

    /// Approximate backlog count and fair max read level of one subqueue.
    pub async fn approximate_backlog_count_and_max_read_level(
        &self,
        subqueue: usize,
    ) -> Result<(i64, FairLevel)> {
        let state = self.state.lock().await;
        let s = state.subqueue(subqueue)?;
        Ok((s.info.approximate_backlog_count, s.fair_max_read_level()))
    }

    /// Sum of the approximate backlog counts.
    pub async fn total_approximate_backlog_count(&self) -> i64 {
        let state = self.state.lock().await;
        state
            .subqueues
            .iter()
            .map(|s| s.info.approximate_backlog_count)
            .sum()
    }

    /// Aggregate backlog figures.
    pub async fn backlog_stats(&self) -> BacklogStats {
        self.state.lock().await.backlog_stats()
    }

    fn log_backlog_locked(&self, state: &DbState) {
        let stats = state.backlog_stats();
        debug!(
            task_queue = %self.queue,
            approximate_backlog_count = stats.approximate_backlog_count,
            approximate_backlog_age_secs = stats.age(Utc::now()).num_seconds(),
            task_lag = stats.lag,
            "Backlog stats"
        );
    }

    /// Write a batch of FIFO tasks under the current lease.
    ///
    /// Max read levels advance to the last id of each subqueue whether or not
    /// the write succeeds; task ids are never reused.
    pub async fn create_tasks(&self, requests: Vec<WriteTaskRequest>) -> Result<CreateTasksResult> {
        let mut state = self.state.lock().await;

        if requests.is_empty() {
            return Ok(CreateTasksResult::default());
        }

        let mut by_subqueue: BTreeMap<usize, SubqueueCreateTasks> = BTreeMap::new();
        let mut all_tasks = Vec::with_capacity(requests.len());
        for request in requests {
            let before = state.subqueue(request.subqueue)?.max_read_level;
            let task = AllocatedTask {
                task_id: request.id,
                pass: 0,
                subqueue: request.subqueue,
                info: request.info,
            };
            let update = by_subqueue
                .entry(request.subqueue)
                .or_insert_with(|| SubqueueCreateTasks {
                    tasks: Vec::new(),
                    max_read_level_before: before,
                    max_read_level_after: before,
                });
            // Ids arrive in order, so the last one is the max.
            update.max_read_level_after = task.task_id;
            update.tasks.push(task.clone());
            all_tasks.push(task);
        }

        for (&index, update) in &by_subqueue {
            state.subqueues[index].info.approximate_backlog_count += update.tasks.len() as i64;
        }

        let request = CreateTasksRequest {
            range_id: state.range_id,
            info: self.cached_queue_info(&state),
            tasks: all_tasks,
        };
        let result = self.store.create_tasks(&request).await;

        for (&index, update) in &by_subqueue {
            state.subqueues[index].max_read_level = update.max_read_level_after;
        }

        match result {
            Ok(response) => {
                if response.updated_metadata {
                    state.mark_written();
                }
                Ok(CreateTasksResult { by_subqueue })
            }
            Err(e) => {
                if e.is_condition_failed() {
                    for (&index, update) in &by_subqueue {
                        state.subqueues[index].info.approximate_backlog_count -=
                            update.tasks.len() as i64;
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Write a batch of fair tasks under the current lease.
    ///
    /// Fair max read levels are raised before the write and never lowered.
    pub async fn create_fair_tasks(
        &self,
        requests: Vec<WriteTaskRequest>,
    ) -> Result<CreateFairTasksResult> {
        let mut state = self.state.lock().await;

        if requests.is_empty() {
            return Ok(CreateFairTasksResult::new());
        }

        let mut new_tasks = CreateFairTasksResult::new();
        let mut new_max_levels: BTreeMap<usize, FairLevel> = BTreeMap::new();
        let mut all_tasks = Vec::with_capacity(requests.len());
        for request in requests {
            state.subqueue(request.subqueue)?;
            let level = request.fair_level();
            let task = AllocatedTask {
                task_id: request.id,
                pass: request.pass,
                subqueue: request.subqueue,
                info: request.info,
            };
            all_tasks.push(task.clone());
            new_tasks.entry(request.subqueue).or_default().push(task);
            let max_level = new_max_levels.entry(request.subqueue).or_default();
            *max_level = (*max_level).max(level);
        }

        for (&index, tasks) in &new_tasks {
            state.subqueues[index].info.approximate_backlog_count += tasks.len() as i64;
        }
        for (&index, &level) in &new_max_levels {
            state.subqueues[index].raise_fair_max_read_level(level);
        }

        let request = CreateTasksRequest {
            range_id: state.range_id,
            info: self.cached_queue_info(&state),
            tasks: all_tasks,
        };
        match self.store.create_tasks(&request).await {
            Ok(response) => {
                if response.updated_metadata {
                    state.mark_written();
                }
                Ok(new_tasks)
            }
            Err(e) => {
                if e.is_condition_failed() {
                    for (&index, tasks) in &new_tasks {
                        state.subqueues[index].info.approximate_backlog_count -=
                            tasks.len() as i64;
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Read FIFO tasks with ids in `[inclusive_min_task_id, exclusive_max_task_id)`.
    pub async fn get_tasks(
        &self,
        subqueue: usize,
        inclusive_min_task_id: i64,
        exclusive_max_task_id: i64,
        batch_size: usize,
    ) -> Result<GetTasksResponse> {
        let request = GetTasksRequest {
            namespace_id: self.queue.namespace_id.clone(),
            task_queue: self.queue.persistence_name(),
            task_type: self.queue.task_type,
            subqueue,
            inclusive_min_pass: 0,
            inclusive_min_task_id,
            exclusive_max_task_id,
            page_size: batch_size,
            use_limit: false,
            next_page_token: None,
        };
        Ok(self.store.get_tasks(&request).await?)
    }

    /// Read up to `batch_size` fair tasks at or after `inclusive_min_level`.
    pub async fn get_fair_tasks(
        &self,
        subqueue: usize,
        inclusive_min_level: FairLevel,
        batch_size: usize,
    ) -> Result<GetTasksResponse> {
        let request = GetTasksRequest {
            namespace_id: self.queue.namespace_id.clone(),
            task_queue: self.queue.persistence_name(),
            task_type: self.queue.task_type,
            subqueue,
            inclusive_min_pass: inclusive_min_level.pass,
            inclusive_min_task_id: inclusive_min_level.id,
            exclusive_max_task_id: i64::MAX,
            page_size: batch_size,
            use_limit: true,
            next_page_token: None,
        };
        Ok(self.store.get_tasks(&request).await?)
    }

    /// Delete FIFO tasks below `exclusive_max_task_id`.
    ///
    /// `limit` bounds the deleted rows if the store supports it. The returned
    /// count is only as exact as the store can make it.
    pub async fn complete_tasks_less_than(
        &self,
        exclusive_max_task_id: i64,
        limit: usize,
        subqueue: usize,
    ) -> Result<RowsAffected> {
        self.complete_less_than(FairLevel::new(0, exclusive_max_task_id), limit, subqueue)
            .await
    }

    /// Delete fair tasks below `exclusive_max_level`.
    pub async fn complete_fair_tasks_less_than(
        &self,
        exclusive_max_level: FairLevel,
        limit: usize,
        subqueue: usize,
    ) -> Result<RowsAffected> {
        self.complete_less_than(exclusive_max_level, limit, subqueue)
            .await
    }

    async fn complete_less_than(
        &self,
        exclusive_max_level: FairLevel,
        limit: usize,
        subqueue: usize,
    ) -> Result<RowsAffected> {
        let request = CompleteTasksLessThanRequest {
            namespace_id: self.queue.namespace_id.clone(),
            task_queue: self.queue.persistence_name(),
            task_type: self.queue.task_type,
            subqueue,
            exclusive_max_pass: exclusive_max_level.pass,
            exclusive_max_task_id: exclusive_max_level.id,
            limit,
        };

        self.store
            .complete_tasks_less_than(&request)
            .await
            .map_err(|e| {
                error!(
                    store_operation = "complete-tasks-less-than",
                    error = %e,
                    ack_level = %exclusive_max_level,
                    task_queue_type = ?self.queue.task_type,
                    task_queue = %self.queue.persistence_name(),
                    "Persistent store operation failure"
                );
                e.into()
            })
    }

    /// Append a subqueue and persist it without bumping the lease.
    ///
    /// On failure the subqueue is dropped from memory again; it may or may
    /// not have reached the store and can reappear on the next takeover.
    pub async fn allocate_subqueue(&self, key: SubqueueKey) -> Result<Vec<SubqueueInfo>> {
        let mut state = self.state.lock().await;

        if state.range_id == 0 {
            return Err(Error::InvalidState(format!(
                "no lease held on task queue {}",
                self.queue
            )));
        }

        let subqueue = self.new_subqueue(state.range_id, key);
        state.subqueues.push(subqueue);

        if let Err(e) = self.update_task_queue_locked(&mut state, false).await {
            state.subqueues.pop();
            return Err(e);
        }

        Ok(state.clone_subqueues())
    }

    fn expiry_time(&self) -> Option<DateTime<Utc>> {
        match self.queue.kind {
            TaskQueueKind::Normal => None,
            TaskQueueKind::Sticky => Some(
                Utc::now() + TimeDelta::seconds(STICKY_TASK_QUEUE_TTL.as_secs() as i64),
            ),
        }
    }

    fn cached_queue_info(&self, state: &DbState) -> TaskQueueInfo {
        let (ack_level, approximate_backlog_count) = state
            .subqueues
            .get(SUBQUEUE_ZERO)
            .map(|s| (s.info.ack_level, s.info.approximate_backlog_count))
            .unwrap_or_default();

        TaskQueueInfo {
            namespace_id: self.queue.namespace_id.clone(),
            name: self.queue.persistence_name(),
            task_type: self.queue.task_type,
            kind: self.queue.kind,
            ack_level,
            approximate_backlog_count,
            expiry_time: self.expiry_time(),
            last_update_time: Utc::now(),
            subqueues: state.clone_subqueues(),
        }
    }

    fn ensure_default_subqueues(
        &self,
        range_id: i64,
        infos: Vec<SubqueueInfo>,
        init_ack_level: i64,
        init_approximate_count: i64,
    ) -> Vec<DbSubqueue> {
        let mut subqueues: Vec<DbSubqueue> = infos.into_iter().map(DbSubqueue::from_info).collect();

        let default_key = SubqueueKey {
            priority: default_priority_level(self.config.priority_levels),
        };
        if !subqueues.iter().any(|s| s.info.key == default_key) {
            subqueues.push(self.new_subqueue(range_id, default_key));
            // Moving from a single queue to subqueues: subqueue 0 inherits the
            // queue-level ack level and count.
            if subqueues.len() == 1 {
                subqueues[SUBQUEUE_ZERO].info.ack_level = init_ack_level;
                subqueues[SUBQUEUE_ZERO].info.approximate_backlog_count = init_approximate_count;
            }
        }
        subqueues
    }

    fn new_subqueue(&self, range_id: i64, key: SubqueueKey) -> DbSubqueue {
        // FIFO subqueues start just before the current block.
        let init_level = range_id_to_task_id_block(range_id, self.config.range_size).start - 1;
        softassert::that(
            self.soft_assert.as_ref(),
            init_level >= 0,
            "initAckLevel should not be negative",
        );
        DbSubqueue::new(key, init_level)
    }
}
