// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence contract and backends for task queues.
//!
//! A [`TaskStore`] keeps two kinds of rows per physical queue: one metadata
//! row guarded by a range id, and the task rows themselves. Every mutating
//! metadata operation is a compare-and-swap on the range id; a rejected swap
//! is reported as [`TaskStoreError::ConditionFailed`] and nothing else.

mod row;
pub mod sqlite;

pub use self::row::typed_field;
pub use self::sqlite::SqliteTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskStoreError;
use crate::fair_level::FairLevel;
use crate::queue::{TaskQueueKind, TaskType};

/// Encoding tag for JSON-encoded blobs.
pub const ENCODING_JSON: &str = "json";

/// Classification of a subqueue (currently just its priority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubqueueKey {
    /// Priority level; lower values are served first.
    pub priority: u32,
}

/// Persisted bookkeeping for one subqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubqueueInfo {
    /// Priority/fairness classification.
    pub key: SubqueueKey,
    /// Highest task id below which every task is acknowledged (FIFO queues).
    pub ack_level: i64,
    /// Estimated number of unacknowledged tasks.
    pub approximate_backlog_count: i64,
    /// Ack level for fair queues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fair_ack_level: Option<FairLevel>,
    /// Highest level written to a fair queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fair_max_read_level: Option<FairLevel>,
}

/// Persisted metadata of one physical task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueInfo {
    /// Owning namespace.
    pub namespace_id: String,
    /// Persistence name of the queue partition.
    pub name: String,
    /// Kind of tasks.
    pub task_type: TaskType,
    /// Normal or sticky.
    pub kind: TaskQueueKind,
    /// Subqueue 0 ack level, kept for readers that predate subqueues.
    pub ack_level: i64,
    /// Subqueue 0 backlog count, kept for readers that predate subqueues.
    pub approximate_backlog_count: i64,
    /// When the metadata row expires (sticky queues only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
    /// When this metadata was produced.
    pub last_update_time: DateTime<Utc>,
    /// Per-subqueue bookkeeping; empty for queues written before subqueues existed.
    #[serde(default)]
    pub subqueues: Vec<SubqueueInfo>,
}

/// Opaque payload plus the tag describing how it is encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBlob {
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Encoding tag, e.g. `json` or `proto3`.
    pub encoding: String,
}

impl DataBlob {
    /// Wrap already-encoded bytes.
    pub fn new(data: impl Into<Vec<u8>>, encoding: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            encoding: encoding.into(),
        }
    }
}

/// Task contents as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task payload.
    pub data: DataBlob,
    /// When the task was created.
    pub create_time: DateTime<Utc>,
    /// After this time the task is dropped by the store.
    pub expiry_time: Option<DateTime<Utc>>,
}

/// A task with its assigned position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedTask {
    /// Task id from the writer's id block.
    pub task_id: i64,
    /// Fairness pass; always 0 for FIFO queues.
    pub pass: i64,
    /// Subqueue index.
    pub subqueue: usize,
    /// Stored contents.
    pub info: TaskInfo,
}

impl AllocatedTask {
    /// Position of this task in a fair subqueue.
    pub fn fair_level(&self) -> FairLevel {
        FairLevel::new(self.pass, self.task_id)
    }
}

/// Number of rows a best-effort delete removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsAffected {
    /// The store counted the deleted rows.
    Exact(u64),
    /// The store cannot report a count.
    Unknown,
}

/// Identifies one queue's metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetTaskQueueRequest {
    /// Owning namespace.
    pub namespace_id: String,
    /// Persistence name.
    pub task_queue: String,
    /// Kind of tasks.
    pub task_type: TaskType,
}

/// Metadata row contents.
#[derive(Debug, Clone)]
pub struct GetTaskQueueResponse {
    /// Current lease.
    pub range_id: i64,
    /// Decoded metadata.
    pub info: TaskQueueInfo,
}

/// Insert a new metadata row.
#[derive(Debug, Clone)]
pub struct CreateTaskQueueRequest {
    /// Initial lease.
    pub range_id: i64,
    /// Metadata to store; also identifies the row.
    pub info: TaskQueueInfo,
}

/// Conditionally overwrite a metadata row.
#[derive(Debug, Clone)]
pub struct UpdateTaskQueueRequest {
    /// Range id to store.
    pub range_id: i64,
    /// Range id the row must currently hold.
    pub prev_range_id: i64,
    /// Metadata to store; also identifies the row.
    pub info: TaskQueueInfo,
}

/// Insert a batch of tasks under the caller's lease.
#[derive(Debug, Clone)]
pub struct CreateTasksRequest {
    /// Range id the metadata row must currently hold.
    pub range_id: i64,
    /// Metadata written alongside the tasks by stores that support it.
    pub info: TaskQueueInfo,
    /// Tasks to insert.
    pub tasks: Vec<AllocatedTask>,
}

/// Outcome of a task batch insert.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateTasksResponse {
    /// Whether the store also persisted the queue metadata.
    pub updated_metadata: bool,
}

/// Range scan over one subqueue.
#[derive(Debug, Clone)]
pub struct GetTasksRequest {
    /// Owning namespace.
    pub namespace_id: String,
    /// Persistence name.
    pub task_queue: String,
    /// Kind of tasks.
    pub task_type: TaskType,
    /// Subqueue index.
    pub subqueue: usize,
    /// Lower bound on the pass (fair queues).
    pub inclusive_min_pass: i64,
    /// Lower bound on the task id within `inclusive_min_pass`.
    pub inclusive_min_task_id: i64,
    /// Upper bound on the task id.
    pub exclusive_max_task_id: i64,
    /// Maximum rows per page.
    pub page_size: usize,
    /// Return at most `page_size` rows and never a continuation token.
    pub use_limit: bool,
    /// Continuation token from a previous page.
    pub next_page_token: Option<Vec<u8>>,
}

/// One page of tasks.
#[derive(Debug, Clone, Default)]
pub struct GetTasksResponse {
    /// Tasks ordered by `(pass, task_id)`.
    pub tasks: Vec<AllocatedTask>,
    /// Opaque token for the next page, if any.
    pub next_page_token: Option<Vec<u8>>,
}

/// Best-effort bulk delete of completed tasks.
#[derive(Debug, Clone)]
pub struct CompleteTasksLessThanRequest {
    /// Owning namespace.
    pub namespace_id: String,
    /// Persistence name.
    pub task_queue: String,
    /// Kind of tasks.
    pub task_type: TaskType,
    /// Subqueue index.
    pub subqueue: usize,
    /// Exclusive upper bound on the pass (fair queues; 0 for FIFO).
    pub exclusive_max_pass: i64,
    /// Exclusive upper bound on the task id.
    pub exclusive_max_task_id: i64,
    /// Upper bound on deleted rows; stores may ignore it. 0 means unbounded.
    pub limit: usize,
}

/// Conditionally remove a queue's metadata row.
#[derive(Debug, Clone)]
pub struct DeleteTaskQueueRequest {
    /// Owning namespace.
    pub namespace_id: String,
    /// Persistence name.
    pub task_queue: String,
    /// Kind of tasks.
    pub task_type: TaskType,
    /// Range id the row must currently hold.
    pub range_id: i64,
}

/// Storage contract used by [`TaskQueueDb`](crate::db::TaskQueueDb).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a metadata row. Fails with `ConditionFailed` if a live row exists.
    async fn create_task_queue(&self, request: &CreateTaskQueueRequest)
    -> Result<(), TaskStoreError>;

    /// Read a metadata row. Fails with `NotFound` if there is none.
    async fn get_task_queue(
        &self,
        request: &GetTaskQueueRequest,
    ) -> Result<GetTaskQueueResponse, TaskStoreError>;

    /// Overwrite a metadata row if it still holds `prev_range_id`.
    async fn update_task_queue(&self, request: &UpdateTaskQueueRequest)
    -> Result<(), TaskStoreError>;

    /// Insert tasks, atomically checking that the lease is still `range_id`.
    async fn create_tasks(
        &self,
        request: &CreateTasksRequest,
    ) -> Result<CreateTasksResponse, TaskStoreError>;

    /// Read a page of tasks.
    async fn get_tasks(&self, request: &GetTasksRequest)
    -> Result<GetTasksResponse, TaskStoreError>;

    /// Delete tasks below the given bound.
    async fn complete_tasks_less_than(
        &self,
        request: &CompleteTasksLessThanRequest,
    ) -> Result<RowsAffected, TaskStoreError>;

    /// Delete a metadata row if it still holds `range_id`.
    async fn delete_task_queue(&self, request: &DeleteTaskQueueRequest)
    -> Result<(), TaskStoreError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
