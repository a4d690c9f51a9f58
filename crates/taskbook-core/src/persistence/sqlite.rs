// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed task store.
//!
//! Conditional writes are plain `UPDATE ... WHERE range_id = ?` statements;
//! a statement that touches zero rows is a rejected condition. Metadata is
//! stored as a JSON blob next to its encoding tag so the layout can evolve
//! without schema changes.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};

use crate::error::TaskStoreError;
use crate::fair_level::FairLevel;
use crate::queue::{TaskQueueKind, TaskType};

use super::{
    AllocatedTask, CompleteTasksLessThanRequest, CreateTaskQueueRequest, CreateTasksRequest,
    CreateTasksResponse, DataBlob, DeleteTaskQueueRequest, ENCODING_JSON, GetTaskQueueRequest,
    GetTaskQueueResponse, GetTasksRequest, GetTasksResponse, RowsAffected, TaskInfo,
    TaskQueueInfo, TaskStore, UpdateTaskQueueRequest, typed_field,
};

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a store from an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and apply migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TaskStoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                TaskStoreError::Internal(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Connect to `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self, TaskStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| TaskStoreError::from_sqlx("connect", e))?;

        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| TaskStoreError::Internal(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_range_id(
        &self,
        namespace_id: &str,
        task_queue: &str,
        task_type: TaskType,
    ) -> Result<Option<i64>, TaskStoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT range_id FROM task_queues
            WHERE namespace_id = ?1 AND task_queue_name = ?2 AND task_queue_type = ?3
            "#,
        )
        .bind(namespace_id)
        .bind(task_queue)
        .bind(task_type.as_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("GetRangeID", e))?;

        Ok(row.map(|(range_id,)| range_id))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn encode_info(info: &TaskQueueInfo) -> Result<Vec<u8>, TaskStoreError> {
    Ok(serde_json::to_vec(info)?)
}

fn decode_info(data: &[u8], encoding: &str) -> Result<TaskQueueInfo, TaskStoreError> {
    if encoding != ENCODING_JSON {
        return Err(TaskStoreError::Internal(format!(
            "unsupported task queue encoding '{}'",
            encoding
        )));
    }
    Ok(serde_json::from_slice(data)?)
}

/// Expiry column value for a metadata row.
fn metadata_expiry_ms(info: &TaskQueueInfo) -> Result<Option<i64>, TaskStoreError> {
    match (info.kind, info.expiry_time) {
        (TaskQueueKind::Sticky, None) => Err(TaskStoreError::Internal(
            "expiry time cannot be empty for sticky task queue".to_string(),
        )),
        (TaskQueueKind::Sticky, Some(expiry)) => Ok(Some(expiry.timestamp_millis())),
        (TaskQueueKind::Normal, _) => Ok(None),
    }
}

fn millis_to_time(field: &str, millis: i64) -> Result<DateTime<Utc>, TaskStoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        TaskStoreError::Internal(format!("field '{}' holds invalid timestamp {}", field, millis))
    })
}

fn task_from_row(row: &SqliteRow) -> Result<AllocatedTask, TaskStoreError> {
    let subqueue: i64 = typed_field(row, "subqueue")?;
    let pass: i64 = typed_field(row, "pass")?;
    let task_id: i64 = typed_field(row, "task_id")?;
    let data: Vec<u8> = typed_field(row, "task")?;
    let encoding: String = typed_field(row, "task_encoding")?;
    let create_ms: i64 = typed_field(row, "create_ms")?;
    let expiry_ms: Option<i64> = typed_field(row, "expiry_ms")?;

    Ok(AllocatedTask {
        task_id,
        pass,
        subqueue: usize::try_from(subqueue).map_err(|_| {
            TaskStoreError::Internal(format!("negative subqueue {} in task row", subqueue))
        })?,
        info: TaskInfo {
            data: DataBlob { data, encoding },
            create_time: millis_to_time("create_ms", create_ms)?,
            expiry_time: expiry_ms
                .map(|ms| millis_to_time("expiry_ms", ms))
                .transpose()?,
        },
    })
}

const PAGE_TOKEN_LEN: usize = 16;

/// LIMIT bound for a row count. Saturates, since a negative LIMIT is unbounded.
fn sql_limit(rows: usize) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}

fn encode_page_token(level: FairLevel) -> Vec<u8> {
    let mut token = Vec::with_capacity(PAGE_TOKEN_LEN);
    token.extend_from_slice(&level.pass.to_be_bytes());
    token.extend_from_slice(&level.id.to_be_bytes());
    token
}

fn decode_page_token(token: &[u8]) -> Result<FairLevel, TaskStoreError> {
    if token.len() != PAGE_TOKEN_LEN {
        return Err(TaskStoreError::Internal(format!(
            "malformed task page token of {} bytes",
            token.len()
        )));
    }
    let mut pass = [0u8; 8];
    let mut id = [0u8; 8];
    pass.copy_from_slice(&token[..8]);
    id.copy_from_slice(&token[8..]);
    Ok(FairLevel::new(i64::from_be_bytes(pass), i64::from_be_bytes(id)))
}

#[async_trait::async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task_queue(
        &self,
        request: &CreateTaskQueueRequest,
    ) -> Result<(), TaskStoreError> {
        let info = &request.info;
        let data = encode_info(info)?;
        let expiry_ms = metadata_expiry_ms(info)?;

        // An expired row counts as absent, so it may be overwritten.
        let result = sqlx::query(
            r#"
            INSERT INTO task_queues (
                namespace_id, task_queue_name, task_queue_type,
                range_id, task_queue, task_queue_encoding, expiry_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (namespace_id, task_queue_name, task_queue_type) DO UPDATE SET
                range_id = excluded.range_id,
                task_queue = excluded.task_queue,
                task_queue_encoding = excluded.task_queue_encoding,
                expiry_ms = excluded.expiry_ms
            WHERE task_queues.expiry_ms IS NOT NULL AND task_queues.expiry_ms <= ?8
            "#,
        )
        .bind(&info.namespace_id)
        .bind(&info.name)
        .bind(info.task_type.as_i32())
        .bind(request.range_id)
        .bind(data)
        .bind(ENCODING_JSON)
        .bind(expiry_ms)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("CreateTaskQueue", e))?;

        if result.rows_affected() == 0 {
            let previous = self
                .current_range_id(&info.namespace_id, &info.name, info.task_type)
                .await?;
            return Err(TaskStoreError::ConditionFailed(format!(
                "CreateTaskQueue: TaskQueue:{}, TaskQueueType:{:?}, PreviousRangeID:{:?}",
                info.name, info.task_type, previous
            )));
        }

        Ok(())
    }

    async fn get_task_queue(
        &self,
        request: &GetTaskQueueRequest,
    ) -> Result<GetTaskQueueResponse, TaskStoreError> {
        let row = sqlx::query(
            r#"
            SELECT range_id, task_queue, task_queue_encoding
            FROM task_queues
            WHERE namespace_id = ?1 AND task_queue_name = ?2 AND task_queue_type = ?3
              AND (expiry_ms IS NULL OR expiry_ms > ?4)
            "#,
        )
        .bind(&request.namespace_id)
        .bind(&request.task_queue)
        .bind(request.task_type.as_i32())
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("GetTaskQueue", e))?;

        let Some(row) = row else {
            return Err(TaskStoreError::NotFound(format!(
                "task queue {} ({:?}) in namespace {}",
                request.task_queue, request.task_type, request.namespace_id
            )));
        };

        let range_id: i64 = typed_field(&row, "range_id")?;
        let data: Vec<u8> = typed_field(&row, "task_queue")?;
        let encoding: String = typed_field(&row, "task_queue_encoding")?;

        Ok(GetTaskQueueResponse {
            range_id,
            info: decode_info(&data, &encoding)?,
        })
    }

    async fn update_task_queue(
        &self,
        request: &UpdateTaskQueueRequest,
    ) -> Result<(), TaskStoreError> {
        let info = &request.info;
        let data = encode_info(info)?;
        let expiry_ms = metadata_expiry_ms(info)?;

        let result = sqlx::query(
            r#"
            UPDATE task_queues
            SET range_id = ?1, task_queue = ?2, task_queue_encoding = ?3, expiry_ms = ?4
            WHERE namespace_id = ?5 AND task_queue_name = ?6 AND task_queue_type = ?7
              AND range_id = ?8
              AND (expiry_ms IS NULL OR expiry_ms > ?9)
            "#,
        )
        .bind(request.range_id)
        .bind(data)
        .bind(ENCODING_JSON)
        .bind(expiry_ms)
        .bind(&info.namespace_id)
        .bind(&info.name)
        .bind(info.task_type.as_i32())
        .bind(request.prev_range_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("UpdateTaskQueue", e))?;

        if result.rows_affected() == 0 {
            let previous = self
                .current_range_id(&info.namespace_id, &info.name, info.task_type)
                .await?;
            return Err(TaskStoreError::ConditionFailed(format!(
                "Failed to update task queue. name: {}, type: {:?}, rangeID: {}, prevRangeID: {}, db rangeID: {:?}",
                info.name, info.task_type, request.range_id, request.prev_range_id, previous
            )));
        }

        Ok(())
    }

    async fn create_tasks(
        &self,
        request: &CreateTasksRequest,
    ) -> Result<CreateTasksResponse, TaskStoreError> {
        let info = &request.info;
        let data = encode_info(info)?;
        let expiry_ms = metadata_expiry_ms(info)?;
        let now = now_ms();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TaskStoreError::from_sqlx("CreateTasks", e))?;

        // Range check first: tasks are only inserted while the lease is ours.
        let result = sqlx::query(
            r#"
            UPDATE task_queues
            SET task_queue = ?1, task_queue_encoding = ?2, expiry_ms = ?3
            WHERE namespace_id = ?4 AND task_queue_name = ?5 AND task_queue_type = ?6
              AND range_id = ?7
              AND (expiry_ms IS NULL OR expiry_ms > ?8)
            "#,
        )
        .bind(data)
        .bind(ENCODING_JSON)
        .bind(expiry_ms)
        .bind(&info.namespace_id)
        .bind(&info.name)
        .bind(info.task_type.as_i32())
        .bind(request.range_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("CreateTasks", e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| TaskStoreError::from_sqlx("CreateTasks", e))?;
            let previous = self
                .current_range_id(&info.namespace_id, &info.name, info.task_type)
                .await?;
            return Err(TaskStoreError::ConditionFailed(format!(
                "Failed to create task. TaskQueue: {}, taskQueueType: {:?}, rangeID: {}, db rangeID: {:?}",
                info.name, info.task_type, request.range_id, previous
            )));
        }

        for task in &request.tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (
                    namespace_id, task_queue_name, task_queue_type, subqueue, pass,
                    task_id, task, task_encoding, create_ms, expiry_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&info.namespace_id)
            .bind(&info.name)
            .bind(info.task_type.as_i32())
            .bind(task.subqueue as i64)
            .bind(task.pass)
            .bind(task.task_id)
            .bind(&task.info.data.data)
            .bind(&task.info.data.encoding)
            .bind(task.info.create_time.timestamp_millis())
            .bind(task.info.expiry_time.map(|t| t.timestamp_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| TaskStoreError::from_sqlx("CreateTasks", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| TaskStoreError::from_sqlx("CreateTasks", e))?;

        Ok(CreateTasksResponse {
            updated_metadata: true,
        })
    }

    async fn get_tasks(
        &self,
        request: &GetTasksRequest,
    ) -> Result<GetTasksResponse, TaskStoreError> {
        let lower = match &request.next_page_token {
            Some(token) => decode_page_token(token)?.inc(),
            None => FairLevel::new(request.inclusive_min_pass, request.inclusive_min_task_id),
        };

        let rows = sqlx::query(
            r#"
            SELECT subqueue, pass, task_id, task, task_encoding, create_ms, expiry_ms
            FROM tasks
            WHERE namespace_id = ?1 AND task_queue_name = ?2 AND task_queue_type = ?3
              AND subqueue = ?4
              AND (pass, task_id) >= (?5, ?6)
              AND task_id < ?7
              AND (expiry_ms IS NULL OR expiry_ms > ?8)
            ORDER BY pass, task_id
            LIMIT ?9
            "#,
        )
        .bind(&request.namespace_id)
        .bind(&request.task_queue)
        .bind(request.task_type.as_i32())
        .bind(request.subqueue as i64)
        .bind(lower.pass)
        .bind(lower.id)
        .bind(request.exclusive_max_task_id)
        .bind(now_ms())
        .bind(sql_limit(request.page_size))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("GetTasks", e))?;

        let tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let next_page_token = match tasks.last() {
            Some(last) if !request.use_limit && tasks.len() == request.page_size => {
                Some(encode_page_token(last.fair_level()))
            }
            _ => None,
        };

        Ok(GetTasksResponse {
            tasks,
            next_page_token,
        })
    }

    async fn complete_tasks_less_than(
        &self,
        request: &CompleteTasksLessThanRequest,
    ) -> Result<RowsAffected, TaskStoreError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = if request.limit == 0 {
            -1
        } else {
            sql_limit(request.limit)
        };

        let result = sqlx::query(
            r#"
            DELETE FROM tasks WHERE rowid IN (
                SELECT rowid FROM tasks
                WHERE namespace_id = ?1 AND task_queue_name = ?2 AND task_queue_type = ?3
                  AND subqueue = ?4
                  AND (pass, task_id) < (?5, ?6)
                ORDER BY pass, task_id
                LIMIT ?7
            )
            "#,
        )
        .bind(&request.namespace_id)
        .bind(&request.task_queue)
        .bind(request.task_type.as_i32())
        .bind(request.subqueue as i64)
        .bind(request.exclusive_max_pass)
        .bind(request.exclusive_max_task_id)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("CompleteTasksLessThan", e))?;

        Ok(RowsAffected::Exact(result.rows_affected()))
    }

    async fn delete_task_queue(
        &self,
        request: &DeleteTaskQueueRequest,
    ) -> Result<(), TaskStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM task_queues
            WHERE namespace_id = ?1 AND task_queue_name = ?2 AND task_queue_type = ?3
              AND range_id = ?4
            "#,
        )
        .bind(&request.namespace_id)
        .bind(&request.task_queue)
        .bind(request.task_type.as_i32())
        .bind(request.range_id)
        .execute(&self.pool)
        .await
        .map_err(|e| TaskStoreError::from_sqlx("DeleteTaskQueue", e))?;

        if result.rows_affected() == 0 {
            let previous = self
                .current_range_id(&request.namespace_id, &request.task_queue, request.task_type)
                .await?;
            return Err(TaskStoreError::ConditionFailed(format!(
                "DeleteTaskQueue operation failed: expected_range_id={} but found {:?}",
                request.range_id, previous
            )));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
