// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for taskbook-core integration tests.
//!
//! Provides an in-memory [`TaskStore`] with one-shot fault injection and a
//! record of every range id the store accepted, so tests can simulate
//! competing owners and flaky writes without a database.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use taskbook_core::config::TaskQueueConfig;
use taskbook_core::persistence::{
    AllocatedTask, CompleteTasksLessThanRequest, CreateTaskQueueRequest, CreateTasksRequest,
    CreateTasksResponse, DataBlob, DeleteTaskQueueRequest, GetTaskQueueRequest,
    GetTaskQueueResponse, GetTasksRequest, GetTasksResponse, RowsAffected, TaskInfo,
    TaskQueueInfo, TaskStore, UpdateTaskQueueRequest,
};
use taskbook_core::writer::NewTask;
use taskbook_core::{FairLevel, PhysicalTaskQueueKey, TaskQueueDb, TaskStoreError, TaskType};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateTaskQueue,
    GetTaskQueue,
    UpdateTaskQueue,
    CreateTasks,
    GetTasks,
    CompleteTasksLessThan,
}

/// How an injected failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject as if the range id had moved.
    ConditionFailed,
    /// Fail without applying the write.
    Unavailable,
    /// Apply the write, then report a transport failure.
    AppliedButUnavailable,
}

type QueueKey = (String, String, i32);

#[derive(Default)]
struct MemoryState {
    queues: HashMap<QueueKey, (i64, TaskQueueInfo)>,
    tasks: HashMap<QueueKey, BTreeMap<(usize, i64, i64), AllocatedTask>>,
    accepted_range_ids: HashMap<QueueKey, Vec<i64>>,
    duplicate_task_ids: Vec<(usize, i64)>,
    metadata_writes: usize,
    faults: HashMap<Op, VecDeque<Fault>>,
}

impl MemoryState {
    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn accept(&mut self, key: &QueueKey, range_id: i64, info: TaskQueueInfo) {
        self.queues.insert(key.clone(), (range_id, info));
        self.accepted_range_ids
            .entry(key.clone())
            .or_default()
            .push(range_id);
        self.metadata_writes += 1;
    }
}

fn fault_error(op: Op, fault: Fault) -> TaskStoreError {
    match fault {
        Fault::ConditionFailed => TaskStoreError::ConditionFailed(format!("injected on {:?}", op)),
        Fault::Unavailable | Fault::AppliedButUnavailable => TaskStoreError::Unavailable {
            operation: "injected",
            details: format!("injected on {:?}", op),
        },
    }
}

fn key_of(info: &TaskQueueInfo) -> QueueKey {
    (
        info.namespace_id.clone(),
        info.name.clone(),
        info.task_type.as_i32(),
    )
}

/// In-memory task store for tests.
#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
    updates_metadata_with_tasks: bool,
}

impl MemoryTaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store that persists metadata along with every task batch.
    pub fn updating_metadata_with_tasks() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::default(),
            updates_metadata_with_tasks: true,
        })
    }

    /// Make the next call of `op` fail with `fault`.
    pub fn inject(&self, op: Op, fault: Fault) {
        let mut state = self.state.lock().unwrap();
        state.faults.entry(op).or_default().push_back(fault);
    }

    /// Every range id the store accepted for a queue, in order.
    pub fn accepted_range_ids(&self, queue: &PhysicalTaskQueueKey) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .accepted_range_ids
            .get(&(
                queue.namespace_id.clone(),
                queue.persistence_name(),
                queue.task_type.as_i32(),
            ))
            .cloned()
            .unwrap_or_default()
    }

    /// Stored task ids of one subqueue, in `(pass, id)` order.
    pub fn task_ids(&self, queue: &PhysicalTaskQueueKey, subqueue: usize) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(&(
                queue.namespace_id.clone(),
                queue.persistence_name(),
                queue.task_type.as_i32(),
            ))
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| t.subqueue == subqueue)
                    .map(|t| t.task_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Task ids that were inserted more than once.
    pub fn duplicate_task_ids(&self) -> Vec<(usize, i64)> {
        self.state.lock().unwrap().duplicate_task_ids.clone()
    }

    /// Number of accepted metadata writes.
    pub fn metadata_writes(&self) -> usize {
        self.state.lock().unwrap().metadata_writes
    }

    /// Persisted metadata of a queue.
    pub fn persisted(&self, queue: &PhysicalTaskQueueKey) -> Option<(i64, TaskQueueInfo)> {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(&(
                queue.namespace_id.clone(),
                queue.persistence_name(),
                queue.task_type.as_i32(),
            ))
            .cloned()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task_queue(
        &self,
        request: &CreateTaskQueueRequest,
    ) -> Result<(), TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        let fault = state.take_fault(Op::CreateTaskQueue);
        if let Some(f @ (Fault::ConditionFailed | Fault::Unavailable)) = fault {
            return Err(fault_error(Op::CreateTaskQueue, f));
        }

        let key = key_of(&request.info);
        if let Some((range_id, _)) = state.queues.get(&key) {
            return Err(TaskStoreError::ConditionFailed(format!(
                "queue exists with range id {}",
                range_id
            )));
        }
        state.accept(&key, request.range_id, request.info.clone());

        match fault {
            Some(f) => Err(fault_error(Op::CreateTaskQueue, f)),
            None => Ok(()),
        }
    }

    async fn get_task_queue(
        &self,
        request: &GetTaskQueueRequest,
    ) -> Result<GetTaskQueueResponse, TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(f) = state.take_fault(Op::GetTaskQueue) {
            return Err(fault_error(Op::GetTaskQueue, f));
        }

        let key = (
            request.namespace_id.clone(),
            request.task_queue.clone(),
            request.task_type.as_i32(),
        );
        state
            .queues
            .get(&key)
            .map(|(range_id, info)| GetTaskQueueResponse {
                range_id: *range_id,
                info: info.clone(),
            })
            .ok_or_else(|| TaskStoreError::NotFound(request.task_queue.clone()))
    }

    async fn update_task_queue(
        &self,
        request: &UpdateTaskQueueRequest,
    ) -> Result<(), TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        let fault = state.take_fault(Op::UpdateTaskQueue);
        if let Some(f @ (Fault::ConditionFailed | Fault::Unavailable)) = fault {
            return Err(fault_error(Op::UpdateTaskQueue, f));
        }

        let key = key_of(&request.info);
        match state.queues.get(&key) {
            Some((current, _)) if *current == request.prev_range_id => {}
            other => {
                return Err(TaskStoreError::ConditionFailed(format!(
                    "expected range id {} but found {:?}",
                    request.prev_range_id,
                    other.map(|(range_id, _)| *range_id)
                )));
            }
        }
        state.accept(&key, request.range_id, request.info.clone());

        match fault {
            Some(f) => Err(fault_error(Op::UpdateTaskQueue, f)),
            None => Ok(()),
        }
    }

    async fn create_tasks(
        &self,
        request: &CreateTasksRequest,
    ) -> Result<CreateTasksResponse, TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        let fault = state.take_fault(Op::CreateTasks);
        if let Some(f @ (Fault::ConditionFailed | Fault::Unavailable)) = fault {
            return Err(fault_error(Op::CreateTasks, f));
        }

        let key = key_of(&request.info);
        match state.queues.get(&key) {
            Some((current, _)) if *current == request.range_id => {}
            other => {
                return Err(TaskStoreError::ConditionFailed(format!(
                    "expected range id {} but found {:?}",
                    request.range_id,
                    other.map(|(range_id, _)| *range_id)
                )));
            }
        }

        if self.updates_metadata_with_tasks {
            let range_id = request.range_id;
            state.queues.insert(key.clone(), (range_id, request.info.clone()));
            state.metadata_writes += 1;
        }

        let mut duplicates = Vec::new();
        let tasks = state.tasks.entry(key).or_default();
        for task in &request.tasks {
            let slot = (task.subqueue, task.pass, task.task_id);
            if tasks.insert(slot, task.clone()).is_some() {
                duplicates.push((task.subqueue, task.task_id));
            }
        }
        state.duplicate_task_ids.extend(duplicates);

        match fault {
            Some(f) => Err(fault_error(Op::CreateTasks, f)),
            None => Ok(CreateTasksResponse {
                updated_metadata: self.updates_metadata_with_tasks,
            }),
        }
    }

    async fn get_tasks(
        &self,
        request: &GetTasksRequest,
    ) -> Result<GetTasksResponse, TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(f) = state.take_fault(Op::GetTasks) {
            return Err(fault_error(Op::GetTasks, f));
        }

        let key = (
            request.namespace_id.clone(),
            request.task_queue.clone(),
            request.task_type.as_i32(),
        );
        let lower = FairLevel::new(request.inclusive_min_pass, request.inclusive_min_task_id);
        let tasks = state
            .tasks
            .get(&key)
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| t.subqueue == request.subqueue)
                    .filter(|t| t.fair_level() >= lower && t.task_id < request.exclusive_max_task_id)
                    .take(request.page_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(GetTasksResponse {
            tasks,
            next_page_token: None,
        })
    }

    async fn complete_tasks_less_than(
        &self,
        request: &CompleteTasksLessThanRequest,
    ) -> Result<RowsAffected, TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(f) = state.take_fault(Op::CompleteTasksLessThan) {
            return Err(fault_error(Op::CompleteTasksLessThan, f));
        }

        let key = (
            request.namespace_id.clone(),
            request.task_queue.clone(),
            request.task_type.as_i32(),
        );
        let bound = FairLevel::new(request.exclusive_max_pass, request.exclusive_max_task_id);
        if let Some(tasks) = state.tasks.get_mut(&key) {
            tasks.retain(|_, t| t.subqueue != request.subqueue || t.fair_level() >= bound);
        }
        // Mirrors stores that cannot count deleted rows.
        Ok(RowsAffected::Unknown)
    }

    async fn delete_task_queue(
        &self,
        request: &DeleteTaskQueueRequest,
    ) -> Result<(), TaskStoreError> {
        let mut state = self.state.lock().unwrap();
        let key = (
            request.namespace_id.clone(),
            request.task_queue.clone(),
            request.task_type.as_i32(),
        );
        match state.queues.get(&key) {
            Some((current, _)) if *current == request.range_id => {
                state.queues.remove(&key);
                Ok(())
            }
            _ => Err(TaskStoreError::ConditionFailed(
                "range id mismatch".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Small id blocks so tests cross block boundaries quickly.
pub fn test_config() -> TaskQueueConfig {
    TaskQueueConfig {
        range_size: 10,
        priority_levels: 5,
    }
}

pub fn orders_queue() -> PhysicalTaskQueueKey {
    PhysicalTaskQueueKey::root("ns", "orders", TaskType::Activity)
}

pub fn db_on(store: &Arc<MemoryTaskStore>) -> Arc<TaskQueueDb> {
    Arc::new(TaskQueueDb::new(test_config(), store.clone(), orders_queue()))
}

pub fn new_task(subqueue: usize) -> NewTask {
    NewTask {
        subqueue,
        pass: 0,
        info: task_info("payload"),
    }
}

pub fn task_info(payload: &str) -> TaskInfo {
    TaskInfo {
        data: DataBlob::new(payload, "raw"),
        create_time: Utc::now(),
        expiry_time: None,
    }
}
