// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity of a physical task queue partition.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix used for the persistence names of non-root partitions.
const RESERVED_PREFIX: &str = "/_sys/";

/// Kind of work a task queue carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Workflow tasks.
    Workflow,
    /// Activity tasks.
    Activity,
    /// Nexus operation tasks.
    Nexus,
}

impl TaskType {
    /// Stable numeric code used as part of the store key.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Workflow => 1,
            Self::Activity => 2,
            Self::Nexus => 3,
        }
    }
}

/// Whether a queue is long-lived or bound to a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskQueueKind {
    /// Regular queue, persisted indefinitely.
    Normal,
    /// Worker-affine queue whose metadata expires when unused.
    Sticky,
}

/// Key of one physical task queue partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalTaskQueueKey {
    /// Owning namespace.
    pub namespace_id: String,
    /// User-visible queue name.
    pub base_name: String,
    /// Partition index; partition 0 is the root.
    pub partition_id: u32,
    /// Kind of tasks in the queue.
    pub task_type: TaskType,
    /// Normal or sticky.
    pub kind: TaskQueueKind,
}

impl PhysicalTaskQueueKey {
    /// Key for the root partition of a normal queue.
    pub fn root(
        namespace_id: impl Into<String>,
        base_name: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            base_name: base_name.into(),
            partition_id: 0,
            task_type,
            kind: TaskQueueKind::Normal,
        }
    }

    /// Same queue, different partition.
    pub fn with_partition(mut self, partition_id: u32) -> Self {
        self.partition_id = partition_id;
        self
    }

    /// Same queue, different kind.
    pub fn with_kind(mut self, kind: TaskQueueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Name under which this partition is stored.
    pub fn persistence_name(&self) -> String {
        if self.partition_id == 0 {
            self.base_name.clone()
        } else {
            format!(
                "{}{}/{}",
                RESERVED_PREFIX, self.base_name, self.partition_id
            )
        }
    }
}

impl fmt::Display for PhysicalTaskQueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:?}",
            self.namespace_id,
            self.persistence_name(),
            self.task_type
        )
    }
}
