// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task id reservation derived from the partition lease.
//!
//! Every range id owns a fixed, contiguous block of task ids. Because range
//! ids only move forward and each one is held by a single writer at a time,
//! two owners can never hand out the same task id.

/// An inclusive block of task ids, `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIdBlock {
    /// Next id to hand out.
    pub start: i64,
    /// Last id belonging to the block.
    pub end: i64,
}

impl TaskIdBlock {
    /// Whether every id in the block has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.start > self.end
    }
}

/// The id block owned by `range_id`.
pub fn range_id_to_task_id_block(range_id: i64, range_size: i64) -> TaskIdBlock {
    TaskIdBlock {
        start: (range_id - 1) * range_size + 1,
        end: range_id * range_size,
    }
}
