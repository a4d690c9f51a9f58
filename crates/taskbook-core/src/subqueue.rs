// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory mirror of one subqueue's persisted bookkeeping.

use chrono::{DateTime, Utc};

use crate::fair_level::FairLevel;
use crate::persistence::{SubqueueInfo, SubqueueKey};

/// Priority of the subqueue every queue is guaranteed to have.
pub fn default_priority_level(priority_levels: u32) -> u32 {
    priority_levels.div_ceil(2)
}

/// One subqueue as held by [`TaskQueueDb`](crate::db::TaskQueueDb).
///
/// `info` is what gets persisted; `max_read_level` and `oldest_time` only
/// live in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSubqueue {
    /// Persisted part.
    pub info: SubqueueInfo,
    /// Highest FIFO task id known to have been written.
    pub max_read_level: i64,
    /// Creation time of the oldest backlogged task, if any.
    pub oldest_time: Option<DateTime<Utc>>,
}

/// Result of applying a backlog delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogUpdate {
    /// The delta was applied as given.
    Applied,
    /// The delta would have made the count negative; it was clamped to zero.
    Clamped,
}

impl DbSubqueue {
    /// A fresh subqueue whose ack and read levels sit at `init_level`.
    pub fn new(key: SubqueueKey, init_level: i64) -> Self {
        Self {
            info: SubqueueInfo {
                key,
                ack_level: init_level,
                approximate_backlog_count: 0,
                fair_ack_level: None,
                fair_max_read_level: None,
            },
            max_read_level: init_level,
            oldest_time: None,
        }
    }

    /// Wrap persisted info; the read level is unknown until a lease is taken.
    pub fn from_info(info: SubqueueInfo) -> Self {
        Self {
            info,
            max_read_level: 0,
            oldest_time: None,
        }
    }

    /// Persisted fair ack level, zero when absent.
    pub fn fair_ack_level(&self) -> FairLevel {
        FairLevel::from_persisted(self.info.fair_ack_level)
    }

    /// Persisted fair max read level, zero when absent.
    pub fn fair_max_read_level(&self) -> FairLevel {
        FairLevel::from_persisted(self.info.fair_max_read_level)
    }

    /// Raise the fair max read level to at least `level`.
    pub fn raise_fair_max_read_level(&mut self, level: FairLevel) {
        self.info.fair_max_read_level = Some(self.fair_max_read_level().max(level));
    }

    /// Add `delta` to the backlog count, never letting it drop below zero.
    pub fn apply_backlog_delta(
        &mut self,
        delta: i64,
        oldest_time: Option<DateTime<Utc>>,
    ) -> BacklogUpdate {
        let count = &mut self.info.approximate_backlog_count;
        let update = if *count + delta < 0 {
            *count = 0;
            BacklogUpdate::Clamped
        } else {
            *count += delta;
            BacklogUpdate::Applied
        };
        self.oldest_time = oldest_time;
        update
    }

    /// Set the backlog to an authoritative value.
    pub fn reset_backlog(&mut self, count: i64, oldest_time: Option<DateTime<Utc>>) {
        self.info.approximate_backlog_count = count;
        self.oldest_time = oldest_time;
    }

    /// Estimated distance between what was written and what was acknowledged.
    pub fn lag(&self) -> i64 {
        match (self.info.fair_max_read_level, self.info.fair_ack_level) {
            (Some(max_read), Some(ack)) => max_read.id - ack.id,
            _ => self.max_read_level - self.info.ack_level,
        }
    }
}
