// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordering key for fairness-aware task queues.
//!
//! A fair queue does not read tasks in plain id order. Each task carries a
//! `pass` chosen by the writer, and the reader walks tasks by `(pass, id)`.
//! Ack levels and read levels of fair subqueues are expressed in the same
//! pair so comparisons stay consistent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a fair subqueue, ordered by `pass` and then by `id`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FairLevel {
    /// Fairness pass the task was scheduled in.
    pub pass: i64,
    /// Task id, breaking ties within a pass.
    pub id: i64,
}

impl FairLevel {
    /// Create a level from its parts.
    pub const fn new(pass: i64, id: i64) -> Self {
        Self { pass, id }
    }

    /// Read a persisted level; an absent level is the zero level.
    pub fn from_persisted(level: Option<FairLevel>) -> Self {
        level.unwrap_or_default()
    }

    /// The smallest level strictly greater than `self` within the same pass.
    pub fn inc(self) -> Self {
        Self {
            pass: self.pass,
            id: self.id + 1,
        }
    }

    /// Whether `self` sorts before `other`.
    pub fn less(self, other: Self) -> bool {
        self < other
    }
}

impl fmt::Display for FairLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{},{}>", self.pass, self.id)
    }
}
