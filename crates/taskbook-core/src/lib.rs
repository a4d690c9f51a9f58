// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskbook Core - Task Queue Persistence
//!
//! This crate keeps the persisted state of task queue partitions: who owns a
//! partition (the lease), which task ids that owner may hand out, and how much
//! work is waiting in each subqueue. State lives in a pluggable [`TaskStore`];
//! SQLite is the bundled backend.
//!
//! # Architecture
//!
//! ```text
//!  TaskWriter ──ids──► TaskQueueDb ◄── SyncLoop
//!                          │
//!              conditional writes on range id
//!                          ▼
//!                   dyn TaskStore (SQLite)
//! ```
//!
//! # Leases
//!
//! Every metadata write is a compare-and-swap on the partition's range id.
//! Taking a partition over bumps the range id, so the previous owner's next
//! write fails with a condition-failed error and it must let go. Each range id
//! owns a disjoint block of task ids (see [`id_block`]), so two owners never
//! issue the same id.
//!
//! # Backlog Accounting
//!
//! | Event | Effect on approximate count |
//! |-------|-----------------------------|
//! | Tasks written | `+n` before the store call |
//! | Write rejected by lease check | `-n` (tasks did not land) |
//! | Any other write failure | kept (may overcount) |
//! | Reader acks up to max read level | reset to 0 |
//! | Negative delta below zero | clamped to 0 |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TASKBOOK_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `TASKBOOK_NAMESPACE_ID` | No | `default` | Namespace of kept queues |
//! | `TASKBOOK_TASK_QUEUES` | No | - | Comma separated queue names |
//! | `TASKBOOK_SYNC_INTERVAL_SECS` | No | `60` | Metadata sync interval |
//! | `TASKBOOK_RANGE_SIZE` | No | `100000` | Task ids per lease |
//! | `TASKBOOK_PRIORITY_LEVELS` | No | `5` | Priority levels |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Task queue database: lease, subqueues and backlog bookkeeping.
pub mod db;

/// Error types for the store and the database.
pub mod error;

/// Fair ordering key `(pass, id)`.
pub mod fair_level;

/// Task id blocks derived from range ids.
pub mod id_block;

/// Embedded SQL migrations.
pub mod migrations;

/// Task store contract and the SQLite backend.
pub mod persistence;

/// Physical task queue identity.
pub mod queue;

/// Injectable hook for soft invariant violations.
pub mod softassert;

/// In-memory subqueue state.
pub mod subqueue;

/// Periodic metadata sync loop.
pub mod sync;

/// Task id allocation and batched writes.
pub mod writer;

pub use db::{TaskQueueDb, TaskQueueState, WriteTaskRequest};
pub use error::{Error, Result, TaskStoreError};
pub use fair_level::FairLevel;
pub use persistence::{SqliteTaskStore, TaskStore};
pub use queue::{PhysicalTaskQueueKey, TaskQueueKind, TaskType};
pub use writer::TaskWriter;
