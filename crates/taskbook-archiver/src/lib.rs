// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskbook Archiver - Workflow History Archival
//!
//! Moves closed workflow histories into blob storage and reads them back.
//!
//! # Architecture
//!
//! ```text
//!  HistorySource ──batches──► HistoryIterator ──blobs──► HistoryArchiver
//!                                                          │      ▲
//!                                         parts + progress │      │ Get (token)
//!                                                          ▼      │
//!                                                  dyn ArchivalStore (files)
//! ```
//!
//! # Storage Layout
//!
//! Parts of one run share a prefix built from hashes of its identifiers, so
//! all parts of a run can be listed without an index:
//!
//! ```text
//! <root>/<uri host>/<uri path>/<prefix>_<closeFailoverVersion>_<part>.history
//! ```
//!
//! # Failure Classes
//!
//! | Failure | Write path | Read path |
//! |---------|------------|-----------|
//! | Invalid URI or request | not retryable | invalid argument |
//! | History mutated | not retryable | - |
//! | Corrupt token | - | invalid argument |
//! | Store unreachable | retryable | unavailable |
//! | History already gone | success (duplicate) | not found |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TASKBOOK_ARCHIVAL_ROOT` | Yes | - | Root directory of the file store |
//! | `TASKBOOK_ARCHIVAL_SCHEME` | No | `file` | URI scheme served |
//! | `TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE` | No | `2097152` | Part size target in bytes |
//! | `TASKBOOK_ARCHIVAL_HISTORY_PAGE_SIZE` | No | `250` | History page size |

#![deny(missing_docs)]

/// History archiver (write and read paths).
pub mod archiver;

/// JSON encoding of history parts.
pub mod codec;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types.
pub mod error;

/// Part file naming.
pub mod filename;

/// History events, blobs and requests.
pub mod history;

/// History iterators and sources.
pub mod iterator;

/// Progress tracking and archive options.
pub mod progress;

/// Archival blob stores.
pub mod store;

/// Read path continuation token.
pub mod token;

/// Archival URIs.
pub mod uri;

pub use archiver::{ArchiveOutcome, HistoryArchiver};
pub use config::ArchiverConfig;
pub use error::{ArchiveError, ServiceError};
pub use history::{
    ArchiveHistoryRequest, GetHistoryRequest, GetHistoryResponse, History, HistoryBlob,
    HistoryEvent,
};
pub use iterator::{BatchedHistoryIteratorFactory, HistoryIterator, HistorySource};
pub use progress::{ArchiveOptions, ArchiveProgress, MemoryProgressManager, ProgressManager};
pub use store::{ArchivalStore, FileArchivalStore};
pub use uri::ArchiveUri;
