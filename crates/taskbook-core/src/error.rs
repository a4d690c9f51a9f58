// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for taskbook-core.
//!
//! [`TaskStoreError`] is what a [`TaskStore`](crate::persistence::TaskStore)
//! backend reports. It keeps the "condition failed" outcome of a conditional
//! write separate from transport and decoding failures, because callers treat
//! a lost lease very differently from a flaky connection.

use thiserror::Error;

/// Result type using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by a task store backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskStoreError {
    /// A conditional write was rejected because the expected range id no longer matches.
    #[error("Condition failed: {0}")]
    ConditionFailed(String),

    /// The requested task queue does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store could not be reached or timed out.
    #[error("Store unavailable during '{operation}': {details}")]
    Unavailable {
        /// The operation that failed.
        operation: &'static str,
        /// Error details.
        details: String,
    },

    /// A row returned by the store is missing a required field.
    #[error("Field '{field}' not found in persisted row")]
    FieldNotFound {
        /// Name of the missing field.
        field: String,
    },

    /// A row field holds a value of an unexpected type.
    #[error("Field '{field}' has unexpected type, expected {expected}: {details}")]
    TypeMismatch {
        /// Name of the field.
        field: String,
        /// The Rust type the field was decoded into.
        expected: &'static str,
        /// Decoder details.
        details: String,
    },

    /// Any other database failure.
    #[error("Database error during '{operation}': {source}")]
    Database {
        /// The operation that failed.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Metadata blob could not be encoded or decoded.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The store detected an inconsistency it cannot recover from.
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl TaskStoreError {
    /// Convert a driver error, classifying connectivity problems as unavailable.
    pub fn from_sqlx(operation: &'static str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable {
                    operation,
                    details: err.to_string(),
                }
            }
            other => Self::Database {
                operation,
                source: other,
            },
        }
    }

    /// Whether this is the distinguished conditional-write rejection.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed(_))
    }

    /// Whether the same request may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors returned by the task queue database and writer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] TaskStoreError),

    /// A request referenced a subqueue index that was never allocated.
    #[error("Subqueue {0} does not exist")]
    UnknownSubqueue(usize),

    /// In-memory state does not match what the caller expected.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether the underlying store rejected a conditional write (lease lost).
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_condition_failed())
    }

    /// Whether the underlying store reported a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(TaskStoreError::NotFound(_)))
    }
}
