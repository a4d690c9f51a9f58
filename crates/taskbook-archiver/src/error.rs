// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for taskbook-archiver.
//!
//! The write path reports [`ArchiveError`], which an outer retrier inspects
//! through [`ArchiveError::is_retryable`]. The read path reports
//! [`ServiceError`], one of four client-facing classes.

use thiserror::Error;

/// Errors raised while validating an archival URI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    /// The URI could not be parsed.
    #[error("invalid URI '{uri}': {details}")]
    Parse {
        /// The rejected input.
        uri: String,
        /// Parser details.
        details: String,
    },

    /// The URI scheme is not the one this archiver serves.
    #[error("URI scheme does not match: expected '{expected}', got '{actual}'")]
    SchemeMismatch {
        /// Scheme the archiver is registered for.
        expected: String,
        /// Scheme found in the URI.
        actual: String,
    },

    /// Host or path is empty.
    #[error("URI must have a non-empty host and path: {0}")]
    Incomplete(String),

    /// The destination root could not be probed.
    #[error("URI destination is not accessible: {0}")]
    Inaccessible(String),
}

/// Errors reported by an [`ArchivalStore`](crate::store::ArchivalStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or transport failure.
    #[error("Archival store I/O error during '{operation}' on {target}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Object or directory the operation addressed.
        target: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The object name cannot be stored under the URI.
    #[error("Invalid object name '{0}'")]
    InvalidName(String),
}

/// Errors reported by a [`HistorySource`](crate::iterator::HistorySource).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The workflow history no longer exists.
    #[error("History not found: {0}")]
    NotFound(String),

    /// The source is temporarily unavailable.
    #[error("History source unavailable: {0}")]
    Unavailable(String),

    /// Any other source failure. Retrying will not help.
    #[error("History source error: {0}")]
    Other(String),
}

impl SourceError {
    /// Whether the same read may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failure of a [`ProgressManager`](crate::progress::ProgressManager).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Progress error: {0}")]
pub struct ProgressError(pub String);

/// Errors returned by [`HistoryArchiver::archive`](crate::archiver::HistoryArchiver::archive).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// Destination URI rejected.
    #[error("Invalid archival URI: {0}")]
    InvalidUri(#[from] UriError),

    /// The archive request is missing required fields.
    #[error("Invalid archive request: {0}")]
    InvalidRequest(String),

    /// The archiver was built without a history iterator factory.
    #[error("No history source configured")]
    NoHistorySource,

    /// The history changed after the archive request was issued.
    #[error("History was mutated during archival")]
    HistoryMutated,

    /// History batches could not be encoded.
    #[error("Failed to encode history batches: {0}")]
    Encode(#[source] serde_json::Error),

    /// Reading the history failed.
    #[error("Failed to read history: {0}")]
    ReadHistory(#[source] SourceError),

    /// Writing a history part failed.
    #[error("Failed to write history: {0}")]
    Upload(#[source] StoreError),

    /// Progress could not be recorded.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// The caller cancelled the archival.
    #[error("Archival cancelled")]
    Cancelled,

    /// A caller-supplied replacement for a non-retryable failure.
    #[error("{0}")]
    NonRetryable(String),
}

impl ArchiveError {
    /// Whether an outer retrier should run the archival again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ReadHistory(e) => e.is_transient(),
            Self::Upload(_) | Self::Progress(_) | Self::Cancelled => true,
            Self::InvalidUri(_)
            | Self::InvalidRequest(_)
            | Self::NoHistorySource
            | Self::HistoryMutated
            | Self::Encode(_)
            | Self::NonRetryable(_) => false,
        }
    }

    /// Short reason tag used in logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUri(_) => "invalid URI",
            Self::InvalidRequest(_) | Self::NoHistorySource => "invalid archive request",
            Self::HistoryMutated => "history is mutated",
            Self::Encode(_) => "failed to encode history batches",
            Self::ReadHistory(_) => "failed to read history batches",
            Self::Upload(_) => "failed to write history",
            Self::Progress(_) => "failed to record progress",
            Self::Cancelled => "cancelled",
            Self::NonRetryable(_) => "non-retryable",
        }
    }
}

/// Client-facing errors of the read path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No archived history matches the request.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request or its continuation token is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The archival store could not be reached.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Stored data is inconsistent or undecodable.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether a client may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_error_classification() {
        assert!(!ArchiveError::HistoryMutated.is_retryable());
        assert!(!ArchiveError::InvalidRequest("RunID is empty".to_string()).is_retryable());
        assert!(!ArchiveError::from(UriError::Incomplete("file:///x".to_string())).is_retryable());
        assert!(ArchiveError::Cancelled.is_retryable());
        assert!(ArchiveError::from(ProgressError("disk full".to_string())).is_retryable());

        let transient = ArchiveError::ReadHistory(SourceError::Unavailable("timeout".to_string()));
        assert!(transient.is_retryable());
        let permanent = ArchiveError::ReadHistory(SourceError::Other("corrupt".to_string()));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_service_error_display() {
        assert_eq!(
            ServiceError::InvalidArgument("next page token is corrupted".to_string()).to_string(),
            "Invalid argument: next page token is corrupted"
        );
        assert!(ServiceError::Unavailable("io".to_string()).is_retryable());
        assert!(!ServiceError::NotFound("gone".to_string()).is_retryable());
    }
}
