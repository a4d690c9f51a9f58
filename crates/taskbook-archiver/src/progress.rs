// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resumable archival: progress records and per-call options.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ProgressError};

/// Where a retried archival should resume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArchiveProgress {
    /// Next part number to write.
    #[serde(rename = "CurrentPageNumber")]
    pub current_page_number: usize,
    /// Saved history iterator state.
    #[serde(rename = "IteratorState", default)]
    pub iterator_state: Option<Vec<u8>>,
}

/// Persists [`ArchiveProgress`] between attempts of one archival.
#[async_trait]
pub trait ProgressManager: Send + Sync {
    /// Whether a previous attempt recorded progress.
    async fn has_progress(&self) -> bool;

    /// Load the recorded progress.
    async fn load_progress(&self) -> Result<ArchiveProgress, ProgressError>;

    /// Record progress after a part has been stored.
    async fn record_progress(&self, progress: &ArchiveProgress) -> Result<(), ProgressError>;
}

/// Progress kept in process memory, shared between attempts by cloning.
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressManager {
    inner: Arc<Mutex<Option<ArchiveProgress>>>,
}

impl MemoryProgressManager {
    /// Empty progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded progress.
    pub fn current(&self) -> Option<ArchiveProgress> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl ProgressManager for MemoryProgressManager {
    async fn has_progress(&self) -> bool {
        self.current().is_some()
    }

    async fn load_progress(&self) -> Result<ArchiveProgress, ProgressError> {
        self.current()
            .ok_or_else(|| ProgressError("no progress recorded".to_string()))
    }

    async fn record_progress(&self, progress: &ArchiveProgress) -> Result<(), ProgressError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ProgressError("progress lock poisoned".to_string()))?;
        *guard = Some(progress.clone());
        Ok(())
    }
}

/// Replaces a non-retryable archive error before it reaches the caller.
pub type NonRetryableErrorFn = Arc<dyn Fn(ArchiveError) -> ArchiveError + Send + Sync>;

/// Optional collaborators of one archive call.
#[derive(Clone, Default)]
pub struct ArchiveOptions {
    /// Records progress so a retry resumes mid-history.
    pub progress_manager: Option<Arc<dyn ProgressManager>>,
    /// Translates non-retryable failures, e.g. into a framework's terminal error.
    pub non_retryable_error: Option<NonRetryableErrorFn>,
}

impl ArchiveOptions {
    /// No progress tracking, errors returned as-is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and resume progress through `manager`.
    pub fn with_progress_manager(mut self, manager: Arc<dyn ProgressManager>) -> Self {
        self.progress_manager = Some(manager);
        self
    }

    /// Translate non-retryable failures with `f`.
    pub fn with_non_retryable_error<F>(mut self, f: F) -> Self
    where
        F: Fn(ArchiveError) -> ArchiveError + Send + Sync + 'static,
    {
        self.non_retryable_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ArchiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveOptions")
            .field("progress_manager", &self.progress_manager.is_some())
            .field("non_retryable_error", &self.non_retryable_error.is_some())
            .finish()
    }
}
