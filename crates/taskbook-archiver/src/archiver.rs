// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! History archiver: paged, resumable upload and token-driven reads.
//!
//! # Write path
//!
//! Each blob from the history iterator becomes one part file. A part that
//! already exists is not uploaded again, so re-running a completed archival
//! stores nothing new. After each part the iterator state is recorded
//! through the optional [`ProgressManager`](crate::progress::ProgressManager)
//! and a retried call continues with the next part.
//!
//! # Read path
//!
//! Without a token the highest archived close failover version is located by
//! listing part names. Batches are returned until the page holds at least
//! `page_size` events; the token records the part and batch to continue from.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::codec;
use crate::config::{DEFAULT_TARGET_BLOB_SIZE, DEFAULT_URI_SCHEME};
use crate::error::{ArchiveError, ProgressError, ServiceError, SourceError, UriError};
use crate::filename::{history_filename, history_filename_prefix, parse_history_filename};
use crate::history::{
    ArchiveHistoryRequest, GetHistoryRequest, GetHistoryResponse, History, HistoryBlob,
};
use crate::iterator::{HistoryIterator, HistoryIteratorFactory};
use crate::progress::{ArchiveOptions, ArchiveProgress};
use crate::store::ArchivalStore;
use crate::token::GetHistoryToken;
use crate::uri::{self, ArchiveUri};

/// Result of a successful archive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Every part of the history is stored.
    Archived {
        /// Parts uploaded by this call.
        uploaded_parts: usize,
        /// Parts that already existed.
        skipped_parts: usize,
        /// Bytes uploaded by this call.
        total_upload_size: u64,
    },
    /// The history no longer exists; another archival already handled it.
    Duplicate,
}

/// Archives workflow histories into an [`ArchivalStore`] and reads them back.
pub struct HistoryArchiver {
    store: Arc<dyn ArchivalStore>,
    iterators: Option<Arc<dyn HistoryIteratorFactory>>,
    scheme: String,
    target_blob_size: usize,
}

impl HistoryArchiver {
    /// Archiver over `store` serving the default scheme. Without an iterator
    /// factory only reads are possible.
    pub fn new(store: Arc<dyn ArchivalStore>) -> Self {
        Self {
            store,
            iterators: None,
            scheme: DEFAULT_URI_SCHEME.to_string(),
            target_blob_size: DEFAULT_TARGET_BLOB_SIZE,
        }
    }

    /// Read histories to archive through `factory`.
    pub fn with_iterator_factory(mut self, factory: Arc<dyn HistoryIteratorFactory>) -> Self {
        self.iterators = Some(factory);
        self
    }

    /// Serve URIs with `scheme`.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Aim for parts of `bytes` encoded bytes.
    pub fn with_target_blob_size(mut self, bytes: usize) -> Self {
        self.target_blob_size = bytes;
        self
    }

    /// Scheme this archiver serves.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Check the URI's shape and that its root can be probed.
    pub async fn validate_uri(&self, uri: &ArchiveUri) -> Result<(), UriError> {
        uri::validate_uri(uri, &self.scheme)?;
        self.store
            .exist(uri, "")
            .await
            .map(|_| ())
            .map_err(|e| UriError::Inaccessible(e.to_string()))
    }

    /// Archive the history described by `request` into `uri`.
    ///
    /// Returns [`ArchiveError::Cancelled`] once `cancel` fires, abandoning an
    /// in-flight history read or upload. Non-retryable errors
    /// pass through `options.non_retryable_error` when set.
    pub async fn archive(
        &self,
        uri: &ArchiveUri,
        request: &ArchiveHistoryRequest,
        options: &ArchiveOptions,
        cancel: &CancellationToken,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        match self.archive_parts(uri, request, options, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_retryable() => {
                warn!(
                    archival_uri = %uri,
                    namespace = %request.namespace,
                    workflow_id = %request.workflow_id,
                    run_id = %request.run_id,
                    archival_archive_fail_reason = e.reason(),
                    error = %e,
                    "Failed to archive history, will retry"
                );
                Err(e)
            }
            Err(e) => {
                error!(
                    archival_uri = %uri,
                    namespace = %request.namespace,
                    workflow_id = %request.workflow_id,
                    run_id = %request.run_id,
                    archival_archive_fail_reason = e.reason(),
                    error = %e,
                    "Failed to archive history, not retrying"
                );
                match &options.non_retryable_error {
                    Some(translate) => Err(translate(e)),
                    None => Err(e),
                }
            }
        }
    }

    async fn archive_parts(
        &self,
        uri: &ArchiveUri,
        request: &ArchiveHistoryRequest,
        options: &ArchiveOptions,
        cancel: &CancellationToken,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        self.validate_uri(uri).await?;
        request.validate().map_err(ArchiveError::InvalidRequest)?;
        let factory = self.iterators.as_ref().ok_or(ArchiveError::NoHistorySource)?;

        let (mut iterator, mut progress) = self
            .load_iterator(factory.as_ref(), request, options)
            .await?;

        let mut uploaded_parts = 0;
        let mut skipped_parts = 0;
        let mut total_upload_size = 0u64;

        while iterator.has_next() {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let part = progress.current_page_number;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ArchiveError::Cancelled),
                next = iterator.next() => next,
            };
            let blob = match next {
                Ok(blob) => blob,
                Err(SourceError::NotFound(details)) => {
                    // Two archival signals for the same run can race.
                    info!(
                        archival_uri = %uri,
                        workflow_id = %request.workflow_id,
                        run_id = %request.run_id,
                        details = %details,
                        "Archival skipped, history no longer exists"
                    );
                    return Ok(ArchiveOutcome::Duplicate);
                }
                Err(e) => return Err(ArchiveError::ReadHistory(e)),
            };

            if history_mutated(request, &blob) {
                return Err(ArchiveError::HistoryMutated);
            }

            let encoded = codec::encode_histories(&blob.body).map_err(ArchiveError::Encode)?;
            let filename = history_filename(
                &request.namespace_id,
                &request.workflow_id,
                &request.run_id,
                request.close_failover_version,
                part,
            );

            let exists = match self.store.exist(uri, &filename).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(filename = %filename, error = %e, "Existence check failed, uploading");
                    false
                }
            };
            if exists {
                skipped_parts += 1;
            } else {
                // An interrupted part has no recorded progress and is uploaded again.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ArchiveError::Cancelled),
                    uploaded = self.store.upload(uri, &filename, &encoded) => {
                        uploaded.map_err(ArchiveError::Upload)?;
                    }
                }
                uploaded_parts += 1;
                total_upload_size += encoded.len() as u64;
            }

            if let Some(manager) = &options.progress_manager {
                let state = iterator
                    .state()
                    .map_err(|e| ProgressError(e.to_string()))?;
                progress = ArchiveProgress {
                    current_page_number: part + 1,
                    iterator_state: Some(state),
                };
                manager.record_progress(&progress).await?;
            } else {
                progress.current_page_number = part + 1;
            }
        }

        info!(
            archival_uri = %uri,
            workflow_id = %request.workflow_id,
            run_id = %request.run_id,
            uploaded_parts,
            skipped_parts,
            total_upload_size,
            "Archived history"
        );
        Ok(ArchiveOutcome::Archived {
            uploaded_parts,
            skipped_parts,
            total_upload_size,
        })
    }

    /// Resume from recorded progress when possible, otherwise start over.
    async fn load_iterator(
        &self,
        factory: &dyn HistoryIteratorFactory,
        request: &ArchiveHistoryRequest,
        options: &ArchiveOptions,
    ) -> Result<(Box<dyn HistoryIterator>, ArchiveProgress), ArchiveError> {
        let resumable = match &options.progress_manager {
            Some(manager) => manager.has_progress().await,
            None => false,
        };
        if let (true, Some(manager)) = (resumable, &options.progress_manager) {
            let resumed = match manager.load_progress().await {
                Ok(progress) => factory
                    .new_iterator(
                        request,
                        self.target_blob_size,
                        progress.iterator_state.as_deref(),
                    )
                    .map(|iterator| (iterator, progress))
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match resumed {
                Ok(resumed) => return Ok(resumed),
                Err(details) => {
                    warn!(
                        workflow_id = %request.workflow_id,
                        run_id = %request.run_id,
                        details = %details,
                        "Could not resume archival, starting over"
                    );
                }
            }
        }

        let iterator = factory
            .new_iterator(request, self.target_blob_size, None)
            .map_err(ArchiveError::ReadHistory)?;
        Ok((iterator, ArchiveProgress::default()))
    }

    /// Read one page of an archived history.
    pub async fn get(
        &self,
        uri: &ArchiveUri,
        request: &GetHistoryRequest,
    ) -> Result<GetHistoryResponse, ServiceError> {
        self.validate_uri(uri)
            .await
            .map_err(|e| ServiceError::InvalidArgument(format!("invalid URI: {e}")))?;
        request.validate().map_err(|e| {
            ServiceError::InvalidArgument(format!("invalid get archived history request: {e}"))
        })?;

        let mut token = match &request.next_page_token {
            Some(bytes) => GetHistoryToken::deserialize(bytes).map_err(|e| {
                ServiceError::InvalidArgument(format!("next page token is corrupted: {e}"))
            })?,
            None => self.locate_history(uri, request).await?,
        };

        let mut history_batches: Vec<History> = Vec::new();
        let mut num_events = 0usize;

        'parts: while token.has_more() {
            let filename = history_filename(
                &request.namespace_id,
                &request.workflow_id,
                &request.run_id,
                token.close_failover_version,
                token.current_part,
            );
            let encoded = self
                .store
                .get(uri, &filename)
                .await
                .map_err(|e| ServiceError::Unavailable(e.to_string()))?
                .ok_or_else(|| {
                    ServiceError::Internal(format!(
                        "failed retrieving history file: {uri}/{filename}"
                    ))
                })?;
            let batches = codec::decode_histories(&encoded)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;

            if token.batch_idx_offset > batches.len() {
                return Err(ServiceError::InvalidArgument(
                    "next page token is corrupted: batch offset out of range".to_string(),
                ));
            }
            let remaining = batches.len() - token.batch_idx_offset;
            for (idx, batch) in batches.into_iter().skip(token.batch_idx_offset).enumerate() {
                num_events += batch.events.len();
                history_batches.push(batch);
                token.batch_idx_offset += 1;

                if num_events >= request.page_size {
                    if idx + 1 == remaining {
                        // Part fully consumed; the next page starts in the next part.
                        token.advance_part();
                    }
                    break 'parts;
                }
            }

            token.advance_part();
        }

        let next_page_token = if token.has_more() {
            Some(
                token
                    .serialize()
                    .map_err(|e| ServiceError::Internal(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(GetHistoryResponse {
            history_batches,
            next_page_token,
        })
    }

    /// Initial token for the highest (or requested) close failover version.
    async fn locate_history(
        &self,
        uri: &ArchiveUri,
        request: &GetHistoryRequest,
    ) -> Result<GetHistoryToken, ServiceError> {
        let prefix =
            history_filename_prefix(&request.namespace_id, &request.workflow_id, &request.run_id);
        let names = self
            .store
            .query(uri, &prefix)
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;

        // (version, lowest part, highest part)
        let mut found: Option<(i64, usize, usize)> = None;
        for name in &names {
            let Ok((version, part)) = parse_history_filename(name) else {
                continue;
            };
            if request
                .close_failover_version
                .is_some_and(|wanted| wanted != version)
            {
                continue;
            }
            found = match found {
                Some((highest, _, _)) if version > highest => Some((version, part, part)),
                Some((highest, lowest, top)) if version == highest => {
                    Some((highest, lowest.min(part), top.max(part)))
                }
                Some(current) => Some(current),
                None => Some((version, part, part)),
            };
        }

        let (version, lowest, highest) = found
            .ok_or_else(|| ServiceError::NotFound("history does not exist".to_string()))?;
        Ok(GetHistoryToken::start(version, lowest, highest))
    }
}

/// Whether the history changed after `request` was issued.
///
/// Any event newer than the close version means a mutation. On the last
/// blob the final event must also carry the close version and precede
/// `next_event_id` directly.
pub fn history_mutated(request: &ArchiveHistoryRequest, blob: &HistoryBlob) -> bool {
    let Some(last_event) = blob.last_event() else {
        return blob.header.is_last;
    };
    if last_event.version > request.close_failover_version {
        return true;
    }
    if !blob.header.is_last {
        return false;
    }
    last_event.version != request.close_failover_version
        || last_event.event_id + 1 != request.next_event_id
}
