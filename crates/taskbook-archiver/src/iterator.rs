// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! History iteration for the archive write path.
//!
//! The archiver pulls [`HistoryBlob`]s from a [`HistoryIterator`], one blob
//! per stored part. An iterator's state is an opaque byte string the archiver
//! records as progress, so a new iterator built from that state continues
//! where the previous attempt stopped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::SourceError;
use crate::history::{ArchiveHistoryRequest, FIRST_EVENT_ID, History, HistoryBlob};

/// Produces the blobs of one history.
#[async_trait]
pub trait HistoryIterator: Send {
    /// Whether another blob remains.
    fn has_next(&self) -> bool;

    /// Next blob.
    async fn next(&mut self) -> Result<HistoryBlob, SourceError>;

    /// Serialized position, valid after each successful `next`.
    fn state(&self) -> Result<Vec<u8>, serde_json::Error>;
}

/// Builds iterators, optionally resuming from saved state.
pub trait HistoryIteratorFactory: Send + Sync {
    /// Iterator over `request`'s history producing blobs of at most
    /// `target_blob_size` encoded bytes (a single oversized batch still forms
    /// its own blob).
    fn new_iterator(
        &self,
        request: &ArchiveHistoryRequest,
        target_blob_size: usize,
        state: Option<&[u8]>,
    ) -> Result<Box<dyn HistoryIterator>, SourceError>;
}

/// Range read against the history store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadHistoryRequest {
    /// Branch to read.
    pub branch_token: Vec<u8>,
    /// First event id to return.
    pub min_event_id: i64,
    /// Exclusive upper bound.
    pub max_event_id: i64,
    /// Maximum batches per page.
    pub page_size: usize,
    /// Token of the previous page.
    pub next_page_token: Option<Vec<u8>>,
}

/// One page of a range read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryPage {
    /// Batches in event order.
    pub batches: Vec<History>,
    /// Present when more batches follow.
    pub next_page_token: Option<Vec<u8>>,
}

/// Paged access to stored workflow histories.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Read batches whose events fall in `[min_event_id, max_event_id)`.
    async fn read_history(&self, request: &ReadHistoryRequest) -> Result<HistoryPage, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct IteratorState {
    #[serde(rename = "NextEventID")]
    next_event_id: i64,
    #[serde(rename = "FinishedIteration")]
    finished: bool,
}

/// Groups source batches into blobs up to a target encoded size.
pub struct BatchedHistoryIterator {
    source: Arc<dyn HistorySource>,
    branch_token: Vec<u8>,
    end_event_id: i64,
    page_size: usize,
    target_blob_size: usize,
    state: IteratorState,
}

impl BatchedHistoryIterator {
    fn new(
        source: Arc<dyn HistorySource>,
        request: &ArchiveHistoryRequest,
        page_size: usize,
        target_blob_size: usize,
        state: IteratorState,
    ) -> Self {
        Self {
            source,
            branch_token: request.branch_token.clone(),
            end_event_id: request.next_event_id,
            page_size,
            target_blob_size,
            state,
        }
    }
}

#[async_trait]
impl HistoryIterator for BatchedHistoryIterator {
    fn has_next(&self) -> bool {
        !self.state.finished
    }

    async fn next(&mut self) -> Result<HistoryBlob, SourceError> {
        if self.state.finished {
            return Err(SourceError::Other("history iterator is exhausted".to_string()));
        }

        let mut body: Vec<History> = Vec::new();
        let mut size = 0usize;
        let mut resume_at = None;
        let mut page_token = None;

        'pages: loop {
            let page = self
                .source
                .read_history(&ReadHistoryRequest {
                    branch_token: self.branch_token.clone(),
                    min_event_id: self.state.next_event_id,
                    max_event_id: self.end_event_id,
                    page_size: self.page_size,
                    next_page_token: page_token.take(),
                })
                .await?;

            for batch in page.batches {
                let Some(first) = batch.events.first() else {
                    continue;
                };
                let first_event_id = first.event_id;
                let batch_size =
                    codec::encoded_size(&batch).map_err(|e| SourceError::Other(e.to_string()))?;
                if !body.is_empty() && size + batch_size > self.target_blob_size {
                    resume_at = Some(first_event_id);
                    break 'pages;
                }
                size += batch_size;
                body.push(batch);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        let blob = HistoryBlob::new(body, resume_at.is_none());
        if blob.header.event_count == 0 {
            return Err(SourceError::NotFound(format!(
                "no history events from event {}",
                self.state.next_event_id
            )));
        }

        self.state = match resume_at {
            Some(next_event_id) => IteratorState {
                next_event_id,
                finished: false,
            },
            None => IteratorState {
                next_event_id: blob.header.last_event_id + 1,
                finished: true,
            },
        };
        Ok(blob)
    }

    fn state(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.state)
    }
}

/// Builds [`BatchedHistoryIterator`]s over a shared [`HistorySource`].
#[derive(Clone)]
pub struct BatchedHistoryIteratorFactory {
    source: Arc<dyn HistorySource>,
    history_page_size: usize,
}

impl BatchedHistoryIteratorFactory {
    /// Read `history_page_size` batches per source call.
    pub fn new(source: Arc<dyn HistorySource>, history_page_size: usize) -> Self {
        Self {
            source,
            history_page_size,
        }
    }
}

impl HistoryIteratorFactory for BatchedHistoryIteratorFactory {
    fn new_iterator(
        &self,
        request: &ArchiveHistoryRequest,
        target_blob_size: usize,
        state: Option<&[u8]>,
    ) -> Result<Box<dyn HistoryIterator>, SourceError> {
        let state = match state {
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| SourceError::Other(format!("invalid iterator state: {e}")))?,
            None => IteratorState {
                next_event_id: FIRST_EVENT_ID,
                finished: false,
            },
        };
        Ok(Box::new(BatchedHistoryIterator::new(
            self.source.clone(),
            request,
            self.history_page_size,
            target_blob_size,
            state,
        )))
    }
}
