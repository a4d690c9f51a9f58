// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for archiver integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use taskbook_archiver::codec;
use taskbook_archiver::error::{SourceError, StoreError};
use taskbook_archiver::filename::history_filename;
use taskbook_archiver::iterator::{HistoryPage, ReadHistoryRequest};
use taskbook_archiver::{
    ArchivalStore, ArchiveHistoryRequest, ArchiveUri, BatchedHistoryIteratorFactory,
    FileArchivalStore, GetHistoryRequest, History, HistoryArchiver, HistoryEvent, HistorySource,
};

pub const NAMESPACE_ID: &str = "0c7a1f7e-ns";
pub const NAMESPACE: &str = "orders";
pub const WORKFLOW_ID: &str = "order-4711";
pub const RUN_ID: &str = "b5d2c4a0-run";

pub fn uri() -> ArchiveUri {
    ArchiveUri::parse("file://archive/histories").unwrap()
}

/// Batches of the given sizes with consecutive event ids from 1.
pub fn history(sizes: &[usize], version: i64) -> Vec<History> {
    let mut next_id = 1;
    sizes
        .iter()
        .map(|&n| {
            let events = (0..n)
                .map(|_| {
                    let event = HistoryEvent {
                        event_id: next_id,
                        version,
                        event_type: "ActivityTaskCompleted".to_string(),
                        attributes: serde_json::json!({"result": "ok"}),
                    };
                    next_id += 1;
                    event
                })
                .collect();
            History { events }
        })
        .collect()
}

/// Target blob size that fits exactly `per_part` batches of `batches`.
pub fn target_for(batches: &[History], per_part: usize) -> usize {
    let largest = batches
        .iter()
        .map(|b| codec::encoded_size(b).unwrap())
        .max()
        .unwrap();
    largest * per_part + 1
}

pub fn archive_request(batches: &[History], version: i64) -> ArchiveHistoryRequest {
    let last_id = batches
        .iter()
        .rev()
        .find_map(|b| b.events.last())
        .map(|e| e.event_id)
        .unwrap_or(0);
    ArchiveHistoryRequest {
        shard_id: 1,
        namespace_id: NAMESPACE_ID.to_string(),
        namespace: NAMESPACE.to_string(),
        workflow_id: WORKFLOW_ID.to_string(),
        run_id: RUN_ID.to_string(),
        branch_token: b"branch-1".to_vec(),
        next_event_id: last_id + 1,
        close_failover_version: version,
    }
}

pub fn get_request(page_size: usize) -> GetHistoryRequest {
    GetHistoryRequest {
        namespace_id: NAMESPACE_ID.to_string(),
        workflow_id: WORKFLOW_ID.to_string(),
        run_id: RUN_ID.to_string(),
        close_failover_version: None,
        next_page_token: None,
        page_size,
    }
}

/// History source over fixed batches with scripted failures.
pub struct ScriptedSource {
    batches: Vec<History>,
    faults: Mutex<VecDeque<SourceError>>,
    vanished: AtomicBool,
    reads: Mutex<Vec<i64>>,
}

impl ScriptedSource {
    pub fn new(batches: Vec<History>) -> Arc<Self> {
        Arc::new(Self {
            batches,
            faults: Mutex::new(VecDeque::new()),
            vanished: AtomicBool::new(false),
            reads: Mutex::new(Vec::new()),
        })
    }

    /// Fail the next read with `fault`.
    pub fn fail_next(&self, fault: SourceError) {
        self.faults.lock().unwrap().push_back(fault);
    }

    /// Behave as if the history was deleted.
    pub fn vanish(&self) {
        self.vanished.store(true, Ordering::SeqCst);
    }

    /// `min_event_id` of every read so far.
    pub fn reads(&self) -> Vec<i64> {
        self.reads.lock().unwrap().clone()
    }

    pub fn clear_reads(&self) {
        self.reads.lock().unwrap().clear();
    }
}

#[async_trait]
impl HistorySource for ScriptedSource {
    async fn read_history(&self, request: &ReadHistoryRequest) -> Result<HistoryPage, SourceError> {
        self.reads.lock().unwrap().push(request.min_event_id);
        if let Some(fault) = self.faults.lock().unwrap().pop_front() {
            return Err(fault);
        }
        if self.vanished.load(Ordering::SeqCst) {
            return Err(SourceError::NotFound("workflow execution not found".to_string()));
        }

        let skip: usize = request
            .next_page_token
            .as_ref()
            .map(|t| String::from_utf8(t.clone()).unwrap().parse().unwrap())
            .unwrap_or(0);
        let remaining: Vec<History> = self
            .batches
            .iter()
            .filter(|b| {
                let first = b.events[0].event_id;
                first >= request.min_event_id && first < request.max_event_id
            })
            .skip(skip)
            .cloned()
            .collect();
        let batches: Vec<History> = remaining.iter().take(request.page_size).cloned().collect();
        let next_page_token = (remaining.len() > batches.len())
            .then(|| (skip + batches.len()).to_string().into_bytes());
        Ok(HistoryPage {
            batches,
            next_page_token,
        })
    }
}

/// History source whose reads never complete.
pub struct StalledSource {
    reads: AtomicUsize,
}

impl StalledSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
        })
    }

    /// Reads started so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for StalledSource {
    async fn read_history(&self, _request: &ReadHistoryRequest) -> Result<HistoryPage, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<Result<HistoryPage, SourceError>>().await
    }
}

/// File store that counts uploads and fails on demand.
pub struct FlakyStore {
    inner: FileArchivalStore,
    uploads: AtomicUsize,
    uploads_before_failure: Mutex<Option<usize>>,
    uploads_stall: AtomicBool,
    reads_fail: AtomicBool,
}

impl FlakyStore {
    pub fn new(dir: &TempDir) -> Arc<Self> {
        Arc::new(Self {
            inner: FileArchivalStore::new(dir.path()),
            uploads: AtomicUsize::new(0),
            uploads_before_failure: Mutex::new(None),
            uploads_stall: AtomicBool::new(false),
            reads_fail: AtomicBool::new(false),
        })
    }

    /// Let `n` more uploads succeed, then fail one.
    pub fn fail_upload_after(&self, n: usize) {
        *self.uploads_before_failure.lock().unwrap() = Some(n);
    }

    /// Make uploads wait forever.
    pub fn stall_uploads(&self, stall: bool) {
        self.uploads_stall.store(stall, Ordering::SeqCst);
    }

    /// Make `get` and `query` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.reads_fail.store(fail, Ordering::SeqCst);
    }

    /// Successful uploads so far.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Stored part names with their contents, sorted by name.
    pub async fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let mut parts = Vec::new();
        for name in self.inner.query(&uri(), "").await.unwrap() {
            let data = self.inner.get(&uri(), &name).await.unwrap().unwrap();
            parts.push((name, data));
        }
        parts
    }

    /// Store batches as part `part` of `version` directly.
    pub async fn put_part(&self, version: i64, part: usize, batches: &[History]) {
        let name = history_filename(NAMESPACE_ID, WORKFLOW_ID, RUN_ID, version, part);
        let data = codec::encode_histories(batches).unwrap();
        self.inner.upload(&uri(), &name, &data).await.unwrap();
    }

    fn unavailable(operation: &'static str) -> StoreError {
        StoreError::Io {
            operation,
            target: "archive".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "store timed out"),
        }
    }
}

#[async_trait]
impl ArchivalStore for FlakyStore {
    async fn exist(&self, uri: &ArchiveUri, name: &str) -> Result<bool, StoreError> {
        self.inner.exist(uri, name).await
    }

    async fn upload(&self, uri: &ArchiveUri, name: &str, data: &[u8]) -> Result<(), StoreError> {
        if self.uploads_stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        {
            let mut budget = self.uploads_before_failure.lock().unwrap();
            match *budget {
                Some(0) => {
                    *budget = None;
                    return Err(Self::unavailable("upload"));
                }
                Some(n) => *budget = Some(n - 1),
                None => {}
            }
        }
        self.inner.upload(uri, name, data).await?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, uri: &ArchiveUri, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(Self::unavailable("get"));
        }
        self.inner.get(uri, name).await
    }

    async fn query(&self, uri: &ArchiveUri, prefix: &str) -> Result<Vec<String>, StoreError> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(Self::unavailable("query"));
        }
        self.inner.query(uri, prefix).await
    }

    fn name(&self) -> &'static str {
        "flaky-file"
    }
}

/// Archiver over `store` reading `source`, with the given part size.
pub fn archiver(
    store: &Arc<FlakyStore>,
    source: &Arc<impl HistorySource + 'static>,
    target_blob_size: usize,
) -> HistoryArchiver {
    HistoryArchiver::new(store.clone())
        .with_iterator_factory(Arc::new(BatchedHistoryIteratorFactory::new(
            source.clone(),
            2,
        )))
        .with_target_blob_size(target_blob_size)
}
