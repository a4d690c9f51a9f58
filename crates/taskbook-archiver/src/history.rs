// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow history types and archive requests.

use serde::{Deserialize, Serialize};

/// Id of the first event of every history.
pub const FIRST_EVENT_ID: i64 = 1;

/// One history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    /// Position in the history, starting at [`FIRST_EVENT_ID`].
    pub event_id: i64,
    /// Failover version the event was written under.
    pub version: i64,
    /// Event type name.
    pub event_type: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attributes: serde_json::Value,
}

/// A batch of events written together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct History {
    /// Events in id order.
    pub events: Vec<HistoryEvent>,
}

impl History {
    /// Last event of the batch.
    pub fn last_event(&self) -> Option<&HistoryEvent> {
        self.events.last()
    }
}

/// Summary of one blob produced by a history iterator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryBlobHeader {
    /// Whether this is the final blob of the history.
    pub is_last: bool,
    /// First event id in the blob.
    pub first_event_id: i64,
    /// Last event id in the blob.
    pub last_event_id: i64,
    /// Number of events in the blob.
    pub event_count: usize,
}

/// Consecutive batches archived as one part.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryBlob {
    /// Summary.
    pub header: HistoryBlobHeader,
    /// Batches in order.
    pub body: Vec<History>,
}

impl HistoryBlob {
    /// Build a blob, deriving the header from `body`.
    pub fn new(body: Vec<History>, is_last: bool) -> Self {
        let mut events = body.iter().flat_map(|batch| batch.events.iter());
        let first_event_id = events.next().map(|e| e.event_id).unwrap_or_default();
        let last_event_id = body
            .iter()
            .rev()
            .find_map(History::last_event)
            .map(|e| e.event_id)
            .unwrap_or_default();
        let event_count = body.iter().map(|batch| batch.events.len()).sum();
        Self {
            header: HistoryBlobHeader {
                is_last,
                first_event_id,
                last_event_id,
                event_count,
            },
            body,
        }
    }

    /// Last event across all batches.
    pub fn last_event(&self) -> Option<&HistoryEvent> {
        self.body.iter().rev().find_map(History::last_event)
    }
}

/// Request to archive one closed workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveHistoryRequest {
    /// Shard that owns the run.
    pub shard_id: i32,
    /// Namespace id.
    pub namespace_id: String,
    /// Namespace name.
    pub namespace: String,
    /// Workflow id.
    pub workflow_id: String,
    /// Run id.
    pub run_id: String,
    /// History branch to archive.
    pub branch_token: Vec<u8>,
    /// Id one past the last event of the closed history.
    pub next_event_id: i64,
    /// Failover version of the closing event.
    pub close_failover_version: i64,
}

impl ArchiveHistoryRequest {
    /// Check that every identifier is present.
    pub fn validate(&self) -> Result<(), String> {
        if self.branch_token.is_empty() {
            return Err("BranchToken is empty".to_string());
        }
        for (name, value) in [
            ("NamespaceID", &self.namespace_id),
            ("WorkflowID", &self.workflow_id),
            ("RunID", &self.run_id),
            ("Namespace", &self.namespace),
        ] {
            if value.is_empty() {
                return Err(format!("{name} is empty"));
            }
        }
        Ok(())
    }
}

/// Request to read an archived history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetHistoryRequest {
    /// Namespace id.
    pub namespace_id: String,
    /// Workflow id.
    pub workflow_id: String,
    /// Run id.
    pub run_id: String,
    /// Read this version instead of the highest archived one.
    pub close_failover_version: Option<i64>,
    /// Token from the previous response.
    pub next_page_token: Option<Vec<u8>>,
    /// Minimum number of events per response.
    pub page_size: usize,
}

impl GetHistoryRequest {
    /// Check that every identifier is present and the page size is set.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("NamespaceID", &self.namespace_id),
            ("WorkflowID", &self.workflow_id),
            ("RunID", &self.run_id),
        ] {
            if value.is_empty() {
                return Err(format!("{name} is empty"));
            }
        }
        if self.page_size == 0 {
            return Err("PageSize should be greater than 0".to_string());
        }
        Ok(())
    }
}

/// One page of an archived history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetHistoryResponse {
    /// Batches in history order.
    pub history_batches: Vec<History>,
    /// Token for the next page, absent at the end of the history.
    pub next_page_token: Option<Vec<u8>>,
}
