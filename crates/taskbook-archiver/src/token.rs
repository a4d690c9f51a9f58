// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Continuation token of the history read path.

use serde::{Deserialize, Serialize};

/// Token format written by this crate.
pub const TOKEN_VERSION: u32 = 1;

/// Position of the next read within an archived history.
///
/// Serialized as JSON with fixed field names. Tokens without a `Version`
/// field are accepted as the initial format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHistoryToken {
    /// Close failover version whose parts are being read.
    #[serde(rename = "CloseFailoverVersion")]
    pub close_failover_version: i64,
    /// Last part of that version.
    #[serde(rename = "HighestPart")]
    pub highest_part: usize,
    /// Part the next read starts in.
    #[serde(rename = "CurrentPart")]
    pub current_part: usize,
    /// Batches of the current part already returned.
    #[serde(rename = "BatchIdxOffset")]
    pub batch_idx_offset: usize,
    /// Token format.
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Why a token could not be read.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not valid token JSON.
    #[error("malformed token: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Written by a newer format.
    #[error("unsupported token version {0}")]
    UnsupportedVersion(u32),
}

impl GetHistoryToken {
    /// Token for the start of `version`, spanning parts `lowest..=highest`.
    pub fn start(close_failover_version: i64, lowest_part: usize, highest_part: usize) -> Self {
        Self {
            close_failover_version,
            highest_part,
            current_part: lowest_part,
            batch_idx_offset: 0,
            version: Some(TOKEN_VERSION),
        }
    }

    /// Whether parts remain to be read.
    pub fn has_more(&self) -> bool {
        self.current_part <= self.highest_part
    }

    /// Move to the first batch of the next part.
    pub fn advance_part(&mut self) {
        self.current_part += 1;
        self.batch_idx_offset = 0;
    }

    /// Encode as opaque bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode bytes produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TokenError> {
        let token: Self = serde_json::from_slice(bytes)?;
        match token.version {
            None | Some(TOKEN_VERSION) => Ok(token),
            Some(other) => Err(TokenError::UnsupportedVersion(other)),
        }
    }
}
