// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON encoding of history parts: one array of batches per part.

use crate::history::History;

/// Encode batches as stored in a part.
pub fn encode_histories(batches: &[History]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(batches)
}

/// Decode a stored part.
pub fn decode_histories(data: &[u8]) -> Result<Vec<History>, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Encoded size of a single batch, used to fill parts up to a target size.
pub fn encoded_size(batch: &History) -> Result<usize, serde_json::Error> {
    serde_json::to_vec(batch).map(|bytes| bytes.len())
}
