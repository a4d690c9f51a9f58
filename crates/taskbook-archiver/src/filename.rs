// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Names of archived history parts.
//!
//! A part is stored as `<prefix>_<closeFailoverVersion>_<part>.history`, where
//! the prefix concatenates the decimal FarmHash Fingerprint64 of the
//! namespace id, workflow id and run id. Other archivers read these names, so
//! the format is fixed.

use thiserror::Error;

/// Extension of every history part.
pub const HISTORY_FILE_EXTENSION: &str = "history";

/// A file name that does not follow the part naming scheme.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown filename structure: {0}")]
pub struct FilenameError(pub String);

/// Decimal Fingerprint64 of `s`, or an empty string for empty input.
pub fn hash(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    farmhash::fingerprint64(s.as_bytes()).to_string()
}

/// Common prefix of every part of one workflow run.
pub fn history_filename_prefix(namespace_id: &str, workflow_id: &str, run_id: &str) -> String {
    let mut prefix = hash(namespace_id);
    prefix.push_str(&hash(workflow_id));
    prefix.push_str(&hash(run_id));
    prefix
}

/// Name of one history part.
pub fn history_filename(
    namespace_id: &str,
    workflow_id: &str,
    run_id: &str,
    close_failover_version: i64,
    part: usize,
) -> String {
    format!(
        "{}_{}_{}.{}",
        history_filename_prefix(namespace_id, workflow_id, run_id),
        close_failover_version,
        part,
        HISTORY_FILE_EXTENSION
    )
}

/// Parse `(closeFailoverVersion, part)` out of a part file name.
pub fn parse_history_filename(filename: &str) -> Result<(i64, usize), FilenameError> {
    let fields: Vec<&str> = filename
        .split(['_', '.'])
        .filter(|field| !field.is_empty())
        .collect();
    if fields.len() != 4 {
        return Err(FilenameError(filename.to_string()));
    }

    let version = fields[1]
        .parse()
        .map_err(|_| FilenameError(filename.to_string()))?;
    let part = fields[2]
        .parse()
        .map_err(|_| FilenameError(filename.to_string()))?;
    Ok((version, part))
}
