// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archival destination URIs.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::UriError;

/// Location of an archive, e.g. `file://histories/prod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUri(Url);

impl ArchiveUri {
    /// Parse a URI string.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        Url::parse(uri).map(Self).map_err(|e| UriError::Parse {
            uri: uri.to_string(),
            details: e.to_string(),
        })
    }

    /// URI scheme.
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Host, or an empty string when absent.
    pub fn hostname(&self) -> &str {
        self.0.host_str().unwrap_or("")
    }

    /// Path with the leading `/` kept. A bare `/` counts as empty.
    pub fn path(&self) -> &str {
        match self.0.path() {
            "/" => "",
            path => path,
        }
    }

    /// The URI as written.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ArchiveUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for ArchiveUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check the URI's shape for an archiver serving `scheme`.
pub fn validate_uri(uri: &ArchiveUri, scheme: &str) -> Result<(), UriError> {
    if uri.scheme() != scheme {
        return Err(UriError::SchemeMismatch {
            expected: scheme.to_string(),
            actual: uri.scheme().to_string(),
        });
    }
    if uri.hostname().is_empty() || uri.path().is_empty() {
        return Err(UriError::Incomplete(uri.to_string()));
    }
    Ok(())
}
