// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blob storage for archived histories.
//!
//! An [`ArchivalStore`] is a flat namespace of named objects under an
//! [`ArchiveUri`]. [`FileArchivalStore`] maps it onto a local directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::uri::ArchiveUri;

/// Object storage addressed by URI and relative name.
#[async_trait]
pub trait ArchivalStore: Send + Sync {
    /// Whether `name` exists under `uri`. An empty name probes the URI root;
    /// only errors matter for that probe.
    async fn exist(&self, uri: &ArchiveUri, name: &str) -> Result<bool, StoreError>;

    /// Store `data` as `name`, replacing any previous object.
    async fn upload(&self, uri: &ArchiveUri, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read `name`, or `None` when it does not exist.
    async fn get(&self, uri: &ArchiveUri, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Names under `uri` starting with `prefix`.
    async fn query(&self, uri: &ArchiveUri, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Store rooted at a local directory; `<root>/<host>/<path>/<name>`.
#[derive(Debug, Clone)]
pub struct FileArchivalStore {
    root: PathBuf,
}

impl FileArchivalStore {
    /// Store rooted at `root`. The directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, uri: &ArchiveUri) -> PathBuf {
        self.root
            .join(uri.hostname())
            .join(uri.path().trim_start_matches('/'))
    }

    fn object_path(&self, uri: &ArchiveUri, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir(uri).join(name))
    }
}

fn io_error(operation: &'static str, target: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        operation,
        target: target.display().to_string(),
        source,
    }
}

#[async_trait]
impl ArchivalStore for FileArchivalStore {
    async fn exist(&self, uri: &ArchiveUri, name: &str) -> Result<bool, StoreError> {
        let path = if name.is_empty() {
            self.dir(uri)
        } else {
            self.object_path(uri, name)?
        };
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("exist", &path, e))
    }

    async fn upload(&self, uri: &ArchiveUri, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(uri, name)?;
        let dir = self.dir(uri);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("upload", &dir, e))?;

        // Readers never observe a partially written part.
        let temp = dir.join(format!(
            ".{name}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = tokio::fs::write(&temp, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error("upload", &temp, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error("upload", &path, e));
        }

        debug!(path = %path.display(), bytes = data.len(), "Uploaded archive object");
        Ok(())
    }

    async fn get(&self, uri: &ArchiveUri, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.object_path(uri, name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("get", &path, e)),
        }
    }

    async fn query(&self, uri: &ArchiveUri, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.dir(uri);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("query", &dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("query", &dir, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
