// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;

/// Scheme served by the filesystem archival store.
pub const DEFAULT_URI_SCHEME: &str = "file";

/// Target encoded size of one history part.
pub const DEFAULT_TARGET_BLOB_SIZE: usize = 2 * 1024 * 1024;

/// Batches read from the history source per call, and the default page size
/// of the read CLI.
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 250;

/// Archiver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverConfig {
    /// Directory the filesystem store is rooted at
    pub root: PathBuf,
    /// URI scheme the archiver serves
    pub scheme: String,
    /// Target encoded size of one history part
    pub target_blob_size: usize,
    /// History page size
    pub history_page_size: usize,
}

impl ArchiverConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `TASKBOOK_ARCHIVAL_ROOT`: directory of the filesystem store
    ///
    /// Optional (with defaults):
    /// - `TASKBOOK_ARCHIVAL_SCHEME`: URI scheme (default: `file`)
    /// - `TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE`: part size in bytes (default: 2097152)
    /// - `TASKBOOK_ARCHIVAL_HISTORY_PAGE_SIZE`: history page size (default: 250)
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::var("TASKBOOK_ARCHIVAL_ROOT")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("TASKBOOK_ARCHIVAL_ROOT"))?;

        let scheme = std::env::var("TASKBOOK_ARCHIVAL_SCHEME")
            .unwrap_or_else(|_| DEFAULT_URI_SCHEME.to_string());
        if scheme.is_empty() {
            return Err(ConfigError::Invalid(
                "TASKBOOK_ARCHIVAL_SCHEME",
                "must not be empty",
            ));
        }

        let target_blob_size =
            positive("TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE", DEFAULT_TARGET_BLOB_SIZE)?;
        let history_page_size =
            positive("TASKBOOK_ARCHIVAL_HISTORY_PAGE_SIZE", DEFAULT_HISTORY_PAGE_SIZE)?;

        Ok(Self {
            root,
            scheme,
            target_blob_size,
            history_page_size,
        })
    }
}

fn positive(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    std::env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .ok()
        .filter(|value| *value > 0)
        .ok_or(ConfigError::Invalid(var, "must be a positive integer"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 4] = [
        "TASKBOOK_ARCHIVAL_ROOT",
        "TASKBOOK_ARCHIVAL_SCHEME",
        "TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE",
        "TASKBOOK_ARCHIVAL_HISTORY_PAGE_SIZE",
    ];

    /// Clears the archival variables and restores them on drop.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = VARS.iter().map(|&key| (key, env::var(key).ok())).collect();
            for key in VARS {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe { env::remove_var(key) };
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(key, v),
                        None => env::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clean();
        guard.set("TASKBOOK_ARCHIVAL_ROOT", "/var/lib/taskbook/archive");

        let config = ArchiverConfig::from_env().unwrap();
        assert_eq!(config.root, PathBuf::from("/var/lib/taskbook/archive"));
        assert_eq!(config.scheme, "file");
        assert_eq!(config.target_blob_size, 2 * 1024 * 1024);
        assert_eq!(config.history_page_size, 250);
    }

    #[test]
    fn test_missing_root() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = ArchiverConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TASKBOOK_ARCHIVAL_ROOT")));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clean();
        guard.set("TASKBOOK_ARCHIVAL_ROOT", "/tmp/archive");
        guard.set("TASKBOOK_ARCHIVAL_SCHEME", "tb");
        guard.set("TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE", "4096");
        guard.set("TASKBOOK_ARCHIVAL_HISTORY_PAGE_SIZE", "50");

        let config = ArchiverConfig::from_env().unwrap();
        assert_eq!(config.scheme, "tb");
        assert_eq!(config.target_blob_size, 4096);
        assert_eq!(config.history_page_size, 50);

        guard.set("TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE", "0");
        assert!(matches!(
            ArchiverConfig::from_env(),
            Err(ConfigError::Invalid("TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE", _))
        ));

        guard.set("TASKBOOK_ARCHIVAL_TARGET_BLOB_SIZE", "lots");
        assert!(ArchiverConfig::from_env().is_err());
    }
}
