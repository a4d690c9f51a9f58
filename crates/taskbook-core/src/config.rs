// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Default number of task ids reserved per lease (range id).
pub const DEFAULT_RANGE_SIZE: i64 = 100_000;

/// Default number of priority levels a task queue distinguishes.
pub const DEFAULT_PRIORITY_LEVELS: u32 = 5;

/// Per-queue tuning shared by every [`TaskQueueDb`](crate::db::TaskQueueDb).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueConfig {
    /// Number of task ids in the block backing one range id.
    pub range_size: i64,
    /// Number of priority levels; the default subqueue uses the middle one.
    pub priority_levels: u32,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            range_size: DEFAULT_RANGE_SIZE,
            priority_levels: DEFAULT_PRIORITY_LEVELS,
        }
    }
}

/// Taskbook partition keeper configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Namespace whose task queues are kept
    pub namespace_id: String,
    /// Task queue names to take over on startup
    pub task_queues: Vec<String>,
    /// How often queue metadata is synced to the store
    pub sync_interval: Duration,
    /// Queue tuning
    pub queue: TaskQueueConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `TASKBOOK_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `TASKBOOK_NAMESPACE_ID`: namespace of the kept queues (default: `default`)
    /// - `TASKBOOK_TASK_QUEUES`: comma separated queue names (default: none)
    /// - `TASKBOOK_SYNC_INTERVAL_SECS`: metadata sync interval (default: 60)
    /// - `TASKBOOK_RANGE_SIZE`: task ids per lease (default: 100000)
    /// - `TASKBOOK_PRIORITY_LEVELS`: priority levels (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("TASKBOOK_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("TASKBOOK_DATABASE_URL"))?;

        let namespace_id =
            std::env::var("TASKBOOK_NAMESPACE_ID").unwrap_or_else(|_| "default".to_string());

        let task_queues = std::env::var("TASKBOOK_TASK_QUEUES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let sync_interval_secs: u64 = std::env::var("TASKBOOK_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TASKBOOK_SYNC_INTERVAL_SECS", "must be a positive integer")
            })?;
        if sync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "TASKBOOK_SYNC_INTERVAL_SECS",
                "must be a positive integer",
            ));
        }

        let range_size: i64 = std::env::var("TASKBOOK_RANGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_RANGE_SIZE.to_string())
            .parse()
            .ok()
            .filter(|size| *size > 0)
            .ok_or(ConfigError::Invalid(
                "TASKBOOK_RANGE_SIZE",
                "must be a positive integer",
            ))?;

        let priority_levels: u32 = std::env::var("TASKBOOK_PRIORITY_LEVELS")
            .unwrap_or_else(|_| DEFAULT_PRIORITY_LEVELS.to_string())
            .parse()
            .ok()
            .filter(|levels| *levels > 0)
            .ok_or(ConfigError::Invalid(
                "TASKBOOK_PRIORITY_LEVELS",
                "must be a positive integer",
            ))?;

        Ok(Self {
            database_url,
            namespace_id,
            task_queues,
            sync_interval: Duration::from_secs(sync_interval_secs),
            queue: TaskQueueConfig {
                range_size,
                priority_levels,
            },
        })
    }
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
