// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Soft assertions: invariant violations that are reported but not fatal.
//!
//! The task queue database favours availability when it detects drift (an
//! ack level moving backwards, say). Violations go to a [`SoftAssert`] hook so
//! production logs them and tests can observe them.

use std::sync::Mutex;

use tracing::error;

/// Receives invariant violations.
pub trait SoftAssert: Send + Sync {
    /// Report a violated invariant.
    fn fail(&self, message: &str);
}

/// Report `message` through `hook` when `condition` does not hold.
///
/// Returns `condition` so call sites can branch on it.
pub fn that(hook: &dyn SoftAssert, condition: bool, message: &str) -> bool {
    if !condition {
        hook.fail(message);
    }
    condition
}

/// Default hook: logs each violation at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSoftAssert;

impl SoftAssert for LogSoftAssert {
    fn fail(&self, message: &str) {
        error!(soft_assert = true, "{}", message);
    }
}

/// Hook that keeps every violation in memory.
#[derive(Debug, Default)]
pub struct RecordingSoftAssert {
    failures: Mutex<Vec<String>>,
}

impl RecordingSoftAssert {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Violations reported so far.
    pub fn failures(&self) -> Vec<String> {
        self.failures
            .lock()
            .map(|failures| failures.clone())
            .unwrap_or_default()
    }
}

impl SoftAssert for RecordingSoftAssert {
    fn fail(&self, message: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(message.to_string());
        }
    }
}
