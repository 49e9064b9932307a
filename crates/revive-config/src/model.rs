//! The recovery configuration document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Tunables consumed by the recovery engine.
///
/// Every field has a default, so an empty JSON object is a valid document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Lifetime of a cached filesystem probe, in milliseconds.
    pub probe_ttl_ms: u64,
    /// Volume-loss polling cadence, in milliseconds.
    pub volume_poll_interval_ms: u64,
    /// Maximum simultaneous single-torrent operations during a bulk action.
    pub bulk_concurrency: usize,
    /// Upper bound on waiting for an active state after resume, in milliseconds.
    pub active_wait_deadline_ms: u64,
    /// Poll interval while waiting for an active state, in milliseconds.
    pub active_wait_interval_ms: u64,
    /// Recreate the save folder instead of verifying when nothing is on disk.
    pub auto_create_missing_folder: bool,
    /// Number of recovery events retained for late subscribers.
    pub event_replay_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            probe_ttl_ms: defaults::probe_ttl_ms(),
            volume_poll_interval_ms: defaults::volume_poll_interval_ms(),
            bulk_concurrency: defaults::bulk_concurrency(),
            active_wait_deadline_ms: defaults::active_wait_deadline_ms(),
            active_wait_interval_ms: defaults::active_wait_interval_ms(),
            auto_create_missing_folder: defaults::auto_create_missing_folder(),
            event_replay_capacity: defaults::event_replay_capacity(),
        }
    }
}

impl RecoveryConfig {
    /// Probe lifetime as a [`Duration`].
    #[must_use]
    pub const fn probe_ttl(&self) -> Duration {
        Duration::from_millis(self.probe_ttl_ms)
    }

    /// Volume-loss polling cadence as a [`Duration`].
    #[must_use]
    pub const fn volume_poll_interval(&self) -> Duration {
        Duration::from_millis(self.volume_poll_interval_ms)
    }

    /// Active-state wait deadline as a [`Duration`].
    #[must_use]
    pub const fn active_wait_deadline(&self) -> Duration {
        Duration::from_millis(self.active_wait_deadline_ms)
    }

    /// Active-state poll interval as a [`Duration`].
    #[must_use]
    pub const fn active_wait_interval(&self) -> Duration {
        Duration::from_millis(self.active_wait_interval_ms)
    }
}
