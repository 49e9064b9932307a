//! Shipped defaults for the recovery engine.
//!
//! # Design
//! - Durations are stored in milliseconds so documents stay plain JSON.

/// Probe results younger than this are reused.
pub(crate) const PROBE_TTL_MS: u64 = 5_000;
/// Cadence of the volume-loss reachability loop.
pub(crate) const VOLUME_POLL_INTERVAL_MS: u64 = 2_000;
/// Worker count for bulk actions.
pub(crate) const BULK_CONCURRENCY: usize = 4;
/// How long a resume waits for the torrent to report an active state.
pub(crate) const ACTIVE_WAIT_DEADLINE_MS: u64 = 1_000;
/// Poll interval while waiting for an active state.
pub(crate) const ACTIVE_WAIT_INTERVAL_MS: u64 = 200;
/// Whether an empty missing-files torrent gets its folder recreated automatically.
pub(crate) const AUTO_CREATE_MISSING_FOLDER: bool = true;
/// Replay ring size for the recovery event bus.
pub(crate) const EVENT_REPLAY_CAPACITY: usize = 256;

pub(crate) const fn probe_ttl_ms() -> u64 {
    PROBE_TTL_MS
}

pub(crate) const fn volume_poll_interval_ms() -> u64 {
    VOLUME_POLL_INTERVAL_MS
}

pub(crate) const fn bulk_concurrency() -> usize {
    BULK_CONCURRENCY
}

pub(crate) const fn active_wait_deadline_ms() -> u64 {
    ACTIVE_WAIT_DEADLINE_MS
}

pub(crate) const fn active_wait_interval_ms() -> u64 {
    ACTIVE_WAIT_INTERVAL_MS
}

pub(crate) const fn auto_create_missing_folder() -> bool {
    AUTO_CREATE_MISSING_FOLDER
}

pub(crate) const fn event_replay_capacity() -> usize {
    EVENT_REPLAY_CAPACITY
}
