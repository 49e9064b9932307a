//! Event payload types carried across the recovery engine.

use chrono::{DateTime, Utc};
use revive_torrent_core::{RecoveryFingerprint, TorrentId};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the engine.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Typed recovery events surfaced to observers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    /// A recovery session was admitted by the gate.
    SessionStarted {
        /// Session identifier used for log correlation.
        session_id: Uuid,
        /// Torrent under recovery.
        torrent_id: TorrentId,
        /// Fingerprint of the error condition.
        fingerprint: RecoveryFingerprint,
        /// Action that triggered the session.
        action: String,
    },
    /// A request was queued behind the active session.
    SessionQueued {
        /// Torrent waiting for its turn.
        torrent_id: TorrentId,
        /// Fingerprint of the queued condition.
        fingerprint: RecoveryFingerprint,
        /// One-based position in the queue.
        position: usize,
    },
    /// The active session's blocking outcome changed.
    SessionUpdated {
        /// Torrent under recovery.
        torrent_id: TorrentId,
        /// Fingerprint of the error condition.
        fingerprint: RecoveryFingerprint,
        /// Machine-readable outcome label.
        outcome: String,
    },
    /// The active session was finalized and its waiters released.
    SessionFinalized {
        /// Session identifier used for log correlation.
        session_id: Uuid,
        /// Torrent that left recovery.
        torrent_id: TorrentId,
        /// Fingerprint that cleared.
        fingerprint: RecoveryFingerprint,
        /// Settlement status handed back to the caller.
        status: String,
    },
    /// A queued request was settled before it was ever admitted.
    QueuedSettled {
        /// Torrent that left the queue.
        torrent_id: TorrentId,
        /// Fingerprint of the settled condition.
        fingerprint: RecoveryFingerprint,
        /// Settlement status handed back to the caller.
        status: String,
    },
    /// A previously unreachable volume became reachable again.
    DriveDetected {
        /// Torrent whose storage path came back.
        torrent_id: TorrentId,
        /// Path that was probed.
        path: String,
    },
    /// A bulk action finished across all targets.
    BulkCompleted {
        /// Action label (e.g. `resume`).
        action: String,
        /// Number of targets processed.
        total: usize,
        /// Number of targets that failed.
        failed: usize,
    },
}

impl RecoveryEvent {
    /// Machine-friendly discriminator for observers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionQueued { .. } => "session_queued",
            Self::SessionUpdated { .. } => "session_updated",
            Self::SessionFinalized { .. } => "session_finalized",
            Self::QueuedSettled { .. } => "queued_settled",
            Self::DriveDetected { .. } => "drive_detected",
            Self::BulkCompleted { .. } => "bulk_completed",
        }
    }

    /// Torrent the event refers to, when it refers to a single torrent.
    #[must_use]
    pub const fn torrent_id(&self) -> Option<&TorrentId> {
        match self {
            Self::SessionStarted { torrent_id, .. }
            | Self::SessionQueued { torrent_id, .. }
            | Self::SessionUpdated { torrent_id, .. }
            | Self::SessionFinalized { torrent_id, .. }
            | Self::QueuedSettled { torrent_id, .. }
            | Self::DriveDetected { torrent_id, .. } => Some(torrent_id),
            Self::BulkCompleted { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: RecoveryEvent,
}
