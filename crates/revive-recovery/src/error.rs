//! Error types for recovery operations.

use std::error::Error;

use revive_torrent_core::TorrentId;
use thiserror::Error;

use crate::inline_editor::InlineOwner;

/// Primary error type for recovery operations.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The session's cancellation token fired before the step completed.
    #[error("recovery cancelled")]
    Cancelled {
        /// Torrent whose recovery was aborted.
        torrent_id: TorrentId,
    },
    /// A transport call failed.
    #[error("transport operation failed")]
    Transport {
        /// Operation identifier.
        operation: &'static str,
        /// Torrent identifier when available.
        torrent_id: Option<TorrentId>,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A location supplied by the user failed validation.
    #[error("invalid location")]
    InvalidPath {
        /// Offending input.
        path: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// The location's volume is not reachable.
    #[error("location unreachable")]
    PathUnreachable {
        /// Location that could not be reached.
        path: String,
    },
    /// The location cannot be written by the daemon.
    #[error("location not writable")]
    PermissionDenied {
        /// Location that could not be written.
        path: String,
    },
    /// The torrent is not part of the tracked set.
    #[error("torrent not tracked")]
    UnknownTorrent {
        /// Identifier that was not found.
        torrent_id: TorrentId,
    },
}

impl RecoveryError {
    pub(crate) fn transport(
        operation: &'static str,
        torrent_id: &TorrentId,
        source: anyhow::Error,
    ) -> Self {
        Self::Transport {
            operation,
            torrent_id: Some(torrent_id.clone()),
            source: source.into(),
        }
    }

    /// Whether the error came from a cancelled session.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised by the inline location editor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    /// Another surface already holds editing rights.
    #[error("inline editor owned by another surface")]
    Conflict {
        /// Current owner.
        held_by: InlineOwner,
    },
    /// No editor is open.
    #[error("inline editor not open")]
    NotOpen,
    /// The editor is submitting or verifying and cannot be edited.
    #[error("inline editor busy")]
    Busy,
    /// The trimmed input was empty.
    #[error("location required")]
    EmptyPath,
}

/// Convenience alias for recovery results.
pub type RecoveryResult<T> = Result<T, RecoveryError>;
