//! Error types for torrent transport operations.

use std::error::Error;

use thiserror::Error;

use crate::model::TorrentId;

/// Daemon error code reported when a destination path cannot be reached.
pub const PATH_UNREACHABLE_CODE: u16 = 4001;
/// Daemon error code reported when a destination path cannot be written.
pub const PERMISSION_DENIED_CODE: u16 = 4003;

/// Primary error type for torrent transport operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Operation is not supported by the connected daemon.
    #[error("torrent operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Operation failed in the connected daemon.
    #[error("torrent operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Torrent identifier when available.
        torrent_id: Option<TorrentId>,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Torrent was not found.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent identifier.
        torrent_id: TorrentId,
    },
    /// The daemon reported an error class this client does not recognise.
    #[error("unknown torrent error class")]
    UnknownErrorClass {
        /// Raw error class received on the wire.
        value: String,
    },
    /// Destination path is not reachable (unmounted volume, offline share).
    #[error("path unreachable")]
    PathUnreachable {
        /// Path that could not be reached.
        path: String,
        /// Daemon error code.
        code: u16,
    },
    /// Destination path exists but cannot be written.
    #[error("permission denied")]
    PermissionDenied {
        /// Path that could not be written.
        path: String,
        /// Daemon error code.
        code: u16,
    },
}

impl TorrentError {
    /// Map a daemon filesystem error code onto a typed error.
    ///
    /// Unknown codes are treated as permission failures, matching the daemon's
    /// own fallback classification.
    #[must_use]
    pub fn from_daemon_code(code: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        if code == PATH_UNREACHABLE_CODE {
            Self::PathUnreachable { path, code }
        } else {
            Self::PermissionDenied { path, code }
        }
    }
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;
