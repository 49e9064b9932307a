//! Outcomes produced by the sequencer and handed back through the gate.

use serde::{Deserialize, Serialize};

use revive_torrent_core::ErrorClass;

/// Why a torrent needs the user to supply or fix a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathNeededReason {
    /// Data or volume is missing.
    Missing,
    /// Location cannot be written.
    Unwritable,
    /// Volume has no space left.
    DiskFull,
}

impl PathNeededReason {
    /// Best-effort reason derived from the daemon's error class.
    #[must_use]
    pub const fn from_error_class(class: Option<ErrorClass>) -> Self {
        match class {
            Some(ErrorClass::PermissionDenied) => Self::Unwritable,
            Some(ErrorClass::DiskFull) => Self::DiskFull,
            _ => Self::Missing,
        }
    }

    /// Translation key for the modal body.
    #[must_use]
    pub const fn message_key(self) -> &'static str {
        match self {
            Self::Missing => "recovery.path_needed.missing",
            Self::Unwritable => "recovery.path_needed.unwritable",
            Self::DiskFull => "recovery.path_needed.disk_full",
        }
    }
}

/// Result of a recovery step as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The torrent was put back on track.
    Resolved,
    /// The user must supply or fix a location.
    PathNeeded {
        /// Reason shown in the modal.
        reason: PathNeededReason,
    },
    /// A verify pass was started.
    VerifyStarted,
    /// Trackers were re-announced.
    ReannounceStarted,
    /// The step failed with a message for the user.
    Error {
        /// Human-readable failure.
        message: String,
    },
    /// Nothing needed doing.
    Noop,
}

impl RecoveryOutcome {
    /// Short machine label used in events and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::PathNeeded { .. } => "path_needed",
            Self::VerifyStarted => "verify_started",
            Self::ReannounceStarted => "reannounce_started",
            Self::Error { .. } => "error",
            Self::Noop => "noop",
        }
    }
}

/// Log label attached to an automatic resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLog {
    /// Nothing on disk: folder recreated and resumed without verification.
    AllVerifiedResuming,
    /// Verify pass started, then resumed.
    VerifyStarted,
    /// Folder recreated on request, then resumed.
    FolderRecreated,
    /// Resumed without verification on a retry.
    ResumeRetried,
}

impl RecoveryLog {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllVerifiedResuming => "all_verified_resuming",
            Self::VerifyStarted => "verify_started",
            Self::FolderRecreated => "folder_recreated",
            Self::ResumeRetried => "resume_retried",
        }
    }
}

/// Settlement value handed back to whoever invoked the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryGateOutcome {
    /// Recovery handled the request; the caller must not run its default action.
    Handled {
        /// Log label when the sequencer resolved automatically.
        log: Option<RecoveryLog>,
        /// Outcome that blocked recovery, when it ended blocked.
        blocking_outcome: Option<RecoveryOutcome>,
    },
    /// The caller should proceed with its default behaviour.
    Continue,
    /// The session was dismissed or superseded.
    Cancelled,
}

impl RecoveryGateOutcome {
    /// Handled by an automatic resolution.
    #[must_use]
    pub const fn resolved(log: RecoveryLog) -> Self {
        Self::Handled {
            log: Some(log),
            blocking_outcome: None,
        }
    }

    /// Handled but left blocked on `outcome`.
    #[must_use]
    pub const fn blocked(outcome: RecoveryOutcome) -> Self {
        Self::Handled {
            log: None,
            blocking_outcome: Some(outcome),
        }
    }

    /// Status label used in events and metrics.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Handled { .. } => "handled",
            Self::Continue => "continue",
            Self::Cancelled => "cancelled",
        }
    }
}

/// User action that triggered a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Resume the torrent.
    Resume,
    /// Re-probe and report; never occupies the gate.
    Recheck,
    /// Point the torrent at a new location; bypasses the gate.
    SetLocation,
    /// Recreate the folder and fetch everything again.
    Redownload,
    /// Retry fetching without verification.
    RetryFetch,
}

impl RecoveryAction {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Recheck => "recheck",
            Self::SetLocation => "set_location",
            Self::Redownload => "redownload",
            Self::RetryFetch => "retry_fetch",
        }
    }
}
