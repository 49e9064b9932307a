//! Core torrent domain types shared across the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TorrentError;

/// Placeholder identity used when a torrent carries neither a hash nor an id.
pub const UNIDENTIFIED_FINGERPRINT: &str = "unidentified";

/// Identifier assigned to a torrent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentId(String);

impl TorrentId {
    /// Wrap a daemon identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TorrentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TorrentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for TorrentId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Stopped by the user or by an error.
    Paused,
    /// Waiting for a download, seed, or verify slot.
    Queued,
    /// Hash-checking local data.
    Checking,
    /// Actively downloading.
    Downloading,
    /// Actively seeding.
    Seeding,
    /// Halted on an error; see the error envelope.
    Error,
}

impl TorrentState {
    /// Whether the daemon accepted the torrent into an active lifecycle.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Checking | Self::Downloading | Self::Seeding
        )
    }
}

/// Daemon-side classification of a torrent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// Payload files are missing from the save path.
    MissingFiles,
    /// The save path cannot be written.
    PermissionDenied,
    /// The volume holding the save path is out of space.
    DiskFull,
    /// Payload files are present but incomplete.
    PartialFiles,
    /// Tracker returned a warning.
    TrackerWarning,
    /// Tracker returned an error.
    TrackerError,
    /// Any other local error.
    Other,
}

impl ErrorClass {
    /// Wire representation used by the daemon.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingFiles => "missingFiles",
            Self::PermissionDenied => "permissionDenied",
            Self::DiskFull => "diskFull",
            Self::PartialFiles => "partialFiles",
            Self::TrackerWarning => "trackerWarning",
            Self::TrackerError => "trackerError",
            Self::Other => "other",
        }
    }

    /// Whether the recovery engine can offer a corrective action for this class.
    #[must_use]
    pub const fn is_actionable(self) -> bool {
        matches!(
            self,
            Self::MissingFiles | Self::PermissionDenied | Self::DiskFull
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorClass {
    type Err = TorrentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "missingFiles" => Ok(Self::MissingFiles),
            "permissionDenied" => Ok(Self::PermissionDenied),
            "diskFull" => Ok(Self::DiskFull),
            "partialFiles" => Ok(Self::PartialFiles),
            "trackerWarning" => Ok(Self::TrackerWarning),
            "trackerError" => Ok(Self::TrackerError),
            "other" => Ok(Self::Other),
            unknown => Err(TorrentError::UnknownErrorClass {
                value: unknown.to_string(),
            }),
        }
    }
}

/// Error details attached to a torrent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Failure classification reported by the daemon.
    pub error_class: ErrorClass,
    /// Stable identity of the error condition, when the daemon provides one.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Human-readable daemon message.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ErrorEnvelope {
    /// Build an envelope for the given class with no fingerprint or message.
    #[must_use]
    pub const fn new(error_class: ErrorClass) -> Self {
        Self {
            error_class,
            fingerprint: None,
            error_message: None,
        }
    }

    /// Parse an envelope from raw wire values, rejecting unknown classes.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::UnknownErrorClass`] when `error_class` is not a
    /// recognised daemon class.
    pub fn from_wire(
        error_class: &str,
        fingerprint: Option<String>,
        error_message: Option<String>,
    ) -> Result<Self, TorrentError> {
        Ok(Self {
            error_class: error_class.parse()?,
            fingerprint,
            error_message,
        })
    }

    /// Attach a daemon-provided fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Attach a daemon message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Read-only torrent snapshot as seen by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentSnapshot {
    /// Daemon identifier.
    pub id: TorrentId,
    /// Info-hash, when metadata is known.
    #[serde(default)]
    pub hash: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Error envelope when the torrent is in an error state.
    #[serde(default)]
    pub error: Option<ErrorEnvelope>,
    /// Save path reported by the daemon.
    #[serde(default)]
    pub save_path: Option<String>,
    /// Download directory reported by the daemon.
    #[serde(default)]
    pub download_dir: Option<String>,
    /// Bytes still required for completion.
    #[serde(default)]
    pub left_until_done: Option<u64>,
}

impl TorrentSnapshot {
    /// Construct a healthy snapshot with the given id and name.
    #[must_use]
    pub fn new(id: impl Into<TorrentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hash: None,
            name: name.into(),
            state: TorrentState::Paused,
            error: None,
            save_path: None,
            download_dir: None,
            left_until_done: None,
        }
    }

    /// Best known storage location: the save path, falling back to the download directory.
    #[must_use]
    pub fn best_known_path(&self) -> Option<&str> {
        [self.save_path.as_deref(), self.download_dir.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|path| !path.is_empty())
    }

    /// Error class, when the torrent carries an envelope.
    #[must_use]
    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error.as_ref().map(|envelope| envelope.error_class)
    }
}

/// Stable identity for a torrent's current error condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryFingerprint(String);

impl RecoveryFingerprint {
    /// Borrow the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecoveryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the recovery fingerprint for a torrent.
///
/// The identity part falls back from the info-hash to the daemon id and
/// finally to [`UNIDENTIFIED_FINGERPRINT`]. A daemon-provided envelope
/// fingerprint is scoped under that identity so two torrents never share a
/// fingerprint even when the daemon reuses error identities.
#[must_use]
pub fn fingerprint_of(torrent: &TorrentSnapshot) -> RecoveryFingerprint {
    let identity = torrent
        .hash
        .as_deref()
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(|hash| format!("hash:{}", hash.to_ascii_lowercase()))
        .or_else(|| {
            let id = torrent.id.as_str().trim();
            (!id.is_empty()).then(|| format!("id:{id}"))
        })
        .unwrap_or_else(|| UNIDENTIFIED_FINGERPRINT.to_string());

    let condition = torrent
        .error
        .as_ref()
        .and_then(|envelope| envelope.fingerprint.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match condition {
        Some(condition) => RecoveryFingerprint(format!("{identity}#{condition}")),
        None => RecoveryFingerprint(identity),
    }
}

/// Per-file progress reported in torrent details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentFileDetail {
    /// Path relative to the torrent root.
    pub path: String,
    /// Expected file size in bytes.
    pub length: u64,
    /// Bytes currently present and verified on disk.
    pub bytes_completed: u64,
}

/// Detailed torrent view returned by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentDetail {
    /// Daemon identifier.
    pub id: TorrentId,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Download directory currently assigned.
    #[serde(default)]
    pub download_dir: Option<String>,
    /// Per-file progress.
    #[serde(default)]
    pub files: Vec<TorrentFileDetail>,
}

impl TorrentDetail {
    /// Total payload size the torrent expects on disk.
    #[must_use]
    pub fn expected_bytes(&self) -> u64 {
        self.files
            .iter()
            .fold(0_u64, |acc, file| acc.saturating_add(file.length))
    }

    /// Bytes the daemon currently finds on disk.
    #[must_use]
    pub fn on_disk_bytes(&self) -> u64 {
        self.files
            .iter()
            .fold(0_u64, |acc, file| acc.saturating_add(file.bytes_completed))
    }
}

/// Free-space report for a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSpace {
    /// Path that was inspected.
    pub path: String,
    /// Bytes available to the daemon.
    pub size_bytes: u64,
    /// Total capacity of the volume.
    pub total_size: u64,
}

/// Where the UI runs relative to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// UI and daemon share a host and filesystem.
    Local,
    /// UI talks to a daemon on another host.
    Remote,
}

/// Snapshot of what the hosting environment can do. Read, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentCapabilities {
    /// Local or remote execution.
    pub execution_model: ExecutionModel,
    /// Whether free-space checks are available for path probing.
    pub can_check_free_space: bool,
}

impl EnvironmentCapabilities {
    /// Capabilities of a local desktop shell.
    #[must_use]
    pub const fn local() -> Self {
        Self {
            execution_model: ExecutionModel::Local,
            can_check_free_space: true,
        }
    }

    /// Capabilities of a browser talking to a remote daemon.
    #[must_use]
    pub const fn remote() -> Self {
        Self {
            execution_model: ExecutionModel::Remote,
            can_check_free_space: false,
        }
    }

    /// Whether reattached volumes can be detected without user action.
    #[must_use]
    pub const fn supports_volume_polling(self) -> bool {
        matches!(self.execution_model, ExecutionModel::Local) && self.can_check_free_space
    }
}

/// Tone used when surfacing feedback to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTone {
    /// Informational message.
    Info,
    /// Successful completion.
    Success,
    /// Something needs attention.
    Warning,
    /// Terminal failure.
    Error,
}

/// Localisable feedback message: a translation key plus an optional subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Translation key.
    pub key: String,
    /// Torrent name or path the message refers to.
    pub subject: Option<String>,
}

impl Feedback {
    /// Feedback with no subject.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            subject: None,
        }
    }

    /// Feedback about a specific subject.
    #[must_use]
    pub fn about(key: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            subject: Some(subject.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn errored(id: &str, hash: Option<&str>, condition: Option<&str>) -> TorrentSnapshot {
        let mut torrent = TorrentSnapshot::new(id, "demo");
        torrent.hash = hash.map(str::to_string);
        let mut envelope = ErrorEnvelope::new(ErrorClass::MissingFiles);
        envelope.fingerprint = condition.map(str::to_string);
        torrent.error = Some(envelope);
        torrent
    }

    #[test]
    fn error_class_round_trips_wire_names() -> Result<(), TorrentError> {
        for class in [
            ErrorClass::MissingFiles,
            ErrorClass::PermissionDenied,
            ErrorClass::DiskFull,
            ErrorClass::PartialFiles,
            ErrorClass::TrackerWarning,
            ErrorClass::TrackerError,
            ErrorClass::Other,
        ] {
            assert_eq!(class.as_str().parse::<ErrorClass>()?, class);
        }
        Ok(())
    }

    #[test]
    fn unknown_error_class_is_rejected_at_the_boundary() {
        let err = ErrorEnvelope::from_wire("cosmicRay", None, None)
            .expect_err("unknown class must be rejected");
        assert!(matches!(err, TorrentError::UnknownErrorClass { value } if value == "cosmicRay"));

        let json = serde_json::json!({ "errorClass": "cosmicRay" });
        assert!(serde_json::from_value::<ErrorEnvelope>(json).is_err());
    }

    #[test]
    fn only_storage_classes_are_actionable() {
        assert!(ErrorClass::MissingFiles.is_actionable());
        assert!(ErrorClass::PermissionDenied.is_actionable());
        assert!(ErrorClass::DiskFull.is_actionable());
        assert!(!ErrorClass::PartialFiles.is_actionable());
        assert!(!ErrorClass::TrackerError.is_actionable());
        assert!(!ErrorClass::Other.is_actionable());
    }

    #[test]
    fn fingerprint_prefers_hash_then_id_then_placeholder() {
        let hashed = errored("7", Some("ABCDEF"), None);
        assert_eq!(fingerprint_of(&hashed).as_str(), "hash:abcdef");

        let by_id = errored("7", Some("  "), None);
        assert_eq!(fingerprint_of(&by_id).as_str(), "id:7");

        let anonymous = errored("", None, None);
        assert_eq!(fingerprint_of(&anonymous).as_str(), UNIDENTIFIED_FINGERPRINT);

        let scoped = errored("7", None, Some("missing-42"));
        assert_eq!(fingerprint_of(&scoped).as_str(), "id:7#missing-42");
    }

    #[test]
    fn best_known_path_skips_blank_save_path() {
        let mut torrent = TorrentSnapshot::new("1", "demo");
        torrent.save_path = Some("   ".into());
        torrent.download_dir = Some("/data/downloads".into());
        assert_eq!(torrent.best_known_path(), Some("/data/downloads"));
        torrent.download_dir = None;
        assert_eq!(torrent.best_known_path(), None);
    }

    #[test]
    fn detail_sums_expected_and_on_disk_bytes() {
        let detail = TorrentDetail {
            id: TorrentId::from(3_u64),
            state: TorrentState::Error,
            download_dir: Some("/data".into()),
            files: vec![
                TorrentFileDetail {
                    path: "a.mkv".into(),
                    length: 100,
                    bytes_completed: 40,
                },
                TorrentFileDetail {
                    path: "a.srt".into(),
                    length: 10,
                    bytes_completed: 0,
                },
            ],
        };
        assert_eq!(detail.expected_bytes(), 110);
        assert_eq!(detail.on_disk_bytes(), 40);
    }

    #[test]
    fn volume_polling_needs_local_free_space_support() {
        assert!(EnvironmentCapabilities::local().supports_volume_polling());
        assert!(!EnvironmentCapabilities::remote().supports_volume_polling());
        let local_without_space = EnvironmentCapabilities {
            execution_model: ExecutionModel::Local,
            can_check_free_space: false,
        };
        assert!(!local_without_space.supports_volume_polling());
    }

    fn identity_strategy() -> impl Strategy<Value = (String, Option<String>, Option<String>)> {
        (
            "[0-9]{1,6}",
            proptest::option::of("[0-9a-f]{40}"),
            proptest::option::of("[a-z0-9-]{1,12}"),
        )
    }

    proptest! {
        #[test]
        fn distinct_torrents_never_share_a_fingerprint(
            (left_id, left_hash, left_condition) in identity_strategy(),
            (right_id, right_hash, right_condition) in identity_strategy(),
        ) {
            prop_assume!(left_id != right_id);
            prop_assume!(left_hash.is_none() || left_hash != right_hash);
            let left = errored(&left_id, left_hash.as_deref(), left_condition.as_deref());
            let right = errored(&right_id, right_hash.as_deref(), right_condition.as_deref());
            prop_assert_ne!(fingerprint_of(&left), fingerprint_of(&right));
        }

        #[test]
        fn fingerprint_is_stable_for_the_same_torrent(
            (id, hash, condition) in identity_strategy(),
        ) {
            let torrent = errored(&id, hash.as_deref(), condition.as_deref());
            let copy = torrent.clone();
            prop_assert_eq!(fingerprint_of(&torrent), fingerprint_of(&copy));
        }
    }
}
