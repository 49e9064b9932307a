//! Diagnosis of a torrent's error state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use revive_torrent_core::{
    EnvironmentCapabilities, ErrorClass, ErrorEnvelope, TorrentId, TorrentSnapshot,
};
use serde::Serialize;

use crate::probe::{ProbeCache, ProbeKind, ProbeResult, Prober};

/// Byte counts gathered by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassificationEvidence {
    /// Bytes the torrent expects on disk.
    pub expected_bytes: u64,
    /// Bytes found on disk.
    pub on_disk_bytes: u64,
}

impl ClassificationEvidence {
    /// Bytes that still need to be fetched or located.
    #[must_use]
    pub const fn missing_bytes(self) -> u64 {
        self.expected_bytes.saturating_sub(self.on_disk_bytes)
    }
}

/// Why a torrent is in error, before a corrective action is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    /// The location is reachable but files are genuinely absent.
    MissingFiles {
        /// Probe evidence.
        evidence: ClassificationEvidence,
    },
    /// The location's volume is unreachable.
    VolumeLoss {
        /// Location that failed the reachability probe.
        path: String,
    },
    /// The location cannot be written.
    PermissionDenied,
    /// The volume is out of space.
    DiskFull {
        /// Free bytes reported for the volume, when known.
        available_bytes: Option<u64>,
    },
    /// Every byte is present; pieces need re-verification.
    PartialFiles {
        /// Probe evidence.
        evidence: ClassificationEvidence,
    },
    /// Not enough information to diagnose.
    Unknown,
}

impl Classification {
    /// Short machine label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MissingFiles { .. } => "missing_files",
            Self::VolumeLoss { .. } => "volume_loss",
            Self::PermissionDenied => "permission_denied",
            Self::DiskFull { .. } => "disk_full",
            Self::PartialFiles { .. } => "partial_files",
            Self::Unknown => "unknown",
        }
    }

    /// Probe evidence, when the classification carries any.
    #[must_use]
    pub const fn evidence(&self) -> Option<ClassificationEvidence> {
        match self {
            Self::MissingFiles { evidence } | Self::PartialFiles { evidence } => Some(*evidence),
            _ => None,
        }
    }
}

/// Classify an error envelope.
///
/// Returns `None` for classes the engine has no corrective action for. A
/// missing-files envelope is refined with the probe: unreachable location
/// means volume loss, fewer bytes than expected means missing files, and a
/// complete payload means the pieces only need verifying.
#[must_use]
pub fn classify(
    envelope: &ErrorEnvelope,
    path: Option<&str>,
    capabilities: EnvironmentCapabilities,
    probe: Option<&ProbeResult>,
) -> Option<Classification> {
    match envelope.error_class {
        ErrorClass::PermissionDenied => Some(Classification::PermissionDenied),
        ErrorClass::DiskFull => Some(Classification::DiskFull {
            available_bytes: probe.and_then(|probe| probe.free_bytes),
        }),
        ErrorClass::MissingFiles => {
            let (Some(path), Some(probe)) = (path, probe) else {
                return Some(Classification::Unknown);
            };
            let evidence = ClassificationEvidence {
                expected_bytes: probe.expected_bytes,
                on_disk_bytes: probe.on_disk_bytes,
            };
            Some(match probe.kind {
                ProbeKind::PathUnreachable if capabilities.can_check_free_space => {
                    Classification::VolumeLoss {
                        path: path.to_string(),
                    }
                }
                ProbeKind::DataMissing => Classification::MissingFiles { evidence },
                ProbeKind::Ok => Classification::PartialFiles { evidence },
                ProbeKind::PathUnreachable | ProbeKind::Unknown => Classification::Unknown,
            })
        }
        ErrorClass::PartialFiles
        | ErrorClass::TrackerWarning
        | ErrorClass::TrackerError
        | ErrorClass::Other => None,
    }
}

/// Classifier that consults the probe cache before probing.
#[derive(Clone)]
pub struct Classifier {
    cache: Arc<ProbeCache>,
    prober: Prober,
    capabilities: EnvironmentCapabilities,
}

impl Classifier {
    /// Classifier over a shared cache.
    #[must_use]
    pub const fn new(
        cache: Arc<ProbeCache>,
        prober: Prober,
        capabilities: EnvironmentCapabilities,
    ) -> Self {
        Self {
            cache,
            prober,
            capabilities,
        }
    }

    /// Classify the torrent's current error, probing only when the class needs it.
    pub async fn classify(&self, torrent: &TorrentSnapshot) -> Option<Classification> {
        let envelope = torrent.error.as_ref()?;
        if !envelope.error_class.is_actionable() {
            return None;
        }
        let probe = match envelope.error_class {
            ErrorClass::MissingFiles | ErrorClass::DiskFull => Some(
                self.cache
                    .get_or_probe(&torrent.id, || self.prober.probe(torrent))
                    .await,
            ),
            _ => None,
        };
        classify(
            envelope,
            torrent.best_known_path(),
            self.capabilities,
            probe.as_ref(),
        )
    }

    /// Forget any cached probe for `id` so the next classification re-probes.
    pub fn invalidate(&self, id: &TorrentId) {
        self.cache.clear(id);
    }

    /// The prober backing this classifier.
    #[must_use]
    pub const fn prober(&self) -> &Prober {
        &self.prober
    }

    /// The shared probe cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ProbeCache> {
        &self.cache
    }
}

/// Latest classification per torrent, read by the volume-loss poller.
#[derive(Default)]
pub struct ClassificationRegistry {
    entries: Mutex<HashMap<TorrentId, (TorrentSnapshot, Classification)>>,
}

impl ClassificationRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the classification for a torrent.
    pub fn record(&self, torrent: &TorrentSnapshot, classification: Classification) {
        self.lock()
            .insert(torrent.id.clone(), (torrent.clone(), classification));
    }

    /// Forget the classification for a torrent.
    pub fn remove(&self, id: &TorrentId) {
        self.lock().remove(id);
    }

    /// Current classification for a torrent.
    #[must_use]
    pub fn get(&self, id: &TorrentId) -> Option<Classification> {
        self.lock().get(id).map(|(_, classification)| classification.clone())
    }

    /// Torrents currently classified as volume loss.
    #[must_use]
    pub fn volume_loss(&self) -> Vec<TorrentSnapshot> {
        let mut torrents: Vec<TorrentSnapshot> = self
            .lock()
            .values()
            .filter(|(_, classification)| {
                matches!(classification, Classification::VolumeLoss { .. })
            })
            .map(|(torrent, _)| torrent.clone())
            .collect();
        torrents.sort_by(|left, right| left.id.cmp(&right.id));
        torrents
    }

    /// Keep only torrents that are present and still carry an actionable error.
    pub fn sync(&self, torrents: &[TorrentSnapshot]) {
        let actionable: HashSet<&TorrentId> = torrents
            .iter()
            .filter(|torrent| torrent.error_class().is_some_and(ErrorClass::is_actionable))
            .map(|torrent| &torrent.id)
            .collect();
        self.lock().retain(|id, _| actionable.contains(id));
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TorrentId, (TorrentSnapshot, Classification)>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
