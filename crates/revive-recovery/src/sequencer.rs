//! Corrective steps for a single classified torrent.
//!
//! # Design
//! - Every transport call races the session's cancellation token; a cancelled
//!   sequence stops before its next call and reports `Cancelled`.
//! - Blocking classifications never touch the daemon.

use std::future::Future;
use std::sync::Arc;

use revive_torrent_core::{
    ErrorEnvelope, Feedback, FeedbackSink, FeedbackTone, TorrentError, TorrentId, TorrentSnapshot,
    TorrentTransport,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::classification::{Classification, ClassificationEvidence};
use crate::error::{RecoveryError, RecoveryResult};
use crate::keys;
use crate::outcome::{PathNeededReason, RecoveryLog, RecoveryOutcome};

/// Knobs for a sequencer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceOptions {
    /// Recreate the torrent's folder before resuming.
    pub recreate_folder: bool,
    /// Resume straight away without verification or folder work.
    pub retry_only: bool,
    /// Skip verification when nothing is on disk.
    pub skip_verify_if_empty: bool,
    /// Recreate the folder automatically when nothing is on disk.
    pub auto_create_missing_folder: bool,
    /// Missing byte count overriding the probe evidence.
    pub missing_bytes: Option<u64>,
    /// Announce a reattached volume when the run resolves.
    pub notify_drive_detected: bool,
}

/// Result of a sequencer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceResult {
    /// The torrent was put back on track.
    Resolved {
        /// What was done.
        log: RecoveryLog,
    },
    /// The user has to act before recovery can continue.
    NeedsModal {
        /// Outcome shown to the user.
        blocking_outcome: RecoveryOutcome,
        /// Classification that blocked, possibly refined during the run.
        classification: Classification,
    },
}

impl SequenceResult {
    fn path_needed(reason: PathNeededReason, classification: Classification) -> Self {
        Self::NeedsModal {
            blocking_outcome: RecoveryOutcome::PathNeeded { reason },
            classification,
        }
    }
}

/// Runs corrective steps through the transport.
#[derive(Clone)]
pub struct Sequencer {
    transport: Arc<dyn TorrentTransport>,
    feedback: Arc<dyn FeedbackSink>,
}

impl Sequencer {
    /// Sequencer bound to a transport and a feedback sink.
    #[must_use]
    pub fn new(transport: Arc<dyn TorrentTransport>, feedback: Arc<dyn FeedbackSink>) -> Self {
        Self {
            transport,
            feedback,
        }
    }

    /// Run the corrective steps for `classification`.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Cancelled`] when `cancel` fires, and
    /// [`RecoveryError::Transport`] when a daemon call fails for a reason
    /// that does not map onto a blocking outcome.
    pub async fn run(
        &self,
        torrent: &TorrentSnapshot,
        envelope: &ErrorEnvelope,
        classification: &Classification,
        options: SequenceOptions,
        cancel: &CancellationToken,
    ) -> RecoveryResult<SequenceResult> {
        ensure_live(cancel, &torrent.id)?;
        debug!(
            torrent_id = %torrent.id,
            error_class = %envelope.error_class,
            classification = classification.label(),
            "sequencing recovery"
        );

        match classification {
            Classification::VolumeLoss { .. } | Classification::Unknown => Ok(
                SequenceResult::path_needed(PathNeededReason::Missing, classification.clone()),
            ),
            Classification::PermissionDenied => Ok(SequenceResult::path_needed(
                PathNeededReason::Unwritable,
                classification.clone(),
            )),
            Classification::DiskFull { .. } => Ok(SequenceResult::path_needed(
                PathNeededReason::DiskFull,
                classification.clone(),
            )),
            Classification::MissingFiles { evidence } => {
                self.restore(torrent, *evidence, true, options, cancel).await
            }
            Classification::PartialFiles { evidence } => {
                self.restore(torrent, *evidence, false, options, cancel).await
            }
        }
    }

    async fn restore(
        &self,
        torrent: &TorrentSnapshot,
        evidence: ClassificationEvidence,
        files_missing: bool,
        options: SequenceOptions,
        cancel: &CancellationToken,
    ) -> RecoveryResult<SequenceResult> {
        let id = &torrent.id;
        let empty = options.missing_bytes.map_or(evidence.on_disk_bytes == 0, |missing| {
            missing >= evidence.expected_bytes
        });
        let auto_create = files_missing && options.auto_create_missing_folder && empty;

        let log = if options.retry_only {
            RecoveryLog::ResumeRetried
        } else if options.recreate_folder || auto_create {
            if let Some(blocked) = self.recreate_folder(torrent, cancel).await? {
                return Ok(blocked);
            }
            if options.recreate_folder {
                self.verify(id, cancel).await?;
                RecoveryLog::FolderRecreated
            } else {
                RecoveryLog::AllVerifiedResuming
            }
        } else if options.skip_verify_if_empty && empty {
            RecoveryLog::AllVerifiedResuming
        } else {
            self.verify(id, cancel).await?;
            RecoveryLog::VerifyStarted
        };

        let ids = std::slice::from_ref(id);
        guarded(cancel, id, "resume", self.transport.resume(ids)).await?;
        info!(torrent_id = %id, log = log.as_str(), "recovery resolved");

        if options.notify_drive_detected {
            self.feedback.show_feedback(
                Feedback::about(keys::DRIVE_DETECTED, torrent.name.clone()),
                FeedbackTone::Info,
            );
        }
        Ok(SequenceResult::Resolved { log })
    }

    async fn verify(&self, id: &TorrentId, cancel: &CancellationToken) -> RecoveryResult<()> {
        guarded(
            cancel,
            id,
            "verify",
            self.transport.verify(std::slice::from_ref(id)),
        )
        .await
    }

    /// Recreate the folder by pointing the torrent at its own location; the
    /// daemon creates missing directories without moving data.
    async fn recreate_folder(
        &self,
        torrent: &TorrentSnapshot,
        cancel: &CancellationToken,
    ) -> RecoveryResult<Option<SequenceResult>> {
        let Some(path) = torrent.best_known_path() else {
            return Ok(Some(SequenceResult::path_needed(
                PathNeededReason::Missing,
                Classification::Unknown,
            )));
        };
        let call = self.transport.set_location(&torrent.id, path, false);
        let Err(source) = race(cancel, &torrent.id, call).await? else {
            return Ok(None);
        };
        match source.downcast_ref::<TorrentError>() {
            Some(TorrentError::PathUnreachable { .. }) => Ok(Some(SequenceResult::path_needed(
                PathNeededReason::Missing,
                Classification::VolumeLoss {
                    path: path.to_string(),
                },
            ))),
            Some(TorrentError::PermissionDenied { .. }) => Ok(Some(SequenceResult::path_needed(
                PathNeededReason::Unwritable,
                Classification::PermissionDenied,
            ))),
            _ => Err(RecoveryError::transport("set_location", &torrent.id, source)),
        }
    }
}

fn ensure_live(cancel: &CancellationToken, id: &TorrentId) -> RecoveryResult<()> {
    if cancel.is_cancelled() {
        return Err(RecoveryError::Cancelled {
            torrent_id: id.clone(),
        });
    }
    Ok(())
}

/// Race `call` against the token, checking it before and after the await.
async fn race<T, F>(
    cancel: &CancellationToken,
    id: &TorrentId,
    call: F,
) -> RecoveryResult<anyhow::Result<T>>
where
    F: Future<Output = anyhow::Result<T>>,
{
    ensure_live(cancel, id)?;
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(RecoveryError::Cancelled { torrent_id: id.clone() });
        }
        result = call => result,
    };
    ensure_live(cancel, id)?;
    Ok(result)
}

async fn guarded<T, F>(
    cancel: &CancellationToken,
    id: &TorrentId,
    operation: &'static str,
    call: F,
) -> RecoveryResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    race(cancel, id, call)
        .await?
        .map_err(|source| RecoveryError::transport(operation, id, source))
}
