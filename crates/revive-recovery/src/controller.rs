//! Entry points the UI layer calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use revive_config::RecoveryConfig;
use revive_events::{EventBus, RecoveryEvent};
use revive_telemetry::Metrics;
use revive_torrent_core::{
    DirectoryBrowser, EnvironmentCapabilities, ErrorClass, ExecutionModel, Feedback, FeedbackSink,
    FeedbackTone, RecoveryFingerprint, TorrentError, TorrentId, TorrentSnapshot, TorrentTransport,
    fingerprint_of,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bulk::{BatchOutcome, BatchReport, BulkScheduler, ItemOutcome};
use crate::classification::{ClassificationRegistry, Classifier};
use crate::error::{RecoveryError, RecoveryResult};
use crate::gate::{GateSnapshot, RecoveryGate};
use crate::inline_editor::{InlineLocationEditor, LocationApplier};
use crate::keys;
use crate::outcome::{RecoveryAction, RecoveryGateOutcome, RecoveryLog, RecoveryOutcome};
use crate::poller::VolumeLossPoller;
use crate::probe::{ProbeCache, Prober};
use crate::sequencer::{SequenceOptions, Sequencer};

/// Knobs for [`RecoveryController::resume_torrent_with_recovery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeOptions {
    /// Skip per-torrent toasts; bulk callers surface an aggregate instead.
    pub suppress_feedback: bool,
}

/// Result of a resume request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No recovery was needed and the torrent was resumed.
    Applied {
        /// Whether the daemon reported an active state before the deadline.
        active: bool,
    },
    /// Recovery put the torrent back on track.
    Recovered {
        /// What the sequencer did.
        log: Option<RecoveryLog>,
    },
    /// Recovery ended blocked on user input.
    Blocked {
        /// Outcome shown to the user.
        outcome: RecoveryOutcome,
    },
    /// The recovery session was dismissed.
    Cancelled,
}

/// Result of [`RecoveryController::pick_location`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationPick {
    /// A directory was chosen and applied.
    Applied {
        /// Chosen directory.
        location: String,
        /// Fingerprint still under recovery, if any.
        awaiting: Option<RecoveryFingerprint>,
    },
    /// The picker was dismissed.
    Dismissed,
    /// No native picker can browse the daemon's filesystem.
    InlineEditorRequired,
}

/// Owns the recovery engine and exposes the operations the UI calls.
pub struct RecoveryController {
    config: RecoveryConfig,
    capabilities: EnvironmentCapabilities,
    transport: Arc<dyn TorrentTransport>,
    feedback: Arc<dyn FeedbackSink>,
    browser: Option<Arc<dyn DirectoryBrowser>>,
    classifier: Classifier,
    registry: Arc<ClassificationRegistry>,
    gate: Arc<RecoveryGate>,
    poller: Arc<VolumeLossPoller>,
    bulk: BulkScheduler,
    events: EventBus,
    snapshots: Mutex<HashMap<TorrentId, TorrentSnapshot>>,
}

impl RecoveryController {
    /// Wire the engine over the given collaborators.
    #[must_use]
    pub fn new(
        config: RecoveryConfig,
        capabilities: EnvironmentCapabilities,
        transport: Arc<dyn TorrentTransport>,
        feedback: Arc<dyn FeedbackSink>,
        metrics: Metrics,
    ) -> Self {
        let events = EventBus::with_capacity(config.event_replay_capacity);
        let cache = Arc::new(ProbeCache::new(config.probe_ttl(), metrics.clone()));
        let prober = Prober::new(Arc::clone(&transport), capabilities);
        let classifier = Classifier::new(cache, prober, capabilities);
        let sequencer = Sequencer::new(Arc::clone(&transport), Arc::clone(&feedback));
        let registry = Arc::new(ClassificationRegistry::new());
        let gate = Arc::new(RecoveryGate::new(
            classifier.clone(),
            sequencer.clone(),
            Arc::clone(&registry),
            events.clone(),
            metrics.clone(),
        ));
        let poller = Arc::new(VolumeLossPoller::new(
            classifier.clone(),
            sequencer,
            Arc::clone(&gate),
            Arc::clone(&registry),
            Arc::clone(&feedback),
            events.clone(),
            metrics.clone(),
            capabilities,
            config.volume_poll_interval(),
            config.auto_create_missing_folder,
        ));
        let bulk = BulkScheduler::new(config.bulk_concurrency, metrics);
        Self {
            config,
            capabilities,
            transport,
            feedback,
            browser: None,
            classifier,
            registry,
            gate,
            poller,
            bulk,
            events,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a native directory picker.
    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn DirectoryBrowser>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Inline editor that submits through this controller.
    #[must_use]
    pub fn inline_editor(self: &Arc<Self>) -> InlineLocationEditor {
        InlineLocationEditor::new(Arc::clone(self) as Arc<dyn LocationApplier>)
    }

    /// Start volume-loss polling; `None` when the environment cannot poll.
    pub fn start_polling(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        Arc::clone(&self.poller).start(cancel)
    }

    /// Request recovery for a torrent; `None` when no gating is needed.
    pub async fn request_recovery(
        &self,
        torrent: &TorrentSnapshot,
        action: RecoveryAction,
    ) -> Option<RecoveryGateOutcome> {
        self.remember(torrent);
        self.gate
            .request_recovery(torrent, action, self.sequence_options())
            .await
    }

    /// Resume a torrent, routing errored torrents through recovery first.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Transport`] when the plain resume fails.
    pub async fn resume_torrent_with_recovery(
        &self,
        torrent: &TorrentSnapshot,
        options: ResumeOptions,
    ) -> RecoveryResult<ResumeOutcome> {
        let outcome = match self.request_recovery(torrent, RecoveryAction::Resume).await {
            None | Some(RecoveryGateOutcome::Continue) => {
                let ids = std::slice::from_ref(&torrent.id);
                if let Err(source) = self.transport.resume(ids).await {
                    warn!(torrent_id = %torrent.id, error = %source, "resume failed");
                    if !options.suppress_feedback {
                        self.notify(keys::FAILED, torrent, FeedbackTone::Warning);
                    }
                    return Err(RecoveryError::transport("resume", &torrent.id, source));
                }
                let active = self.wait_for_active_state(&torrent.id).await;
                ResumeOutcome::Applied { active }
            }
            Some(RecoveryGateOutcome::Handled {
                blocking_outcome: Some(outcome),
                ..
            }) => ResumeOutcome::Blocked { outcome },
            Some(RecoveryGateOutcome::Handled { log, .. }) => ResumeOutcome::Recovered { log },
            Some(RecoveryGateOutcome::Cancelled) => ResumeOutcome::Cancelled,
        };
        if !options.suppress_feedback {
            match &outcome {
                ResumeOutcome::Applied { active: true } | ResumeOutcome::Recovered { .. } => {
                    self.notify(keys::RESUMED, torrent, FeedbackTone::Success);
                }
                ResumeOutcome::Applied { active: false } => {
                    self.notify(keys::RESUME_PENDING, torrent, FeedbackTone::Info);
                }
                ResumeOutcome::Blocked { outcome } => self.announce(torrent, outcome),
                ResumeOutcome::Cancelled => {}
            }
        }
        Ok(outcome)
    }

    /// Poll the daemon until the torrent reports an active state.
    ///
    /// Returns `false` once the configured deadline passes; lookup failures
    /// count as "not yet active".
    pub async fn wait_for_active_state(&self, id: &TorrentId) -> bool {
        let deadline = Instant::now() + self.config.active_wait_deadline();
        loop {
            match self.transport.get_torrent_details(id).await {
                Ok(detail) if detail.state.is_active() => return true,
                Ok(detail) => debug!(torrent_id = %id, state = ?detail.state, "waiting for active state"),
                Err(err) => debug!(torrent_id = %id, error = %err, "state lookup failed"),
            }
            if Instant::now() >= deadline {
                debug!(torrent_id = %id, "torrent did not become active before the deadline");
                return false;
            }
            tokio::time::sleep(self.config.active_wait_interval()).await;
        }
    }

    /// Recreate the torrent's folder, verify, and resume.
    pub async fn execute_redownload(&self, torrent: &TorrentSnapshot) -> RecoveryOutcome {
        let options = SequenceOptions {
            recreate_folder: true,
            ..self.sequence_options()
        };
        let outcome = self
            .run_action(torrent, RecoveryAction::Redownload, options)
            .await
            .unwrap_or(RecoveryOutcome::Noop);
        self.announce(torrent, &outcome);
        outcome
    }

    /// Resume without verification; torrents with nothing to recover are
    /// re-announced instead.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Transport`] when the re-announce fails.
    pub async fn execute_retry_fetch(
        &self,
        torrent: &TorrentSnapshot,
    ) -> RecoveryResult<RecoveryOutcome> {
        let options = SequenceOptions {
            retry_only: true,
            ..self.sequence_options()
        };
        let outcome = match self
            .run_action(torrent, RecoveryAction::RetryFetch, options)
            .await
        {
            Some(outcome) => outcome,
            None => {
                self.transport
                    .reannounce(std::slice::from_ref(&torrent.id))
                    .await
                    .map_err(|source| RecoveryError::transport("reannounce", &torrent.id, source))?;
                RecoveryOutcome::ReannounceStarted
            }
        };
        self.announce(torrent, &outcome);
        Ok(outcome)
    }

    /// Resume many torrents through the bounded worker pool.
    pub async fn bulk_resume(self: &Arc<Self>, targets: Vec<TorrentSnapshot>) -> BatchReport {
        let total = targets.len();
        let controller = Arc::clone(self);
        let report = self
            .bulk
            .run("resume", targets, move |torrent| {
                let controller = Arc::clone(&controller);
                async move {
                    let options = ResumeOptions {
                        suppress_feedback: true,
                    };
                    let item = match controller
                        .resume_torrent_with_recovery(&torrent, options)
                        .await?
                    {
                        ResumeOutcome::Applied { .. } | ResumeOutcome::Recovered { .. } => {
                            ItemOutcome::Applied
                        }
                        ResumeOutcome::Cancelled => ItemOutcome::Cancelled,
                        ResumeOutcome::Blocked { outcome } => ItemOutcome::Failed {
                            message: outcome.label().to_string(),
                        },
                    };
                    Ok(item)
                }
            })
            .await;

        let failed = report.failed();
        if report.outcome == BatchOutcome::Success {
            self.feedback
                .show_feedback(Feedback::new(keys::BULK_RESUME_SUCCESS), FeedbackTone::Success);
        } else {
            self.feedback
                .show_feedback(Feedback::new(keys::BULK_RESUME_FAILED), FeedbackTone::Warning);
        }
        self.events.send(RecoveryEvent::BulkCompleted {
            action: report.action.clone(),
            total,
            failed,
        });
        report
    }

    /// Ask the user for a new location through the native picker.
    ///
    /// # Errors
    ///
    /// Propagates picker failures and [`RecoveryController::apply_location`]
    /// errors.
    pub async fn pick_location(&self, torrent: &TorrentSnapshot) -> RecoveryResult<LocationPick> {
        let browser = match (&self.browser, self.capabilities.execution_model) {
            (Some(browser), ExecutionModel::Local) => browser,
            _ => {
                self.notify(keys::INLINE_EDITOR_REQUIRED, torrent, FeedbackTone::Info);
                return Ok(LocationPick::InlineEditorRequired);
            }
        };
        let picked = browser
            .browse_directory(torrent.best_known_path())
            .await
            .map_err(|source| RecoveryError::transport("browse_directory", &torrent.id, source))?;
        let Some(location) = picked else {
            return Ok(LocationPick::Dismissed);
        };
        let awaiting = self.apply_location(torrent, &location).await?;
        Ok(LocationPick::Applied { location, awaiting })
    }

    /// Point the torrent at `location` and continue its recovery there.
    ///
    /// Returns the fingerprint still tracked by the gate after the retry, so
    /// callers can wait for the session to clear.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::InvalidPath`] for malformed input,
    /// [`RecoveryError::PathUnreachable`] or [`RecoveryError::PermissionDenied`]
    /// when the daemon rejects the location, and [`RecoveryError::Transport`]
    /// for other daemon failures.
    pub async fn apply_location(
        &self,
        torrent: &TorrentSnapshot,
        location: &str,
    ) -> RecoveryResult<Option<RecoveryFingerprint>> {
        let location = validate_location(location)?;
        self.transport
            .set_location(&torrent.id, &location, false)
            .await
            .map_err(|source| location_error(&torrent.id, &location, source))?;
        self.classifier.invalidate(&torrent.id);
        info!(torrent_id = %torrent.id, location = %location, "location applied");
        self.notify(keys::LOCATION_APPLIED, torrent, FeedbackTone::Info);

        let mut relocated = torrent.clone();
        relocated.save_path = Some(location.clone());
        relocated.download_dir = Some(location.clone());
        self.remember(&relocated);

        let fingerprint = fingerprint_of(torrent);
        if self.gate.is_active(&fingerprint) {
            self.gate.update_location(&fingerprint, &location);
            let outcome = self.gate.retry_active(self.sequence_options()).await;
            debug!(torrent_id = %torrent.id, outcome = ?outcome, "active recovery retried at new location");
            return Ok(self.gate.is_pending(&fingerprint).then_some(fingerprint));
        }
        if self.gate.update_location(&fingerprint, &location) {
            return Ok(Some(fingerprint));
        }

        self.transport
            .resume(std::slice::from_ref(&torrent.id))
            .await
            .map_err(|source| RecoveryError::transport("resume", &torrent.id, source))?;
        Ok(None)
    }

    /// Reconcile engine state with the currently visible torrents.
    ///
    /// Probes and classifications are dropped for torrents that disappeared
    /// or whose error is no longer actionable. Queued requests and the active
    /// session for such torrents are settled with `Continue`, queue first so a
    /// stale entry is never admitted.
    pub fn sync_torrents(&self, torrents: &[TorrentSnapshot]) {
        let actionable: HashSet<TorrentId> = torrents
            .iter()
            .filter(|torrent| torrent.error_class().is_some_and(ErrorClass::is_actionable))
            .map(|torrent| torrent.id.clone())
            .collect();
        self.classifier.cache().prune(&actionable);
        self.registry.sync(torrents);
        {
            let mut snapshots = self.lock_snapshots();
            snapshots.clear();
            snapshots.extend(
                torrents
                    .iter()
                    .map(|torrent| (torrent.id.clone(), torrent.clone())),
            );
        }
        let dropped = self
            .gate
            .settle_queued_unless(|id| actionable.contains(id), &RecoveryGateOutcome::Continue);
        if dropped > 0 {
            info!(dropped, "queued recoveries cleared outside the engine");
        }
        if let Some(active) = self.gate.active_torrent_id()
            && !actionable.contains(&active)
        {
            info!(torrent_id = %active, "active recovery cleared outside the engine");
            self.gate.resolve_active(RecoveryGateOutcome::Continue);
        }
    }

    /// Read-only view of the active session and queue.
    #[must_use]
    pub fn gate_snapshot(&self) -> GateSnapshot {
        self.gate.snapshot()
    }

    /// The single-flight gate.
    #[must_use]
    pub const fn gate(&self) -> &Arc<RecoveryGate> {
        &self.gate
    }

    /// The volume-loss poller.
    #[must_use]
    pub const fn poller(&self) -> &Arc<VolumeLossPoller> {
        &self.poller
    }

    /// The recovery event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Last known snapshot of a torrent.
    #[must_use]
    pub fn snapshot_of(&self, id: &TorrentId) -> Option<TorrentSnapshot> {
        self.lock_snapshots().get(id).cloned()
    }

    /// Re-run the active session when it belongs to `torrent`, otherwise go
    /// through the gate. `None` means no recovery was needed.
    async fn run_action(
        &self,
        torrent: &TorrentSnapshot,
        action: RecoveryAction,
        options: SequenceOptions,
    ) -> Option<RecoveryOutcome> {
        self.remember(torrent);
        if self.gate.is_active(&fingerprint_of(torrent)) {
            return self.gate.retry_active(options).await;
        }
        let settled = self.gate.request_recovery(torrent, action, options).await?;
        Some(match settled {
            RecoveryGateOutcome::Handled {
                blocking_outcome: Some(outcome),
                ..
            } => outcome,
            RecoveryGateOutcome::Handled {
                log: Some(RecoveryLog::VerifyStarted),
                ..
            } => RecoveryOutcome::VerifyStarted,
            RecoveryGateOutcome::Handled { .. } => RecoveryOutcome::Resolved,
            RecoveryGateOutcome::Continue | RecoveryGateOutcome::Cancelled => RecoveryOutcome::Noop,
        })
    }

    fn sequence_options(&self) -> SequenceOptions {
        SequenceOptions {
            auto_create_missing_folder: self.config.auto_create_missing_folder,
            ..SequenceOptions::default()
        }
    }

    fn announce(&self, torrent: &TorrentSnapshot, outcome: &RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::Resolved => self.notify(keys::RESUMED, torrent, FeedbackTone::Success),
            RecoveryOutcome::VerifyStarted => {
                self.notify(keys::VERIFY_STARTED, torrent, FeedbackTone::Info);
            }
            RecoveryOutcome::ReannounceStarted => {
                self.notify(keys::REANNOUNCE_STARTED, torrent, FeedbackTone::Info);
            }
            RecoveryOutcome::PathNeeded { reason } => {
                self.notify(reason.message_key(), torrent, FeedbackTone::Warning);
            }
            RecoveryOutcome::Error { .. } => self.notify(keys::FAILED, torrent, FeedbackTone::Warning),
            RecoveryOutcome::Noop => {}
        }
    }

    fn notify(&self, key: &str, torrent: &TorrentSnapshot, tone: FeedbackTone) {
        self.feedback
            .show_feedback(Feedback::about(key, torrent.name.clone()), tone);
    }

    fn remember(&self, torrent: &TorrentSnapshot) {
        self.lock_snapshots()
            .insert(torrent.id.clone(), torrent.clone());
    }

    fn lock_snapshots(&self) -> MutexGuard<'_, HashMap<TorrentId, TorrentSnapshot>> {
        self.snapshots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl LocationApplier for RecoveryController {
    async fn submit_location(
        &self,
        torrent_id: &TorrentId,
        location: &str,
    ) -> anyhow::Result<Option<RecoveryFingerprint>> {
        let torrent = self
            .snapshot_of(torrent_id)
            .ok_or_else(|| RecoveryError::UnknownTorrent {
                torrent_id: torrent_id.clone(),
            })?;
        Ok(self.apply_location(&torrent, location).await?)
    }
}

/// Trim and check that `input` is an absolute POSIX, drive-letter, or UNC path.
fn validate_location(input: &str) -> RecoveryResult<String> {
    let trimmed = input.trim();
    let invalid = |reason| RecoveryError::InvalidPath {
        path: input.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    if trimmed.contains('\0') {
        return Err(invalid("contains_nul"));
    }
    let bytes = trimmed.as_bytes();
    let drive_letter = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/');
    if !(trimmed.starts_with('/') || trimmed.starts_with("\\\\") || drive_letter) {
        return Err(invalid("not_absolute"));
    }
    Ok(trimmed.to_string())
}

fn location_error(id: &TorrentId, location: &str, source: anyhow::Error) -> RecoveryError {
    match source.downcast_ref::<TorrentError>() {
        Some(TorrentError::PathUnreachable { .. }) => RecoveryError::PathUnreachable {
            path: location.to_string(),
        },
        Some(TorrentError::PermissionDenied { .. }) => RecoveryError::PermissionDenied {
            path: location.to_string(),
        },
        _ => RecoveryError::transport("set_location", id, source),
    }
}
