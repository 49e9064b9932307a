//! Detection of reattached volumes for torrents blocked on volume loss.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use revive_events::{EventBus, RecoveryEvent};
use revive_telemetry::Metrics;
use revive_torrent_core::{
    EnvironmentCapabilities, Feedback, FeedbackSink, FeedbackTone, TorrentId, TorrentSnapshot,
    fingerprint_of,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classification::{Classification, ClassificationRegistry, Classifier};
use crate::gate::RecoveryGate;
use crate::keys;
use crate::outcome::RecoveryGateOutcome;
use crate::sequencer::{SequenceOptions, SequenceResult, Sequencer};

/// Result of polling one torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Polled torrent.
    pub torrent_id: TorrentId,
    /// Whether the storage path answered.
    pub reachable: bool,
    /// Whether the torrent was resumed as a result.
    pub resolved: bool,
}

/// Ids with a reachability probe outstanding; removed on drop.
struct PollingGuard {
    polling: Arc<Mutex<HashSet<TorrentId>>>,
    id: TorrentId,
}

impl PollingGuard {
    fn acquire(polling: &Arc<Mutex<HashSet<TorrentId>>>, id: &TorrentId) -> Option<Self> {
        let inserted = polling
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.clone());
        inserted.then(|| Self {
            polling: Arc::clone(polling),
            id: id.clone(),
        })
    }
}

impl Drop for PollingGuard {
    fn drop(&mut self) {
        self.polling
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Periodically re-probes volume-loss torrents and resumes them once their
/// volume answers again.
pub struct VolumeLossPoller {
    classifier: Classifier,
    sequencer: Sequencer,
    gate: Arc<RecoveryGate>,
    registry: Arc<ClassificationRegistry>,
    feedback: Arc<dyn FeedbackSink>,
    events: EventBus,
    metrics: Metrics,
    capabilities: EnvironmentCapabilities,
    interval: Duration,
    auto_create_missing_folder: bool,
    polling: Arc<Mutex<HashSet<TorrentId>>>,
}

impl VolumeLossPoller {
    /// Poller sharing the gate's classifier, sequencer, and registry.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        classifier: Classifier,
        sequencer: Sequencer,
        gate: Arc<RecoveryGate>,
        registry: Arc<ClassificationRegistry>,
        feedback: Arc<dyn FeedbackSink>,
        events: EventBus,
        metrics: Metrics,
        capabilities: EnvironmentCapabilities,
        interval: Duration,
        auto_create_missing_folder: bool,
    ) -> Self {
        Self {
            classifier,
            sequencer,
            gate,
            registry,
            feedback,
            events,
            metrics,
            capabilities,
            interval,
            auto_create_missing_folder,
            polling: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Spawn the polling loop. Returns `None` when the environment cannot
    /// probe paths without user action.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.capabilities.supports_volume_polling() {
            info!(
                execution_model = ?self.capabilities.execution_model,
                "volume-loss polling unavailable in this environment"
            );
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let spawned = self.tick(&cancel).len();
                        if spawned > 0 {
                            debug!(spawned, "volume-loss probes issued");
                        }
                    }
                }
            }
            debug!("volume-loss poller stopped");
        }))
    }

    /// Issue one probe per eligible volume-loss torrent.
    ///
    /// Torrents held by the active session or with a probe outstanding are
    /// skipped.
    pub fn tick(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<PollReport>> {
        if !self.capabilities.supports_volume_polling() {
            return Vec::new();
        }
        let active = self.gate.active_torrent_id();
        self.registry
            .volume_loss()
            .into_iter()
            .filter(|torrent| active.as_ref() != Some(&torrent.id))
            .filter_map(|torrent| {
                let guard = PollingGuard::acquire(&self.polling, &torrent.id)?;
                let poller = Arc::clone(self);
                let cancel = cancel.child_token();
                Some(tokio::spawn(async move {
                    let report = poller.poll_one(torrent, &cancel).await;
                    drop(guard);
                    report
                }))
            })
            .collect()
    }

    /// Ids with a probe currently outstanding.
    #[must_use]
    pub fn polling(&self) -> HashSet<TorrentId> {
        self.lock_polling().clone()
    }

    async fn poll_one(&self, torrent: TorrentSnapshot, cancel: &CancellationToken) -> PollReport {
        let mut report = PollReport {
            torrent_id: torrent.id.clone(),
            reachable: false,
            resolved: false,
        };
        let path = match self.registry.get(&torrent.id) {
            Some(Classification::VolumeLoss { path }) => path,
            _ => return report,
        };

        report.reachable = self.classifier.prober().is_reachable(&path).await;
        self.metrics.inc_volume_probe(if report.reachable {
            "reachable"
        } else {
            "unreachable"
        });
        if !report.reachable {
            return report;
        }
        let Some(envelope) = torrent.error.clone() else {
            self.registry.remove(&torrent.id);
            return report;
        };
        debug!(torrent_id = %torrent.id, path = %path, "volume reachable again");

        self.classifier.invalidate(&torrent.id);
        let classification = self
            .classifier
            .classify(&torrent)
            .await
            .unwrap_or(Classification::Unknown);
        let options = SequenceOptions {
            auto_create_missing_folder: self.auto_create_missing_folder,
            notify_drive_detected: true,
            ..SequenceOptions::default()
        };
        match self
            .sequencer
            .run(&torrent, &envelope, &classification, options, cancel)
            .await
        {
            Ok(SequenceResult::Resolved { log }) => {
                self.feedback.show_feedback(
                    Feedback::about(keys::RESUMED, torrent.name.clone()),
                    FeedbackTone::Success,
                );
                self.registry.remove(&torrent.id);
                self.events.send(RecoveryEvent::DriveDetected {
                    torrent_id: torrent.id.clone(),
                    path,
                });
                self.gate
                    .resolve(&fingerprint_of(&torrent), RecoveryGateOutcome::resolved(log));
                info!(torrent_id = %torrent.id, log = log.as_str(), "resumed after volume reattach");
                report.resolved = true;
            }
            Ok(SequenceResult::NeedsModal { classification, .. }) => {
                debug!(
                    torrent_id = %torrent.id,
                    classification = classification.label(),
                    "volume back but recovery still blocked"
                );
                self.registry.record(&torrent, classification);
            }
            Err(err) => {
                warn!(torrent_id = %torrent.id, error = %err, "recovery after volume reattach failed");
            }
        }
        report
    }

    fn lock_polling(&self) -> MutexGuard<'_, HashSet<TorrentId>> {
        self.polling
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_guard_releases_on_drop() {
        let polling = Arc::new(Mutex::new(HashSet::new()));
        let id = TorrentId::from("4");

        let guard = PollingGuard::acquire(&polling, &id);
        assert!(guard.is_some());
        assert!(PollingGuard::acquire(&polling, &id).is_none());
        drop(guard);
        assert!(PollingGuard::acquire(&polling, &id).is_some());
    }
}
