//! Single-flight admission of recovery sessions.
//!
//! # Design
//! - At most one session is active; other blocked torrents wait in a FIFO
//!   queue and every caller awaits a shared deferred outcome.
//! - Requests are deduplicated by fingerprint before the sequencer runs, so a
//!   fingerprint that is sequencing, active, or queued never runs twice.
//! - Finalization always settles the deferred, clears the session, and admits
//!   the next queued entry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use revive_events::{EventBus, RecoveryEvent};
use revive_telemetry::Metrics;
use revive_torrent_core::{
    ErrorEnvelope, RecoveryFingerprint, TorrentId, TorrentSnapshot, fingerprint_of,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classification::{Classification, ClassificationRegistry, Classifier};
use crate::error::RecoveryResult;
use crate::outcome::{PathNeededReason, RecoveryAction, RecoveryGateOutcome, RecoveryOutcome};
use crate::sequencer::{SequenceOptions, SequenceResult, Sequencer};

/// Shared settlement slot; every waiter observes the first outcome written.
#[derive(Clone)]
struct Deferred {
    slot: Arc<watch::Sender<Option<RecoveryGateOutcome>>>,
}

impl Deferred {
    fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    fn resolve(&self, outcome: RecoveryGateOutcome) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    async fn wait(&self) -> RecoveryGateOutcome {
        let mut receiver = self.slot.subscribe();
        receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|settled| settled.clone())
            .unwrap_or(RecoveryGateOutcome::Cancelled)
    }
}

struct QueueEntry {
    torrent: TorrentSnapshot,
    action: RecoveryAction,
    outcome: RecoveryOutcome,
    classification: Classification,
    fingerprint: RecoveryFingerprint,
    deferred: Deferred,
}

struct ActiveSession {
    id: Uuid,
    entry: QueueEntry,
    token: CancellationToken,
}

struct Sequencing {
    deferred: Deferred,
    token: CancellationToken,
}

/// Holds a sequencing slot for the duration of one request.
///
/// Dropping it before the request settled or was admitted (caller went away,
/// transport panicked) releases the slot and settles joined waiters with
/// `Cancelled`.
struct SequencingSlot<'a> {
    gate: &'a RecoveryGate,
    fingerprint: RecoveryFingerprint,
    deferred: Deferred,
}

impl Drop for SequencingSlot<'_> {
    fn drop(&mut self) {
        let released = {
            let mut state = self.gate.lock();
            let owned = state
                .sequencing
                .get(&self.fingerprint)
                .is_some_and(|pending| pending.deferred.same_as(&self.deferred));
            if owned {
                state.sequencing.remove(&self.fingerprint)
            } else {
                None
            }
        };
        if let Some(pending) = released {
            warn!(fingerprint = %self.fingerprint, "recovery request abandoned while sequencing");
            pending.token.cancel();
            pending.deferred.resolve(RecoveryGateOutcome::Cancelled);
        }
    }
}

#[derive(Default)]
struct GateState {
    active: Option<ActiveSession>,
    queue: VecDeque<QueueEntry>,
    sequencing: HashMap<RecoveryFingerprint, Sequencing>,
}

impl GateState {
    fn deferred_for(&self, fingerprint: &RecoveryFingerprint) -> Option<Deferred> {
        if let Some(active) = self
            .active
            .as_ref()
            .filter(|active| &active.entry.fingerprint == fingerprint)
        {
            return Some(active.entry.deferred.clone());
        }
        if let Some(entry) = self
            .queue
            .iter()
            .find(|entry| &entry.fingerprint == fingerprint)
        {
            return Some(entry.deferred.clone());
        }
        self.sequencing
            .get(fingerprint)
            .map(|pending| pending.deferred.clone())
    }
}

/// Read-only view of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoverySessionView {
    /// Session identifier.
    pub session_id: Uuid,
    /// Torrent under recovery.
    pub torrent: TorrentSnapshot,
    /// Action that opened the session.
    pub action: RecoveryAction,
    /// Outcome currently shown to the user.
    pub outcome: RecoveryOutcome,
    /// Latest classification.
    pub classification: Classification,
    /// Fingerprint the session is keyed by.
    pub fingerprint: RecoveryFingerprint,
}

/// Read-only view of a queued request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedView {
    /// Torrent waiting for its turn.
    pub torrent_id: TorrentId,
    /// Requested action.
    pub action: RecoveryAction,
    /// Outcome that will be shown once admitted.
    pub outcome: RecoveryOutcome,
    /// Fingerprint the entry is keyed by.
    pub fingerprint: RecoveryFingerprint,
}

/// Point-in-time view of the gate for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    /// Active session, if any.
    pub active: Option<RecoverySessionView>,
    /// Queued requests in admission order.
    pub queued: Vec<QueuedView>,
}

impl GateSnapshot {
    /// Whether `fingerprint` is active or queued.
    #[must_use]
    pub fn contains(&self, fingerprint: &RecoveryFingerprint) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| &active.fingerprint == fingerprint)
            || self
                .queued
                .iter()
                .any(|queued| &queued.fingerprint == fingerprint)
    }
}

/// Single-flight gate in front of the sequencer.
pub struct RecoveryGate {
    state: Mutex<GateState>,
    classifier: Classifier,
    sequencer: Sequencer,
    registry: Arc<ClassificationRegistry>,
    events: EventBus,
    metrics: Metrics,
}

impl RecoveryGate {
    /// Gate over the given classifier and sequencer.
    #[must_use]
    pub fn new(
        classifier: Classifier,
        sequencer: Sequencer,
        registry: Arc<ClassificationRegistry>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            classifier,
            sequencer,
            registry,
            events,
            metrics,
        }
    }

    /// Request recovery for a torrent.
    ///
    /// Returns `None` when no gating is needed: the torrent carries no error,
    /// the action is a location change, or the error class has no corrective
    /// action. Otherwise resolves once the request is settled, which for a
    /// blocked torrent means after its session is finalized.
    pub async fn request_recovery(
        &self,
        torrent: &TorrentSnapshot,
        action: RecoveryAction,
        options: SequenceOptions,
    ) -> Option<RecoveryGateOutcome> {
        let envelope = torrent.error.as_ref()?;
        if action == RecoveryAction::SetLocation || !envelope.error_class.is_actionable() {
            return None;
        }
        let fingerprint = fingerprint_of(torrent);
        let token = CancellationToken::new();

        let admission = if action == RecoveryAction::Recheck {
            Ok(None)
        } else {
            let mut state = self.lock();
            match state.deferred_for(&fingerprint) {
                Some(existing) => Err(existing),
                None => {
                    let deferred = Deferred::new();
                    state.sequencing.insert(
                        fingerprint.clone(),
                        Sequencing {
                            deferred: deferred.clone(),
                            token: token.clone(),
                        },
                    );
                    Ok(Some(deferred))
                }
            }
        };
        let deferred = match admission {
            Ok(deferred) => deferred,
            Err(existing) => {
                debug!(torrent_id = %torrent.id, fingerprint = %fingerprint, "joining pending recovery");
                return Some(existing.wait().await);
            }
        };
        let _slot = deferred.as_ref().map(|deferred| SequencingSlot {
            gate: self,
            fingerprint: fingerprint.clone(),
            deferred: deferred.clone(),
        });

        let classification = self
            .classifier
            .classify(torrent)
            .await
            .unwrap_or(Classification::Unknown);
        self.registry.record(torrent, classification.clone());

        let result = self
            .sequencer
            .run(torrent, envelope, &classification, options, &token)
            .await;
        let (outcome, classification) = match result {
            Ok(SequenceResult::Resolved { log }) => {
                self.classifier.invalidate(&torrent.id);
                self.registry.remove(&torrent.id);
                let settled = RecoveryGateOutcome::resolved(log);
                self.settle_sequencing(&fingerprint, settled.clone());
                return Some(settled);
            }
            Ok(SequenceResult::NeedsModal {
                blocking_outcome,
                classification,
            }) => (blocking_outcome, classification),
            Err(err) if err.is_cancelled() => {
                self.settle_sequencing(&fingerprint, RecoveryGateOutcome::Cancelled);
                return Some(RecoveryGateOutcome::Cancelled);
            }
            Err(err) => {
                warn!(torrent_id = %torrent.id, error = %err, "recovery sequence failed");
                let reason = PathNeededReason::from_error_class(Some(envelope.error_class));
                (RecoveryOutcome::PathNeeded { reason }, classification)
            }
        };
        self.registry.record(torrent, classification.clone());

        let Some(deferred) = deferred else {
            return Some(RecoveryGateOutcome::blocked(outcome));
        };
        self.admit(QueueEntry {
            torrent: torrent.clone(),
            action,
            outcome,
            classification,
            fingerprint,
            deferred: deferred.clone(),
        });
        Some(deferred.wait().await)
    }

    /// Re-run the sequencer for the active session after the user acted.
    ///
    /// The torrent is re-classified from a fresh probe. A resolution finalizes
    /// the session; a new blocking outcome replaces the displayed one; a
    /// sequencing failure still finalizes the session so the queue advances.
    /// Returns `None` when no session is active.
    pub async fn retry_active(&self, options: SequenceOptions) -> Option<RecoveryOutcome> {
        let (session_id, torrent, token) = {
            let state = self.lock();
            let active = state.active.as_ref()?;
            (active.id, active.entry.torrent.clone(), active.token.clone())
        };
        let Some(envelope) = torrent.error.clone() else {
            self.finalize(|active| active.id == session_id, RecoveryGateOutcome::Continue);
            return Some(RecoveryOutcome::Noop);
        };

        self.classifier.invalidate(&torrent.id);
        let result = self.sequence_active(&torrent, &envelope, options, &token).await;
        match result {
            Ok(SequenceResult::Resolved { log }) => {
                self.registry.remove(&torrent.id);
                self.finalize(
                    |active| active.id == session_id,
                    RecoveryGateOutcome::resolved(log),
                );
                Some(RecoveryOutcome::Resolved)
            }
            Ok(SequenceResult::NeedsModal {
                blocking_outcome,
                classification,
            }) => {
                self.registry.record(&torrent, classification.clone());
                let updated = {
                    let mut state = self.lock();
                    state
                        .active
                        .as_mut()
                        .filter(|active| active.id == session_id)
                        .map(|active| {
                            active.entry.outcome = blocking_outcome.clone();
                            active.entry.classification = classification;
                            active.entry.fingerprint.clone()
                        })
                };
                if let Some(fingerprint) = updated {
                    self.events.send(RecoveryEvent::SessionUpdated {
                        torrent_id: torrent.id.clone(),
                        fingerprint,
                        outcome: blocking_outcome.label().to_string(),
                    });
                }
                Some(blocking_outcome)
            }
            Err(err) if err.is_cancelled() => Some(RecoveryOutcome::Noop),
            Err(err) => {
                warn!(torrent_id = %torrent.id, error = %err, "recovery retry failed");
                let reason = PathNeededReason::from_error_class(Some(envelope.error_class));
                self.finalize(
                    |active| active.id == session_id,
                    RecoveryGateOutcome::blocked(RecoveryOutcome::PathNeeded { reason }),
                );
                Some(RecoveryOutcome::Error {
                    message: err.to_string(),
                })
            }
        }
    }

    async fn sequence_active(
        &self,
        torrent: &TorrentSnapshot,
        envelope: &ErrorEnvelope,
        options: SequenceOptions,
        token: &CancellationToken,
    ) -> RecoveryResult<SequenceResult> {
        let classification = self
            .classifier
            .classify(torrent)
            .await
            .unwrap_or(Classification::Unknown);
        self.sequencer
            .run(torrent, envelope, &classification, options, token)
            .await
    }

    /// Dismiss the active session; its callers observe `Cancelled`.
    pub fn close_active(&self) -> bool {
        self.finalize(|_| true, RecoveryGateOutcome::Cancelled)
    }

    /// Finalize the active session with an explicit outcome.
    pub fn resolve_active(&self, outcome: RecoveryGateOutcome) -> bool {
        self.finalize(|_| true, outcome)
    }

    /// Settle whichever request holds `fingerprint`, active or queued.
    pub fn resolve(&self, fingerprint: &RecoveryFingerprint, outcome: RecoveryGateOutcome) -> bool {
        if self.finalize(|active| &active.entry.fingerprint == fingerprint, outcome.clone()) {
            return true;
        }
        self.settle_queued(|entry| &entry.fingerprint == fingerprint, &outcome) > 0
    }

    /// Settle every queued request whose torrent fails `keep`.
    ///
    /// Returns the number of entries removed from the queue.
    pub fn settle_queued_unless<F>(&self, keep: F, outcome: &RecoveryGateOutcome) -> usize
    where
        F: Fn(&TorrentId) -> bool,
    {
        self.settle_queued(|entry| !keep(&entry.torrent.id), outcome)
    }

    fn settle_queued<F>(&self, matches: F, outcome: &RecoveryGateOutcome) -> usize
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let removed: Vec<QueueEntry> = {
            let mut state = self.lock();
            let (removed, kept): (Vec<QueueEntry>, Vec<QueueEntry>) =
                state.queue.drain(..).partition(|entry| matches(entry));
            state.queue = VecDeque::from(kept);
            self.metrics.set_queue_depth(state.queue.len());
            removed
        };
        for entry in &removed {
            entry.deferred.resolve(outcome.clone());
            self.metrics.inc_recovery_session(outcome.status());
            debug!(
                torrent_id = %entry.torrent.id,
                fingerprint = %entry.fingerprint,
                status = outcome.status(),
                "queued recovery settled"
            );
            self.events.send(RecoveryEvent::QueuedSettled {
                torrent_id: entry.torrent.id.clone(),
                fingerprint: entry.fingerprint.clone(),
                status: outcome.status().to_string(),
            });
        }
        removed.len()
    }

    /// Point the pending request for `fingerprint` at a new location.
    pub fn update_location(&self, fingerprint: &RecoveryFingerprint, location: &str) -> bool {
        let mut state = self.lock();
        let GateState { active, queue, .. } = &mut *state;
        let entry = active
            .as_mut()
            .map(|active| &mut active.entry)
            .filter(|entry| &entry.fingerprint == fingerprint)
            .or_else(|| queue.iter_mut().find(|entry| &entry.fingerprint == fingerprint));
        entry.is_some_and(|entry| {
            entry.torrent.save_path = Some(location.to_string());
            true
        })
    }

    /// Cancel every session, queued request, and in-flight sequence.
    pub fn cancel_all(&self) {
        let (active, queued, sequencing) = {
            let mut state = self.lock();
            let active = state.active.take();
            let queued: Vec<QueueEntry> = state.queue.drain(..).collect();
            let sequencing: Vec<Sequencing> =
                state.sequencing.drain().map(|(_, pending)| pending).collect();
            self.metrics.set_queue_depth(0);
            (active, queued, sequencing)
        };
        let status = RecoveryGateOutcome::Cancelled.status().to_string();
        if let Some(active) = active {
            active.token.cancel();
            active.entry.deferred.resolve(RecoveryGateOutcome::Cancelled);
            self.events.send(RecoveryEvent::SessionFinalized {
                session_id: active.id,
                torrent_id: active.entry.torrent.id,
                fingerprint: active.entry.fingerprint,
                status: status.clone(),
            });
        }
        for entry in queued {
            entry.deferred.resolve(RecoveryGateOutcome::Cancelled);
            self.events.send(RecoveryEvent::QueuedSettled {
                torrent_id: entry.torrent.id,
                fingerprint: entry.fingerprint,
                status: status.clone(),
            });
        }
        for pending in sequencing {
            pending.token.cancel();
            pending.deferred.resolve(RecoveryGateOutcome::Cancelled);
        }
        info!("recovery gate cancelled");
    }

    /// Current session and queue for display.
    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.lock();
        GateSnapshot {
            active: state.active.as_ref().map(|active| RecoverySessionView {
                session_id: active.id,
                torrent: active.entry.torrent.clone(),
                action: active.entry.action,
                outcome: active.entry.outcome.clone(),
                classification: active.entry.classification.clone(),
                fingerprint: active.entry.fingerprint.clone(),
            }),
            queued: state
                .queue
                .iter()
                .map(|entry| QueuedView {
                    torrent_id: entry.torrent.id.clone(),
                    action: entry.action,
                    outcome: entry.outcome.clone(),
                    fingerprint: entry.fingerprint.clone(),
                })
                .collect(),
        }
    }

    /// Torrent held by the active session.
    #[must_use]
    pub fn active_torrent_id(&self) -> Option<TorrentId> {
        self.lock()
            .active
            .as_ref()
            .map(|active| active.entry.torrent.id.clone())
    }

    /// Whether `fingerprint` holds the active session.
    #[must_use]
    pub fn is_active(&self, fingerprint: &RecoveryFingerprint) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|active| &active.entry.fingerprint == fingerprint)
    }

    /// Whether `fingerprint` is sequencing, active, or queued.
    #[must_use]
    pub fn is_pending(&self, fingerprint: &RecoveryFingerprint) -> bool {
        self.lock().deferred_for(fingerprint).is_some()
    }

    fn settle_sequencing(&self, fingerprint: &RecoveryFingerprint, outcome: RecoveryGateOutcome) {
        let pending = self.lock().sequencing.remove(fingerprint);
        if let Some(pending) = pending {
            pending.deferred.resolve(outcome);
        }
    }

    fn admit(&self, entry: QueueEntry) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            state.sequencing.remove(&entry.fingerprint);
            if state.active.is_none() {
                events.push(Self::start_locked(&mut state, entry));
            } else {
                let position = state.queue.len() + 1;
                info!(
                    torrent_id = %entry.torrent.id,
                    fingerprint = %entry.fingerprint,
                    position,
                    "recovery queued behind active session"
                );
                events.push(RecoveryEvent::SessionQueued {
                    torrent_id: entry.torrent.id.clone(),
                    fingerprint: entry.fingerprint.clone(),
                    position,
                });
                state.queue.push_back(entry);
            }
            self.metrics.set_queue_depth(state.queue.len());
        }
        for event in events {
            self.events.send(event);
        }
    }

    fn start_locked(state: &mut GateState, entry: QueueEntry) -> RecoveryEvent {
        if let Some(previous) = state.active.take() {
            warn!(torrent_id = %previous.entry.torrent.id, "superseding active recovery session");
            previous.token.cancel();
            previous.entry.deferred.resolve(RecoveryGateOutcome::Cancelled);
        }
        let session = ActiveSession {
            id: Uuid::new_v4(),
            entry,
            token: CancellationToken::new(),
        };
        info!(
            session_id = %session.id,
            torrent_id = %session.entry.torrent.id,
            fingerprint = %session.entry.fingerprint,
            outcome = session.entry.outcome.label(),
            "recovery session started"
        );
        let event = RecoveryEvent::SessionStarted {
            session_id: session.id,
            torrent_id: session.entry.torrent.id.clone(),
            fingerprint: session.entry.fingerprint.clone(),
            action: session.entry.action.as_str().to_string(),
        };
        state.active = Some(session);
        event
    }

    fn finalize<F>(&self, matches: F, outcome: RecoveryGateOutcome) -> bool
    where
        F: FnOnce(&ActiveSession) -> bool,
    {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let Some(active) = state.active.take_if(|active| matches(active)) else {
                return false;
            };
            active.token.cancel();
            active.entry.deferred.resolve(outcome.clone());
            info!(
                session_id = %active.id,
                torrent_id = %active.entry.torrent.id,
                status = outcome.status(),
                "recovery session finalized"
            );
            events.push(RecoveryEvent::SessionFinalized {
                session_id: active.id,
                torrent_id: active.entry.torrent.id.clone(),
                fingerprint: active.entry.fingerprint.clone(),
                status: outcome.status().to_string(),
            });
            if let Some(next) = state.queue.pop_front() {
                events.push(Self::start_locked(&mut state, next));
            }
            self.metrics.set_queue_depth(state.queue.len());
        }
        self.metrics.inc_recovery_session(outcome.status());
        for event in events {
            self.events.send(event);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
