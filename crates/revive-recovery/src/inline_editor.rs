//! Inline location editor shared by the details panel and context menus.
//!
//! # Design
//! - One owner (`surface` + torrent) at a time; a second opener gets a
//!   conflict instead of taking over.
//! - Drafts survive close/re-open per torrent until released.
//! - Every open bumps `intent_id`; an async completion whose captured id no
//!   longer matches is discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use revive_events::{EventStream, RecoveryEvent};
use revive_torrent_core::{RecoveryFingerprint, TorrentId};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::EditorError;
use crate::gate::{GateSnapshot, RecoveryGate};

/// Applies a new location and kicks off recovery for it.
#[async_trait]
pub trait LocationApplier: Send + Sync {
    /// Apply `location` to the torrent. Returns the recovery fingerprint to
    /// watch when a recovery session is still verifying the new location.
    async fn submit_location(
        &self,
        torrent_id: &TorrentId,
        location: &str,
    ) -> anyhow::Result<Option<RecoveryFingerprint>>;
}

/// Holder of editing rights.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InlineOwner {
    /// UI surface, e.g. `general-tab`.
    pub surface: String,
    /// Torrent being edited.
    pub torrent_key: TorrentId,
}

/// Editor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorStatus {
    /// Accepting input.
    Idle,
    /// Waiting for the location change.
    Submitting,
    /// Waiting for the recovery session to clear.
    Verifying,
}

/// Visible editor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineEditorState {
    /// Owning surface.
    pub surface: String,
    /// Torrent being edited.
    pub torrent_key: TorrentId,
    /// Path the editor was opened with.
    pub initial_path: String,
    /// Current input.
    pub input_path: String,
    /// Lifecycle state.
    pub status: EditorStatus,
    /// Monotonic token for stale-completion checks.
    pub intent_id: u64,
    /// Fingerprint watched while verifying.
    pub awaiting_fingerprint: Option<RecoveryFingerprint>,
    /// Last submission error.
    pub error: Option<String>,
}

impl InlineEditorState {
    fn owner(&self) -> InlineOwner {
        InlineOwner {
            surface: self.surface.clone(),
            torrent_key: self.torrent_key.clone(),
        }
    }
}

/// Result of [`InlineLocationEditor::confirm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Location applied; waiting for the recovery session to clear.
    Verifying(RecoveryFingerprint),
    /// Location applied with nothing left to watch; the editor closed.
    Closed,
    /// The location change failed; the editor is idle with an error.
    Failed(String),
    /// The editor was cancelled or re-opened while submitting.
    Stale,
}

#[derive(Default)]
struct EditorInner {
    state: Option<InlineEditorState>,
    drafts: HashMap<TorrentId, String>,
    next_intent: u64,
}

impl EditorInner {
    fn next_intent(&mut self) -> u64 {
        self.next_intent = self.next_intent.wrapping_add(1);
        self.next_intent
    }

    fn release(&mut self) {
        if let Some(state) = self.state.take() {
            self.drafts.remove(&state.torrent_key);
            debug!(surface = %state.surface, torrent_id = %state.torrent_key, "inline editor released");
        }
        self.next_intent();
    }
}

/// Single-owner inline editor for a torrent's storage location.
pub struct InlineLocationEditor {
    inner: Mutex<EditorInner>,
    applier: Arc<dyn LocationApplier>,
}

impl InlineLocationEditor {
    /// Editor that submits through `applier`.
    #[must_use]
    pub fn new(applier: Arc<dyn LocationApplier>) -> Self {
        Self {
            inner: Mutex::new(EditorInner::default()),
            applier,
        }
    }

    /// Open the editor for `torrent_key` on `surface`.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Conflict`] when another surface or torrent
    /// holds the editor.
    pub fn open(
        &self,
        surface: &str,
        torrent_key: &TorrentId,
        base_path: &str,
    ) -> Result<InlineEditorState, EditorError> {
        let mut inner = self.lock();
        if let Some(current) = &inner.state
            && (current.surface != surface || &current.torrent_key != torrent_key)
        {
            return Err(EditorError::Conflict {
                held_by: current.owner(),
            });
        }
        let intent_id = inner.next_intent();
        let input_path = inner
            .drafts
            .get(torrent_key)
            .cloned()
            .unwrap_or_else(|| base_path.to_string());
        let state = InlineEditorState {
            surface: surface.to_string(),
            torrent_key: torrent_key.clone(),
            initial_path: base_path.to_string(),
            input_path,
            status: EditorStatus::Idle,
            intent_id,
            awaiting_fingerprint: None,
            error: None,
        };
        inner.state = Some(state.clone());
        debug!(surface, torrent_id = %torrent_key, intent_id, "inline editor opened");
        Ok(state)
    }

    /// Replace the input and remember it as the torrent's draft.
    ///
    /// # Errors
    ///
    /// [`EditorError::NotOpen`] without an open editor, [`EditorError::Busy`]
    /// while submitting or verifying.
    pub fn change(&self, value: &str) -> Result<(), EditorError> {
        let mut inner = self.lock();
        let EditorInner { state, drafts, .. } = &mut *inner;
        let state = state.as_mut().ok_or(EditorError::NotOpen)?;
        if state.status != EditorStatus::Idle {
            return Err(EditorError::Busy);
        }
        state.input_path = value.to_string();
        state.error = None;
        drafts.insert(state.torrent_key.clone(), value.to_string());
        Ok(())
    }

    /// Submit the current input.
    ///
    /// # Errors
    ///
    /// [`EditorError::NotOpen`], [`EditorError::Busy`], or
    /// [`EditorError::EmptyPath`] when the trimmed input is empty. Failures of
    /// the location change itself are reported as [`ConfirmOutcome::Failed`].
    pub async fn confirm(&self) -> Result<ConfirmOutcome, EditorError> {
        let (intent_id, torrent_key, location) = {
            let mut inner = self.lock();
            let state = inner.state.as_mut().ok_or(EditorError::NotOpen)?;
            if state.status != EditorStatus::Idle {
                return Err(EditorError::Busy);
            }
            let location = state.input_path.trim().to_string();
            if location.is_empty() {
                state.error = Some(EditorError::EmptyPath.to_string());
                return Err(EditorError::EmptyPath);
            }
            state.status = EditorStatus::Submitting;
            state.error = None;
            (state.intent_id, state.torrent_key.clone(), location)
        };

        let result = self.applier.submit_location(&torrent_key, &location).await;

        let mut inner = self.lock();
        let Some(state) = inner
            .state
            .as_mut()
            .filter(|state| state.intent_id == intent_id)
        else {
            debug!(torrent_id = %torrent_key, intent_id, "discarding stale location submission");
            return Ok(ConfirmOutcome::Stale);
        };
        match result {
            Ok(Some(fingerprint)) => {
                state.status = EditorStatus::Verifying;
                state.awaiting_fingerprint = Some(fingerprint.clone());
                info!(torrent_id = %torrent_key, fingerprint = %fingerprint, "location applied, verifying");
                Ok(ConfirmOutcome::Verifying(fingerprint))
            }
            Ok(None) => {
                inner.release();
                info!(torrent_id = %torrent_key, "location applied");
                Ok(ConfirmOutcome::Closed)
            }
            Err(err) => {
                let message = format!("{err:#}");
                state.status = EditorStatus::Idle;
                state.error = Some(message.clone());
                debug!(torrent_id = %torrent_key, error = %message, "location change failed");
                Ok(ConfirmOutcome::Failed(message))
            }
        }
    }

    /// Close the editor and drop its draft.
    pub fn cancel(&self) {
        self.release();
    }

    /// Give up ownership, drop the torrent's draft, and reset.
    pub fn release(&self) {
        self.lock().release();
    }

    /// Release only when `torrent_key` holds the editor, e.g. on removal.
    pub fn release_torrent(&self, torrent_key: &TorrentId) -> bool {
        let mut inner = self.lock();
        let owned = inner
            .state
            .as_ref()
            .is_some_and(|state| &state.torrent_key == torrent_key);
        if owned {
            inner.release();
        }
        inner.drafts.remove(torrent_key);
        owned
    }

    /// Close a verifying editor once its watched session left the gate.
    pub fn on_gate_changed(&self, snapshot: &GateSnapshot) -> bool {
        let mut inner = self.lock();
        let cleared = inner.state.as_ref().is_some_and(|state| {
            state.status == EditorStatus::Verifying
                && state
                    .awaiting_fingerprint
                    .as_ref()
                    .is_none_or(|fingerprint| !snapshot.contains(fingerprint))
        });
        if cleared {
            inner.release();
        }
        cleared
    }

    /// Follow gate transitions until the event bus closes.
    pub async fn follow(&self, mut events: EventStream, gate: &RecoveryGate) {
        while let Some(envelope) = events.next().await {
            if matches!(
                envelope.event,
                RecoveryEvent::SessionFinalized { .. }
                    | RecoveryEvent::SessionStarted { .. }
                    | RecoveryEvent::QueuedSettled { .. }
            ) {
                self.on_gate_changed(&gate.snapshot());
            }
        }
    }

    /// Current editor state.
    #[must_use]
    pub fn state(&self) -> Option<InlineEditorState> {
        self.lock().state.clone()
    }

    /// Current owner.
    #[must_use]
    pub fn owner(&self) -> Option<InlineOwner> {
        self.lock().state.as_ref().map(InlineEditorState::owner)
    }

    /// Saved draft for a torrent.
    #[must_use]
    pub fn draft(&self, torrent_key: &TorrentId) -> Option<String> {
        self.lock().drafts.get(torrent_key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, EditorInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
