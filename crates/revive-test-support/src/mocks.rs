//! Scripted collaborators that record every call made by the engine.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use revive_torrent_core::{
    DirectoryBrowser, Feedback, FeedbackSink, FeedbackTone, FreeSpace, TorrentDetail,
    TorrentError, TorrentId, TorrentState, TorrentTransport,
    error::PATH_UNREACHABLE_CODE,
};

const FREE_BYTES: u64 = 512 * 1024 * 1024 * 1024;
const TOTAL_BYTES: u64 = 2 * FREE_BYTES;

/// Call recorded by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `resume(ids)`.
    Resume(Vec<TorrentId>),
    /// `pause(ids)`.
    Pause(Vec<TorrentId>),
    /// `remove(ids, delete_data)`.
    Remove(Vec<TorrentId>, bool),
    /// `verify(ids)`.
    Verify(Vec<TorrentId>),
    /// `reannounce(ids)`.
    Reannounce(Vec<TorrentId>),
    /// `get_torrent_details(id)`.
    Details(TorrentId),
    /// `check_free_space(path)`.
    FreeSpace(String),
    /// `set_location(id, location, move_data)`.
    SetLocation(TorrentId, String, bool),
}

#[derive(Default)]
struct Script {
    details: HashMap<TorrentId, TorrentDetail>,
    unreachable: HashSet<String>,
    failing_resume: HashSet<TorrentId>,
    failing_verify: HashSet<TorrentId>,
    failing_details: HashSet<TorrentId>,
    set_location_codes: HashMap<TorrentId, u16>,
    latency: Duration,
    keep_paused: bool,
}

/// In-memory daemon double with scripted failures and a concurrency probe.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    calls: Mutex<Vec<TransportCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    /// Empty daemon: every path reachable, no torrents known.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a torrent detail.
    #[must_use]
    pub fn with_torrent(self, detail: TorrentDetail) -> Self {
        self.script().details.insert(detail.id.clone(), detail);
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.script().latency = latency;
        self
    }

    /// Leave resumed torrents paused so active-state waits time out.
    #[must_use]
    pub fn keep_paused(self) -> Self {
        self.script().keep_paused = true;
        self
    }

    /// Mark a path (and everything beneath it) unreachable.
    pub fn set_unreachable(&self, path: &str) {
        self.script().unreachable.insert(path.to_string());
    }

    /// Make a previously unreachable path reachable again.
    pub fn set_reachable(&self, path: &str) {
        self.script().unreachable.remove(path);
    }

    /// Reject `resume` for the given torrent.
    pub fn fail_resume(&self, id: &str) {
        self.script().failing_resume.insert(TorrentId::from(id));
    }

    /// Reject `verify` for the given torrent.
    pub fn fail_verify(&self, id: &str) {
        self.script().failing_verify.insert(TorrentId::from(id));
    }

    /// Reject `get_torrent_details` for the given torrent.
    pub fn fail_details(&self, id: &str) {
        self.script().failing_details.insert(TorrentId::from(id));
    }

    /// Reject `set_location` for the given torrent with a daemon error code.
    pub fn fail_set_location(&self, id: &str, code: u16) {
        self.script()
            .set_location_codes
            .insert(TorrentId::from(id), code);
    }

    /// Replace the detail reported for a torrent.
    pub fn update_detail(&self, detail: TorrentDetail) {
        self.script().details.insert(detail.id.clone(), detail);
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn enter(&self, call: TransportCall) -> InFlight<'_> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        let latency = self.script().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn is_unreachable(&self, path: &str) -> bool {
        self.script().unreachable.iter().any(|root| {
            path == root
                || path
                    .strip_prefix(root.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

#[async_trait]
impl TorrentTransport for ScriptedTransport {
    async fn resume(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _guard = self.enter(TransportCall::Resume(ids.to_vec())).await;
        let mut script = self.script();
        if let Some(id) = ids.iter().find(|id| script.failing_resume.contains(*id)) {
            bail!("resume rejected for torrent {id}");
        }
        if !script.keep_paused {
            for id in ids {
                if let Some(detail) = script.details.get_mut(id) {
                    detail.state = TorrentState::Downloading;
                }
            }
        }
        Ok(())
    }

    async fn get_torrent_details(&self, id: &TorrentId) -> anyhow::Result<TorrentDetail> {
        let _guard = self.enter(TransportCall::Details(id.clone())).await;
        let script = self.script();
        if script.failing_details.contains(id) {
            bail!("details unavailable for torrent {id}");
        }
        script.details.get(id).cloned().ok_or_else(|| {
            TorrentError::NotFound {
                torrent_id: id.clone(),
            }
            .into()
        })
    }

    async fn pause(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _guard = self.enter(TransportCall::Pause(ids.to_vec())).await;
        let mut script = self.script();
        for id in ids {
            if let Some(detail) = script.details.get_mut(id) {
                detail.state = TorrentState::Paused;
            }
        }
        Ok(())
    }

    async fn remove(&self, ids: &[TorrentId], delete_data: bool) -> anyhow::Result<()> {
        let _guard = self
            .enter(TransportCall::Remove(ids.to_vec(), delete_data))
            .await;
        let mut script = self.script();
        for id in ids {
            script.details.remove(id);
        }
        Ok(())
    }

    async fn verify(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _guard = self.enter(TransportCall::Verify(ids.to_vec())).await;
        let mut script = self.script();
        if let Some(id) = ids.iter().find(|id| script.failing_verify.contains(*id)) {
            bail!("verify rejected for torrent {id}");
        }
        for id in ids {
            if let Some(detail) = script.details.get_mut(id) {
                detail.state = TorrentState::Checking;
            }
        }
        Ok(())
    }

    async fn reannounce(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _guard = self.enter(TransportCall::Reannounce(ids.to_vec())).await;
        Ok(())
    }

    async fn check_free_space(&self, path: &str) -> anyhow::Result<FreeSpace> {
        let _guard = self.enter(TransportCall::FreeSpace(path.to_string())).await;
        if self.is_unreachable(path) {
            return Err(TorrentError::PathUnreachable {
                path: path.to_string(),
                code: PATH_UNREACHABLE_CODE,
            }
            .into());
        }
        Ok(FreeSpace {
            path: path.to_string(),
            size_bytes: FREE_BYTES,
            total_size: TOTAL_BYTES,
        })
    }

    async fn set_location(
        &self,
        id: &TorrentId,
        location: &str,
        move_data: bool,
    ) -> anyhow::Result<()> {
        let _guard = self
            .enter(TransportCall::SetLocation(
                id.clone(),
                location.to_string(),
                move_data,
            ))
            .await;
        if let Some(code) = self.script().set_location_codes.get(id).copied() {
            return Err(TorrentError::from_daemon_code(code, location).into());
        }
        if self.is_unreachable(location) {
            return Err(TorrentError::from_daemon_code(PATH_UNREACHABLE_CODE, location).into());
        }
        if let Some(detail) = self.script().details.get_mut(id) {
            detail.download_dir = Some(location.to_string());
        }
        Ok(())
    }
}

/// Feedback sink that records every message.
#[derive(Default)]
pub struct RecordingFeedback {
    messages: Mutex<Vec<(Feedback, FeedbackTone)>>,
}

impl RecordingFeedback {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message surfaced so far.
    #[must_use]
    pub fn messages(&self) -> Vec<(Feedback, FeedbackTone)> {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Translation keys surfaced so far, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|(feedback, _)| feedback.key)
            .collect()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn show_feedback(&self, feedback: Feedback, tone: FeedbackTone) {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((feedback, tone));
    }
}

/// Directory browser that answers with a canned selection.
pub struct StaticBrowser {
    selection: Option<String>,
    hints: Mutex<Vec<Option<String>>>,
}

impl StaticBrowser {
    /// Browser that always returns `selection`.
    #[must_use]
    pub fn new(selection: Option<&str>) -> Self {
        Self {
            selection: selection.map(str::to_string),
            hints: Mutex::new(Vec::new()),
        }
    }

    /// Hints received so far.
    #[must_use]
    pub fn hints(&self) -> Vec<Option<String>> {
        self.hints
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DirectoryBrowser for StaticBrowser {
    async fn browse_directory(&self, hint: Option<&str>) -> anyhow::Result<Option<String>> {
        self.hints
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(hint.map(str::to_string));
        Ok(self.selection.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::detail;

    #[tokio::test]
    async fn unreachable_roots_cover_nested_paths() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        transport.set_unreachable("/mnt/usb");
        assert!(transport.check_free_space("/mnt/usb/films").await.is_err());
        assert!(transport.check_free_space("/mnt/usb2").await.is_ok());
        transport.set_reachable("/mnt/usb");
        transport.check_free_space("/mnt/usb/films").await?;
        assert_eq!(
            transport.count(|call| matches!(call, TransportCall::FreeSpace(_))),
            3
        );
        Ok(())
    }

    #[tokio::test]
    async fn resume_activates_known_torrents() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new().with_torrent(detail("1", "/data", 10, 0));
        let id = TorrentId::from("1");
        transport.resume(std::slice::from_ref(&id)).await?;
        assert_eq!(
            transport.get_torrent_details(&id).await?.state,
            TorrentState::Downloading
        );
        Ok(())
    }

    #[tokio::test]
    async fn scripted_set_location_codes_surface_typed_errors() {
        let transport = ScriptedTransport::new();
        transport.fail_set_location("1", 4003);
        let err = transport
            .set_location(&TorrentId::from("1"), "/root", false)
            .await
            .expect_err("scripted failure");
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::PermissionDenied { code: 4003, .. })
        ));
    }
}
