//! Filesystem probes and the per-torrent TTL cache in front of them.
//!
//! # Design
//! - A cached probe is honoured only while it is younger than the TTL.
//! - Concurrent lookups for the same torrent share one in-flight probe, so a
//!   burst of requests never issues duplicate transport calls.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use revive_telemetry::Metrics;
use revive_torrent_core::{EnvironmentCapabilities, TorrentId, TorrentSnapshot, TorrentTransport};
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

/// What a probe found at the torrent's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Location reachable and every expected byte present.
    Ok,
    /// Location reachable but bytes are missing.
    DataMissing,
    /// Location could not be reached.
    PathUnreachable,
    /// Probe was inconclusive (no path, details unavailable).
    Unknown,
}

/// Result of probing one torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// What was found.
    pub kind: ProbeKind,
    /// Bytes the torrent expects on disk.
    pub expected_bytes: u64,
    /// Bytes the daemon found on disk.
    pub on_disk_bytes: u64,
    /// Free bytes on the volume, when the environment reports them.
    pub free_bytes: Option<u64>,
    /// When the probe completed.
    pub taken_at: Instant,
}

impl ProbeResult {
    /// Probe without byte evidence.
    #[must_use]
    pub const fn bare(kind: ProbeKind, taken_at: Instant) -> Self {
        Self {
            kind,
            expected_bytes: 0,
            on_disk_bytes: 0,
            free_bytes: None,
            taken_at,
        }
    }

    /// Whether the probe may still be reused at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.taken_at) < ttl
    }
}

#[derive(Default)]
struct ProbeState {
    entries: HashMap<TorrentId, ProbeResult>,
    inflight: HashMap<TorrentId, Arc<OnceCell<ProbeResult>>>,
}

/// Per-torrent probe cache keyed by torrent id.
pub struct ProbeCache {
    ttl: Duration,
    state: Mutex<ProbeState>,
    metrics: Metrics,
}

impl ProbeCache {
    /// Cache honouring probes younger than `ttl`.
    #[must_use]
    pub fn new(ttl: Duration, metrics: Metrics) -> Self {
        Self {
            ttl,
            state: Mutex::new(ProbeState::default()),
            metrics,
        }
    }

    /// Fresh probe for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &TorrentId) -> Option<ProbeResult> {
        self.get_at(id, Instant::now())
    }

    /// Fresh probe for `id` as seen at `now`.
    #[must_use]
    pub fn get_at(&self, id: &TorrentId, now: Instant) -> Option<ProbeResult> {
        self.lock()
            .entries
            .get(id)
            .filter(|probe| probe.is_fresh(now, self.ttl))
            .cloned()
    }

    /// Store a probe, replacing any previous one.
    pub fn set(&self, id: &TorrentId, probe: ProbeResult) {
        self.lock().entries.insert(id.clone(), probe);
    }

    /// Forget the probe for `id`, including one still in flight.
    pub fn clear(&self, id: &TorrentId) {
        let mut state = self.lock();
        state.entries.remove(id);
        state.inflight.remove(id);
    }

    /// Drop entries for torrents no longer present.
    pub fn prune(&self, active_ids: &HashSet<TorrentId>) {
        let mut state = self.lock();
        state.entries.retain(|id, _| active_ids.contains(id));
        state.inflight.retain(|id, _| active_ids.contains(id));
    }

    /// Number of cached entries, fresh or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a fresh cached probe or run `probe`, sharing the run with any
    /// concurrent caller for the same id.
    pub async fn get_or_probe<F, Fut>(&self, id: &TorrentId, probe: F) -> ProbeResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProbeResult>,
    {
        let cell = {
            let mut state = self.lock();
            if let Some(hit) = state
                .entries
                .get(id)
                .filter(|probe| probe.is_fresh(Instant::now(), self.ttl))
            {
                self.metrics.inc_probe_lookup("hit");
                return hit.clone();
            }
            if let Some(cell) = state.inflight.get(id) {
                self.metrics.inc_probe_lookup("shared");
                Arc::clone(cell)
            } else {
                self.metrics.inc_probe_lookup("miss");
                let cell = Arc::new(OnceCell::new());
                state.inflight.insert(id.clone(), Arc::clone(&cell));
                cell
            }
        };

        let result = cell.get_or_init(probe).await.clone();

        let mut state = self.lock();
        if state
            .inflight
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            state.inflight.remove(id);
            state.entries.insert(id.clone(), result.clone());
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Issues probes through the transport.
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn TorrentTransport>,
    capabilities: EnvironmentCapabilities,
}

impl Prober {
    /// Prober bound to a transport and the host's capabilities.
    #[must_use]
    pub fn new(transport: Arc<dyn TorrentTransport>, capabilities: EnvironmentCapabilities) -> Self {
        Self {
            transport,
            capabilities,
        }
    }

    /// Whether `path` can be reached, according to a free-space check.
    pub async fn is_reachable(&self, path: &str) -> bool {
        match self.transport.check_free_space(path).await {
            Ok(_) => true,
            Err(err) => {
                debug!(path, error = %err, "free-space probe failed");
                false
            }
        }
    }

    /// Probe the torrent's best known location and on-disk bytes.
    pub async fn probe(&self, torrent: &TorrentSnapshot) -> ProbeResult {
        let Some(path) = torrent.best_known_path() else {
            return ProbeResult::bare(ProbeKind::Unknown, Instant::now());
        };

        let mut free_bytes = None;
        if self.capabilities.can_check_free_space {
            match self.transport.check_free_space(path).await {
                Ok(space) => free_bytes = Some(space.size_bytes),
                Err(err) => {
                    debug!(torrent_id = %torrent.id, path, error = %err, "location unreachable");
                    return ProbeResult::bare(ProbeKind::PathUnreachable, Instant::now());
                }
            }
        }

        match self.transport.get_torrent_details(&torrent.id).await {
            Ok(detail) => {
                let expected_bytes = detail.expected_bytes();
                let on_disk_bytes = detail.on_disk_bytes();
                let kind = if on_disk_bytes < expected_bytes {
                    ProbeKind::DataMissing
                } else {
                    ProbeKind::Ok
                };
                ProbeResult {
                    kind,
                    expected_bytes,
                    on_disk_bytes,
                    free_bytes,
                    taken_at: Instant::now(),
                }
            }
            Err(err) => {
                debug!(torrent_id = %torrent.id, error = %err, "torrent details unavailable");
                ProbeResult {
                    free_bytes,
                    ..ProbeResult::bare(ProbeKind::Unknown, Instant::now())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> anyhow::Result<ProbeCache> {
        Ok(ProbeCache::new(Duration::from_millis(5_000), Metrics::new()?))
    }

    fn sample(taken_at: Instant) -> ProbeResult {
        ProbeResult {
            kind: ProbeKind::DataMissing,
            expected_bytes: 100,
            on_disk_bytes: 0,
            free_bytes: None,
            taken_at,
        }
    }

    #[test]
    fn probe_is_reused_until_the_ttl_elapses() -> anyhow::Result<()> {
        let cache = cache()?;
        let id = TorrentId::from("1");
        let t0 = Instant::now();
        cache.set(&id, sample(t0));

        assert!(cache.get_at(&id, t0 + Duration::from_millis(4_999)).is_some());
        assert!(cache.get_at(&id, t0 + Duration::from_millis(5_000)).is_none());
        assert!(cache.get_at(&id, t0 + Duration::from_millis(5_001)).is_none());
        Ok(())
    }

    #[test]
    fn prune_keeps_only_present_torrents() -> anyhow::Result<()> {
        let cache = cache()?;
        let now = Instant::now();
        for id in ["1", "2", "3"] {
            cache.set(&TorrentId::from(id), sample(now));
        }
        let present: HashSet<TorrentId> = [TorrentId::from("2")].into_iter().collect();
        cache.prune(&present);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&TorrentId::from("2")).is_some());

        cache.clear(&TorrentId::from("2"));
        assert!(cache.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stale_probe_is_replaced_after_the_ttl() -> anyhow::Result<()> {
        let cache = cache()?;
        let id = TorrentId::from("7");
        let runs = AtomicUsize::new(0);
        let run = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            sample(Instant::now())
        };

        let first = cache.get_or_probe(&id, run).await;
        tokio::time::advance(Duration::from_millis(4_999)).await;
        let reused = cache.get_or_probe(&id, run).await;
        assert_eq!(first, reused);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        let fresh = cache.get_or_probe(&id, run).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(fresh.taken_at > first.taken_at);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_share_one_probe() -> anyhow::Result<()> {
        let cache = cache()?;
        let id = TorrentId::from("9");
        let runs = AtomicUsize::new(0);
        let slow = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            sample(Instant::now())
        };

        let (left, right) = tokio::join!(cache.get_or_probe(&id, slow), cache.get_or_probe(&id, slow));
        assert_eq!(left, right);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
