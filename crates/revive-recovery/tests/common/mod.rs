//! Harness shared by the recovery integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use revive_config::RecoveryConfig;
use revive_events::RecoveryEvent;
use revive_recovery::RecoveryController;
use revive_telemetry::Metrics;
use revive_test_support::{RecordingFeedback, ScriptedTransport};
use revive_torrent_core::{EnvironmentCapabilities, TorrentId};

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub feedback: Arc<RecordingFeedback>,
    pub metrics: Metrics,
    pub controller: Arc<RecoveryController>,
}

pub fn harness(transport: ScriptedTransport) -> anyhow::Result<Harness> {
    harness_with(transport, RecoveryConfig::default())
}

pub fn harness_with(transport: ScriptedTransport, config: RecoveryConfig) -> anyhow::Result<Harness> {
    let transport = Arc::new(transport);
    let feedback = Arc::new(RecordingFeedback::new());
    let metrics = Metrics::new()?;
    let controller = Arc::new(RecoveryController::new(
        config,
        EnvironmentCapabilities::local(),
        transport.clone(),
        feedback.clone(),
        metrics.clone(),
    ));
    Ok(Harness {
        transport,
        feedback,
        metrics,
        controller,
    })
}

impl Harness {
    /// Torrent ids of every admitted session, in admission order.
    pub fn started_sessions(&self) -> Vec<TorrentId> {
        self.controller
            .events()
            .backlog_since(0)
            .into_iter()
            .filter_map(|envelope| match envelope.event {
                RecoveryEvent::SessionStarted { torrent_id, .. } => Some(torrent_id),
                _ => None,
            })
            .collect()
    }

    pub fn active_torrent(&self) -> Option<TorrentId> {
        self.controller
            .gate_snapshot()
            .active
            .map(|active| active.torrent.id)
    }

    pub fn queued_torrents(&self) -> Vec<TorrentId> {
        self.controller
            .gate_snapshot()
            .queued
            .into_iter()
            .map(|queued| queued.torrent_id)
            .collect()
    }
}

/// Yield until `condition` holds, failing after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("condition not reached in time"))
}
