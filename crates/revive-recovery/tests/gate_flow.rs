//! Single-flight admission, queue ordering, and finalization.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, harness};
use revive_events::RecoveryEvent;
use revive_recovery::{
    PathNeededReason, RecoveryAction, RecoveryGateOutcome, RecoveryLog, RecoveryOutcome,
    SequenceOptions,
};
use revive_test_support::{
    ScriptedTransport, TransportCall, detail, errored_torrent, healthy_torrent,
    missing_files_torrent,
};
use revive_torrent_core::{ErrorClass, TorrentId, TorrentSnapshot, fingerprint_of};
use tokio::task::JoinHandle;

fn blocked(id: &str) -> TorrentSnapshot {
    errored_torrent(id, ErrorClass::PermissionDenied, &format!("/data/{id}"))
}

fn spawn_request(
    harness: &common::Harness,
    torrent: &TorrentSnapshot,
) -> JoinHandle<Option<RecoveryGateOutcome>> {
    let controller = Arc::clone(&harness.controller);
    let torrent = torrent.clone();
    tokio::spawn(async move {
        controller
            .request_recovery(&torrent, RecoveryAction::Resume)
            .await
    })
}

#[tokio::test]
async fn requests_without_actionable_errors_bypass_the_gate() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let controller = &harness.controller;

    let healthy = healthy_torrent("1", "/data/1");
    assert_eq!(controller.request_recovery(&healthy, RecoveryAction::Resume).await, None);

    let tracker = errored_torrent("2", ErrorClass::TrackerError, "/data/2");
    assert_eq!(controller.request_recovery(&tracker, RecoveryAction::Resume).await, None);

    let denied = blocked("3");
    assert_eq!(
        controller
            .request_recovery(&denied, RecoveryAction::SetLocation)
            .await,
        None
    );
    assert!(harness.transport.calls().is_empty());
    assert!(controller.gate_snapshot().active.is_none());
    Ok(())
}

#[tokio::test]
async fn empty_missing_folder_resolves_without_a_session() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new().with_torrent(detail("1", "/data/1", 100, 0)))?;
    let torrent = missing_files_torrent("1", "/data/1");

    let outcome = harness
        .controller
        .request_recovery(&torrent, RecoveryAction::Resume)
        .await;

    assert_eq!(
        outcome,
        Some(RecoveryGateOutcome::resolved(RecoveryLog::AllVerifiedResuming))
    );
    let calls = harness.transport.calls();
    assert!(calls.contains(&TransportCall::SetLocation(
        TorrentId::from("1"),
        "/data/1".into(),
        false
    )));
    assert!(calls.contains(&TransportCall::Resume(vec![TorrentId::from("1")])));
    assert!(!calls.iter().any(|call| matches!(call, TransportCall::Verify(_))));
    assert!(harness.controller.gate_snapshot().active.is_none());
    Ok(())
}

#[tokio::test]
async fn recheck_reports_block_without_occupying_the_gate() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;

    let outcome = harness
        .controller
        .request_recovery(&blocked("1"), RecoveryAction::Recheck)
        .await;

    assert_eq!(
        outcome,
        Some(RecoveryGateOutcome::blocked(RecoveryOutcome::PathNeeded {
            reason: PathNeededReason::Unwritable
        }))
    );
    assert!(harness.controller.gate_snapshot().active.is_none());
    assert!(harness.started_sessions().is_empty());
    Ok(())
}

#[tokio::test]
async fn same_fingerprint_shares_one_session() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let torrent = blocked("1");

    let first = spawn_request(&harness, &torrent);
    eventually(|| harness.active_torrent().is_some()).await?;
    let second = spawn_request(&harness, &torrent);
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(!second.is_finished());

    let settled = RecoveryGateOutcome::resolved(RecoveryLog::ResumeRetried);
    assert!(harness.controller.gate().resolve_active(settled.clone()));

    assert_eq!(first.await?, Some(settled.clone()));
    assert_eq!(second.await?, Some(settled));
    assert_eq!(harness.started_sessions(), [TorrentId::from("1")]);
    assert!(harness.queued_torrents().is_empty());
    Ok(())
}

#[tokio::test]
async fn queued_sessions_run_in_request_order_with_duplicates_folded() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let (a, b, c) = (blocked("a"), blocked("b"), blocked("c"));

    let request_a = spawn_request(&harness, &a);
    eventually(|| harness.active_torrent().is_some()).await?;
    let request_b = spawn_request(&harness, &b);
    eventually(|| harness.queued_torrents().len() == 1).await?;
    let request_c = spawn_request(&harness, &c);
    eventually(|| harness.queued_torrents().len() == 2).await?;
    let request_b_again = spawn_request(&harness, &b);
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        harness.queued_torrents(),
        [TorrentId::from("b"), TorrentId::from("c")]
    );

    let gate = harness.controller.gate();
    assert!(gate.close_active());
    assert_eq!(harness.active_torrent(), Some(TorrentId::from("b")));
    let b_done = RecoveryGateOutcome::resolved(RecoveryLog::VerifyStarted);
    assert!(gate.resolve_active(b_done.clone()));
    assert_eq!(harness.active_torrent(), Some(TorrentId::from("c")));
    assert!(gate.resolve_active(RecoveryGateOutcome::Continue));
    assert!(harness.active_torrent().is_none());

    assert_eq!(request_a.await?, Some(RecoveryGateOutcome::Cancelled));
    assert_eq!(request_b.await?, Some(b_done.clone()));
    assert_eq!(request_b_again.await?, Some(b_done));
    assert_eq!(request_c.await?, Some(RecoveryGateOutcome::Continue));
    assert_eq!(
        harness.started_sessions(),
        [TorrentId::from("a"), TorrentId::from("b"), TorrentId::from("c")]
    );

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.recovery_sessions_total, 3);
    assert_eq!(snapshot.recovery_queue_depth, 0);
    Ok(())
}

#[tokio::test]
async fn failing_retry_still_admits_the_next_session() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new().with_torrent(detail("a", "/data/a", 100, 40));
    transport.fail_verify("a");
    let harness = harness(transport)?;
    let stuck = missing_files_torrent("a", "/data/a");
    let waiting = blocked("b");

    let request_a = spawn_request(&harness, &stuck);
    eventually(|| harness.active_torrent().is_some()).await?;
    let request_b = spawn_request(&harness, &waiting);
    eventually(|| harness.queued_torrents().len() == 1).await?;

    let retried = harness
        .controller
        .gate()
        .retry_active(SequenceOptions::default())
        .await;

    assert!(matches!(retried, Some(RecoveryOutcome::Error { .. })));
    assert_eq!(harness.active_torrent(), Some(TorrentId::from("b")));
    assert_eq!(
        request_a.await?,
        Some(RecoveryGateOutcome::blocked(RecoveryOutcome::PathNeeded {
            reason: PathNeededReason::Missing
        }))
    );

    assert!(harness.controller.gate().close_active());
    assert_eq!(request_b.await?, Some(RecoveryGateOutcome::Cancelled));
    Ok(())
}

#[tokio::test]
async fn sync_finalizes_a_session_whose_error_cleared() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let torrent = blocked("1");

    let request = spawn_request(&harness, &torrent);
    eventually(|| harness.active_torrent().is_some()).await?;

    harness
        .controller
        .sync_torrents(&[healthy_torrent("1", "/data/1")]);

    assert_eq!(request.await?, Some(RecoveryGateOutcome::Continue));
    assert!(harness.active_torrent().is_none());
    Ok(())
}

#[tokio::test]
async fn sync_settles_queued_requests_for_vanished_torrents() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let (a, b) = (blocked("a"), blocked("b"));

    let request_a = spawn_request(&harness, &a);
    eventually(|| harness.active_torrent().is_some()).await?;
    let request_b = spawn_request(&harness, &b);
    eventually(|| harness.queued_torrents().len() == 1).await?;

    harness.controller.sync_torrents(&[a.clone()]);

    assert_eq!(request_b.await?, Some(RecoveryGateOutcome::Continue));
    assert_eq!(harness.active_torrent(), Some(TorrentId::from("a")));
    assert!(harness.queued_torrents().is_empty());

    assert!(harness.controller.gate().close_active());
    assert_eq!(request_a.await?, Some(RecoveryGateOutcome::Cancelled));
    assert!(harness.active_torrent().is_none());
    assert_eq!(harness.started_sessions(), [TorrentId::from("a")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn request_dropped_mid_sequence_releases_its_fingerprint() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .with_torrent(detail("1", "/data/1", 100, 0))
        .with_latency(Duration::from_millis(100));
    let harness = harness(transport)?;
    let torrent = missing_files_torrent("1", "/data/1");
    let fingerprint = fingerprint_of(&torrent);

    let dropped = tokio::time::timeout(
        Duration::from_millis(5),
        harness
            .controller
            .request_recovery(&torrent, RecoveryAction::Resume),
    )
    .await;
    assert!(dropped.is_err());
    assert!(!harness.controller.gate().is_pending(&fingerprint));

    let retried = tokio::time::timeout(
        Duration::from_secs(5),
        harness
            .controller
            .request_recovery(&torrent, RecoveryAction::Resume),
    )
    .await?;
    assert_eq!(
        retried,
        Some(RecoveryGateOutcome::resolved(RecoveryLog::AllVerifiedResuming))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn aborted_request_settles_callers_that_joined_it() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .with_torrent(detail("1", "/data/1", 100, 0))
        .with_latency(Duration::from_millis(100));
    let harness = harness(transport)?;
    let torrent = missing_files_torrent("1", "/data/1");
    let fingerprint = fingerprint_of(&torrent);
    let gate = harness.controller.gate();

    let first = spawn_request(&harness, &torrent);
    eventually(|| gate.is_pending(&fingerprint)).await?;
    let joined = spawn_request(&harness, &torrent);
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(!joined.is_finished());

    first.abort();
    assert!(first.await.is_err_and(|err| err.is_cancelled()));
    assert_eq!(joined.await?, Some(RecoveryGateOutcome::Cancelled));
    assert!(!gate.is_pending(&fingerprint));
    assert!(harness.started_sessions().is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_all_settles_every_caller_and_reports_it() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let (a, b) = (blocked("a"), blocked("b"));

    let request_a = spawn_request(&harness, &a);
    eventually(|| harness.active_torrent().is_some()).await?;
    let request_b = spawn_request(&harness, &b);
    eventually(|| harness.queued_torrents().len() == 1).await?;

    harness.controller.gate().cancel_all();

    assert_eq!(request_a.await?, Some(RecoveryGateOutcome::Cancelled));
    assert_eq!(request_b.await?, Some(RecoveryGateOutcome::Cancelled));
    let snapshot = harness.controller.gate_snapshot();
    assert!(snapshot.active.is_none() && snapshot.queued.is_empty());
    let kinds: Vec<&str> = harness
        .controller
        .events()
        .backlog_since(0)
        .iter()
        .map(|envelope| envelope.event.kind())
        .collect();
    assert!(kinds.ends_with(&["session_finalized", "queued_settled"]));
    assert_eq!(harness.metrics.snapshot().recovery_queue_depth, 0);

    let again = spawn_request(&harness, &a);
    eventually(|| harness.active_torrent().is_some()).await?;
    assert!(harness.controller.gate().close_active());
    assert_eq!(again.await?, Some(RecoveryGateOutcome::Cancelled));
    Ok(())
}

#[tokio::test]
async fn settled_queue_entry_is_skipped_at_admission() -> anyhow::Result<()> {
    let harness = harness(ScriptedTransport::new())?;
    let (a, b, c) = (blocked("a"), blocked("b"), blocked("c"));

    let request_a = spawn_request(&harness, &a);
    eventually(|| harness.active_torrent().is_some()).await?;
    let request_b = spawn_request(&harness, &b);
    eventually(|| harness.queued_torrents().len() == 1).await?;
    let request_c = spawn_request(&harness, &c);
    eventually(|| harness.queued_torrents().len() == 2).await?;

    let gate = harness.controller.gate();
    assert!(gate.resolve(&fingerprint_of(&b), RecoveryGateOutcome::Cancelled));
    assert_eq!(request_b.await?, Some(RecoveryGateOutcome::Cancelled));
    assert!(harness.controller.events().backlog_since(0).iter().any(|envelope| matches!(
        &envelope.event,
        RecoveryEvent::QueuedSettled { torrent_id, status, .. }
            if torrent_id.as_str() == "b" && status == "cancelled"
    )));

    assert!(gate.close_active());
    assert_eq!(request_a.await?, Some(RecoveryGateOutcome::Cancelled));
    assert_eq!(harness.active_torrent(), Some(TorrentId::from("c")));
    assert!(gate.resolve_active(RecoveryGateOutcome::Continue));
    assert_eq!(request_c.await?, Some(RecoveryGateOutcome::Continue));
    assert_eq!(
        harness.started_sessions(),
        [TorrentId::from("a"), TorrentId::from("c")]
    );
    Ok(())
}
