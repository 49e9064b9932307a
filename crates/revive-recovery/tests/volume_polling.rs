//! Reattached volumes are detected and their torrents resumed.

mod common;

use std::sync::Arc;

use common::{eventually, harness};
use revive_events::RecoveryEvent;
use revive_recovery::{
    Classification, ConfirmOutcome, EditorStatus, RecoveryAction, RecoveryGateOutcome, RecoveryLog,
    keys,
};
use revive_test_support::{ScriptedTransport, detail, errored_torrent, missing_files_torrent};
use revive_torrent_core::{ErrorClass, TorrentId};
use tokio_util::sync::CancellationToken;

fn unplugged() -> ScriptedTransport {
    let transport = ScriptedTransport::new().with_torrent(detail("1", "/mnt/usb/1", 100, 0));
    transport.set_unreachable("/mnt/usb");
    transport
}

#[tokio::test]
async fn reattached_volume_resumes_with_drive_notice_first() -> anyhow::Result<()> {
    let harness = harness(unplugged())?;
    let torrent = missing_files_torrent("1", "/mnt/usb/1");
    let cancel = CancellationToken::new();

    harness
        .controller
        .request_recovery(&torrent, RecoveryAction::Recheck)
        .await;
    let poller = harness.controller.poller();

    let still_gone = poller.tick(&cancel);
    assert_eq!(still_gone.len(), 1);
    for handle in still_gone {
        let report = handle.await?;
        assert!(!report.reachable);
    }

    harness.transport.set_reachable("/mnt/usb");
    let mut resolved = Vec::new();
    for handle in poller.tick(&cancel) {
        resolved.push(handle.await?);
    }

    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].reachable && resolved[0].resolved);
    assert_eq!(harness.feedback.keys(), [keys::DRIVE_DETECTED, keys::RESUMED]);
    assert!(harness.controller.events().backlog_since(0).iter().any(|envelope| matches!(
        &envelope.event,
        RecoveryEvent::DriveDetected { torrent_id, .. } if torrent_id.as_str() == "1"
    )));
    assert!(poller.tick(&cancel).is_empty());
    assert!(poller.polling().is_empty());
    Ok(())
}

#[tokio::test]
async fn active_session_is_not_polled() -> anyhow::Result<()> {
    let harness = harness(unplugged())?;
    let torrent = missing_files_torrent("1", "/mnt/usb/1");

    let request = {
        let controller = Arc::clone(&harness.controller);
        let torrent = torrent.clone();
        tokio::spawn(async move {
            controller
                .request_recovery(&torrent, RecoveryAction::Resume)
                .await
        })
    };
    eventually(|| harness.active_torrent().is_some()).await?;
    let snapshot = harness.controller.gate_snapshot();
    assert!(matches!(
        snapshot.active.map(|active| active.classification),
        Some(Classification::VolumeLoss { .. })
    ));

    assert!(harness.controller.poller().tick(&CancellationToken::new()).is_empty());

    harness.controller.gate().close_active();
    assert_eq!(request.await?, Some(RecoveryGateOutcome::Cancelled));
    Ok(())
}

#[tokio::test]
async fn queued_volume_loss_settles_when_drive_returns() -> anyhow::Result<()> {
    let harness = harness(unplugged())?;
    let blocker = errored_torrent("0", ErrorClass::PermissionDenied, "/data/0");
    let unplugged = missing_files_torrent("1", "/mnt/usb/1");

    let spawn = |torrent: revive_torrent_core::TorrentSnapshot| {
        let controller = Arc::clone(&harness.controller);
        tokio::spawn(async move {
            controller
                .request_recovery(&torrent, RecoveryAction::Resume)
                .await
        })
    };
    let first = spawn(blocker);
    eventually(|| harness.active_torrent().is_some()).await?;
    let second = spawn(unplugged);
    eventually(|| harness.queued_torrents() == [TorrentId::from("1")]).await?;

    harness.transport.set_reachable("/mnt/usb");
    for handle in harness.controller.poller().tick(&CancellationToken::new()) {
        assert!(handle.await?.resolved);
    }

    assert_eq!(
        second.await?,
        Some(RecoveryGateOutcome::resolved(RecoveryLog::AllVerifiedResuming))
    );
    assert!(harness.queued_torrents().is_empty());
    assert_eq!(harness.active_torrent(), Some(TorrentId::from("0")));

    harness.controller.gate().close_active();
    assert_eq!(first.await?, Some(RecoveryGateOutcome::Cancelled));
    Ok(())
}

#[tokio::test]
async fn editor_verifying_a_queued_torrent_closes_when_the_poller_settles_it()
-> anyhow::Result<()> {
    let harness = harness(unplugged())?;
    let blocker = errored_torrent("0", ErrorClass::PermissionDenied, "/data/0");
    let unplugged = missing_files_torrent("1", "/mnt/usb/1");

    let spawn = |torrent: revive_torrent_core::TorrentSnapshot| {
        let controller = Arc::clone(&harness.controller);
        tokio::spawn(async move {
            controller
                .request_recovery(&torrent, RecoveryAction::Resume)
                .await
        })
    };
    let first = spawn(blocker);
    eventually(|| harness.active_torrent().is_some()).await?;
    let second = spawn(unplugged.clone());
    eventually(|| harness.queued_torrents() == [TorrentId::from("1")]).await?;

    harness.transport.set_reachable("/mnt/usb");
    let editor = Arc::new(harness.controller.inline_editor());
    editor.open("general-tab", &unplugged.id, "/mnt/usb/1")?;
    let confirmed = editor.confirm().await?;
    assert!(matches!(confirmed, ConfirmOutcome::Verifying(_)));

    let follower = {
        let editor = Arc::clone(&editor);
        let gate = Arc::clone(harness.controller.gate());
        let events = harness.controller.events().subscribe(None);
        tokio::spawn(async move { editor.follow(events, &gate).await })
    };
    assert!(editor
        .state()
        .is_some_and(|state| state.status == EditorStatus::Verifying));

    for handle in harness.controller.poller().tick(&CancellationToken::new()) {
        assert!(handle.await?.resolved);
    }

    eventually(|| editor.state().is_none()).await?;
    assert_eq!(
        second.await?,
        Some(RecoveryGateOutcome::resolved(RecoveryLog::AllVerifiedResuming))
    );
    assert!(harness.controller.events().backlog_since(0).iter().any(|envelope| matches!(
        &envelope.event,
        RecoveryEvent::QueuedSettled { torrent_id, .. } if torrent_id.as_str() == "1"
    )));

    harness.controller.gate().close_active();
    assert_eq!(first.await?, Some(RecoveryGateOutcome::Cancelled));
    follower.abort();
    Ok(())
}

#[tokio::test]
async fn polling_is_skipped_for_remote_daemons() -> anyhow::Result<()> {
    let controller = revive_recovery::RecoveryController::new(
        revive_config::RecoveryConfig::default(),
        revive_torrent_core::EnvironmentCapabilities::remote(),
        Arc::new(ScriptedTransport::new()),
        Arc::new(revive_test_support::RecordingFeedback::new()),
        revive_telemetry::Metrics::new()?,
    );
    assert!(controller.start_polling(CancellationToken::new()).is_none());
    Ok(())
}
