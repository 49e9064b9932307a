//! Collaborator traits implemented by the transport adapter and the UI shell.

use anyhow::bail;
use async_trait::async_trait;

use crate::model::{Feedback, FeedbackTone, FreeSpace, TorrentDetail, TorrentId};

/// Asynchronous transport to the torrent daemon.
///
/// Only `resume` and `get_torrent_details` are mandatory; the remaining
/// operations report lack of support by default so thin adapters and test
/// doubles can implement just what they need.
#[async_trait]
pub trait TorrentTransport: Send + Sync {
    /// Resume the given torrents.
    async fn resume(&self, ids: &[TorrentId]) -> anyhow::Result<()>;

    /// Fetch the detailed view of a torrent.
    async fn get_torrent_details(&self, id: &TorrentId) -> anyhow::Result<TorrentDetail>;

    /// Pause the given torrents; default implementation reports lack of support.
    async fn pause(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _ = ids;
        bail!("pause not supported by this transport");
    }

    /// Remove the given torrents, optionally deleting local data.
    async fn remove(&self, ids: &[TorrentId], delete_data: bool) -> anyhow::Result<()> {
        let _ = (ids, delete_data);
        bail!("remove not supported by this transport");
    }

    /// Force a hash check of local data; default implementation reports lack of support.
    async fn verify(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _ = ids;
        bail!("verify not supported by this transport");
    }

    /// Re-announce to trackers; default implementation reports lack of support.
    async fn reannounce(&self, ids: &[TorrentId]) -> anyhow::Result<()> {
        let _ = ids;
        bail!("reannounce not supported by this transport");
    }

    /// Report free space for a path. Failure doubles as a reachability signal.
    async fn check_free_space(&self, path: &str) -> anyhow::Result<FreeSpace> {
        let _ = path;
        bail!("free-space checks not supported by this transport");
    }

    /// Point a torrent at a new location. The daemon creates missing
    /// directories; `move_data` controls whether existing payload is moved.
    async fn set_location(
        &self,
        id: &TorrentId,
        location: &str,
        move_data: bool,
    ) -> anyhow::Result<()> {
        let _ = (id, location, move_data);
        bail!("set-location not supported by this transport");
    }
}

/// Native directory picker exposed by the desktop shell.
#[async_trait]
pub trait DirectoryBrowser: Send + Sync {
    /// Ask the user for a directory, starting at `hint` when provided.
    async fn browse_directory(&self, hint: Option<&str>) -> anyhow::Result<Option<String>>;
}

/// Fire-and-forget user feedback (toasts).
pub trait FeedbackSink: Send + Sync {
    /// Surface a message to the user.
    fn show_feedback(&self, feedback: Feedback, tone: FeedbackTone);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TorrentState;

    struct StubTransport;

    #[async_trait]
    impl TorrentTransport for StubTransport {
        async fn resume(&self, _ids: &[TorrentId]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn get_torrent_details(&self, id: &TorrentId) -> anyhow::Result<TorrentDetail> {
            Ok(TorrentDetail {
                id: id.clone(),
                state: TorrentState::Paused,
                download_dir: None,
                files: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn transport_default_methods_error() -> anyhow::Result<()> {
        let transport = StubTransport;
        let ids = [TorrentId::from("1")];
        transport.resume(&ids).await?;
        assert!(transport.pause(&ids).await.is_err());
        assert!(transport.remove(&ids, true).await.is_err());
        assert!(transport.verify(&ids).await.is_err());
        assert!(transport.reannounce(&ids).await.is_err());
        assert!(transport.check_free_space("/data").await.is_err());
        assert!(
            transport
                .set_location(&ids[0], "/data", false)
                .await
                .expect_err("set-location should error")
                .to_string()
                .contains("set-location")
        );
        Ok(())
    }
}
